//! Single-port CDC ACM device carrying the framed pulse protocol.
//!
//! The host opens the port and asserts DTR; frames then arrive as raw bytes
//! in USB packets. Dropping DTR is how the host detaches (and cancels a shot
//! in flight).

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use crate::board;

#[cfg(target_os = "none")]
pub const MAX_PACKET_SIZE: u16 = 64;

#[cfg(target_os = "none")]
const CONTROL_BUFFER_LEN: usize = 64;
#[cfg(target_os = "none")]
const CONFIG_DESCRIPTOR_LEN: usize = 128;
#[cfg(target_os = "none")]
const BOS_DESCRIPTOR_LEN: usize = 64;

/// User-visible strings advertised in the USB descriptors.
#[derive(Clone, Copy, Debug)]
pub struct UsbDeviceStrings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: Option<&'static str>,
}

impl Default for UsbDeviceStrings {
    fn default() -> Self {
        Self {
            manufacturer: "Plasma Lab",
            product: "Plasma Pulse Driver",
            serial_number: None,
        }
    }
}

/// Vendor and product id pair advertised to the host.
#[must_use]
pub const fn device_ids() -> (u16, u16) {
    (board::USB_VID, board::USB_PID)
}

/// Backing storage for the Embassy USB builder and the CDC ACM class.
#[cfg(target_os = "none")]
pub struct UsbDeviceStorage {
    control_buf: [u8; CONTROL_BUFFER_LEN],
    config_descriptor: [u8; CONFIG_DESCRIPTOR_LEN],
    bos_descriptor: [u8; BOS_DESCRIPTOR_LEN],
    msos_descriptor: [u8; 0],
    link_state: embassy_usb::class::cdc_acm::State<'static>,
}

#[cfg(target_os = "none")]
impl UsbDeviceStorage {
    pub fn new() -> Self {
        Self {
            control_buf: [0; CONTROL_BUFFER_LEN],
            config_descriptor: [0; CONFIG_DESCRIPTOR_LEN],
            bos_descriptor: [0; BOS_DESCRIPTOR_LEN],
            msos_descriptor: [],
            link_state: embassy_usb::class::cdc_acm::State::new(),
        }
    }
}

#[cfg(target_os = "none")]
impl Default for UsbDeviceStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Split handles for the CDC ACM interface.
#[cfg(target_os = "none")]
pub struct CdcLink<D: embassy_usb::driver::Driver<'static>> {
    pub sender: embassy_usb::class::cdc_acm::Sender<'static, D>,
    pub receiver: embassy_usb::class::cdc_acm::Receiver<'static, D>,
    pub control: embassy_usb::class::cdc_acm::ControlChanged<'static>,
}

#[cfg(target_os = "none")]
impl<D> CdcLink<D>
where
    D: embassy_usb::driver::Driver<'static>,
{
    /// Waits until the endpoints are enabled and the host asserts DTR.
    pub async fn wait_attached(&mut self) {
        embassy_futures::join::join(
            self.sender.wait_connection(),
            self.receiver.wait_connection(),
        )
        .await;

        while !self.sender.dtr() {
            self.control.control_changed().await;
        }
    }

    /// Returns `true` while the host holds DTR.
    pub fn dtr(&self) -> bool {
        self.sender.dtr()
    }
}

/// Owns the USB device and, until taken, the CDC link handles.
#[cfg(target_os = "none")]
pub struct UsbSerial<D>
where
    D: embassy_usb::driver::Driver<'static>,
{
    pub device: embassy_usb::UsbDevice<'static, D>,
    link: Option<CdcLink<D>>,
}

#[cfg(target_os = "none")]
impl<D> UsbSerial<D>
where
    D: embassy_usb::driver::Driver<'static>,
{
    pub fn new(
        driver: D,
        storage: &'static mut UsbDeviceStorage,
        strings: UsbDeviceStrings,
    ) -> Self {
        let (vid, pid) = device_ids();
        let mut config = embassy_usb::Config::new(vid, pid);
        config.manufacturer = Some(strings.manufacturer);
        config.product = Some(strings.product);
        config.serial_number = strings.serial_number;
        config.max_packet_size_0 = 64;
        config.max_power = 100;

        let mut builder = embassy_usb::Builder::new(
            driver,
            config,
            &mut storage.config_descriptor,
            &mut storage.bos_descriptor,
            &mut storage.msos_descriptor,
            &mut storage.control_buf,
        );

        let class = embassy_usb::class::cdc_acm::CdcAcmClass::new(
            &mut builder,
            &mut storage.link_state,
            MAX_PACKET_SIZE,
        );
        let (sender, receiver, control) = class.split_with_control();
        let device = builder.build();

        Self {
            device,
            link: Some(CdcLink {
                sender,
                receiver,
                control,
            }),
        }
    }

    /// Takes ownership of the CDC link handles.
    pub fn take_link(&mut self) -> Option<CdcLink<D>> {
        self.link.take()
    }
}
