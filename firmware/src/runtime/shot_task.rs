use embassy_time::{Instant, Ticker};
use plasma_core::shot::{ShotConfig, ShotProgress, ShotReport, ShotSequencer, ShotTargets};
use plasma_core::status::SystemState;

use super::embassy_duration;
use crate::command::{CommandQueue, DriverCommand};
use crate::status::{self, CANCEL};
use crate::telemetry::{FirmwareInstant, FirmwareTelemetry};
use crate::waveform::{BridgeOutput, WAVEFORM};

#[embassy_executor::task]
pub async fn run(mut output: BridgeOutput<'static>, queue: &'static CommandQueue) -> ! {
    let receiver = queue.receiver();
    let mut config = ShotConfig::default();
    let mut telemetry = FirmwareTelemetry::new();

    loop {
        match receiver.receive().await {
            DriverCommand::Fire(table) => {
                if let Some(report) = fire(&mut output, &table, &config, &mut telemetry).await {
                    let snapshot = status::snapshot(Instant::now());
                    defmt::info!(
                        "shot: {} after {} ticks, {} periods, {} overruns (fired={} cancelled={})",
                        defmt::Display2Format(&report.outcome),
                        report.ticks,
                        report.cycles,
                        report.overruns,
                        snapshot.shots_fired,
                        snapshot.shots_cancelled
                    );
                }
            }
            DriverCommand::Hold(manual) => {
                output.hold(manual.pattern);
                defmt::info!("shot: holding {}", defmt::Display2Format(&manual.pattern));
            }
            DriverCommand::Configure(command) => {
                config.apply(command);
                defmt::info!(
                    "shot: {}={}",
                    defmt::Display2Format(&command.param),
                    command.value
                );
            }
        }
    }
}

async fn fire(
    output: &mut BridgeOutput<'static>,
    table: &[u8],
    config: &ShotConfig,
    telemetry: &mut FirmwareTelemetry,
) -> Option<ShotReport> {
    let mut shot = match ShotSequencer::start(output, &WAVEFORM, ShotTargets::Table(table), config)
    {
        Ok(shot) => shot,
        Err(error) => {
            defmt::warn!("shot: refused: {}", defmt::Display2Format(&error));
            status::publish_link_state(SystemState::Idle);
            return None;
        }
    };

    status::begin_shot();
    telemetry.shot_started(FirmwareInstant::now());
    defmt::info!(
        "shot: firing {} targets over {} ticks",
        table.len(),
        shot.total_ticks()
    );

    let mut ticker = Ticker::every(embassy_duration(config.tick_period));
    let report = loop {
        ticker.next().await;
        if let ShotProgress::Finished(report) = shot.tick(CANCEL.take()) {
            break report;
        }
    };
    drop(shot);

    status::finish_shot(&report, Instant::now());
    telemetry.shot_finished(&report, FirmwareInstant::now());
    Some(report)
}
