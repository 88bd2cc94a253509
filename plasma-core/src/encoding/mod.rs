//! Packed PIO state words.
//!
//! The PIO program consumes one 32-bit word per PWM period and shifts it out
//! LSB first:
//!
//! ```text
//!  31    28 27    24 23                    8 7      4 3      0
//! +--------+--------+-----------------------+--------+--------+
//! | exit.2 | exit.1 |   delay (PIO cycles)  | entry.2| entry.1|
//! +--------+--------+-----------------------+--------+--------+
//! ```
//!
//! The entry transition is applied at the period boundary, the program then
//! spins for `delay` cycles and applies the exit transition. Each transition
//! drives two pin patterns back to back, the first one acting as dead time.

use crate::topology::SwitchSet;

const DELAY_SHIFT: u32 = 8;
const EXIT_SHIFT: u32 = 24;
const DELAY_MASK: u32 = 0xFFFF;

/// Two pin patterns applied on consecutive PIO instructions.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Transition {
    pub first: SwitchSet,
    pub second: SwitchSet,
}

impl Transition {
    #[must_use]
    pub const fn new(first: SwitchSet, second: SwitchSet) -> Self {
        Self { first, second }
    }

    /// Transition that holds one pattern for both steps.
    #[must_use]
    pub const fn steady(pattern: SwitchSet) -> Self {
        Self::new(pattern, pattern)
    }

    /// Byte lane encoding: first pattern in the low nibble.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.first.bits() | (self.second.bits() << 4)
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self::new(SwitchSet::from_bits(byte), SwitchSet::from_bits(byte >> 4))
    }

    /// Returns `true` when neither step shorts a bridge leg.
    #[must_use]
    pub const fn is_safe(self) -> bool {
        !self.first.shoots_through() && !self.second.shoots_through()
    }
}

/// Typed view of a packed state word.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PackedWord {
    pub entry: Transition,
    pub delay: u16,
    pub exit: Transition,
}

impl PackedWord {
    #[must_use]
    pub const fn new(entry: Transition, delay: u16, exit: Transition) -> Self {
        Self { entry, delay, exit }
    }

    /// Packs the fields into the word layout the PIO program expects.
    #[must_use]
    pub const fn pack(self) -> u32 {
        (self.entry.to_byte() as u32)
            | ((self.delay as u32) << DELAY_SHIFT)
            | ((self.exit.to_byte() as u32) << EXIT_SHIFT)
    }

    #[must_use]
    // Each lane is extracted by shift and mask; the narrowing drops only bits
    // belonging to other lanes.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn unpack(word: u32) -> Self {
        Self {
            entry: Transition::from_byte(word as u8),
            delay: ((word >> DELAY_SHIFT) & DELAY_MASK) as u16,
            exit: Transition::from_byte((word >> EXIT_SHIFT) as u8),
        }
    }

    #[must_use]
    pub const fn is_safe(self) -> bool {
        self.entry.is_safe() && self.exit.is_safe()
    }
}

/// Transition and cycle words derived from the bridge topology.
///
/// Cycle words leave bits [23:8] clear; the waveform generator ORs the
/// per-period delay into that lane.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StateWords {
    pub stop_to_free: Transition,
    pub free_to_stop: Transition,
    pub free_to_positive: Transition,
    pub positive_to_free: Transition,
    pub free_to_negative: Transition,
    pub negative_to_free: Transition,
    pub free_cycle: u32,
    pub positive_cycle: u32,
    pub negative_cycle: u32,
}

impl StateWords {
    /// Derives every word from the canonical switch patterns.
    #[must_use]
    pub const fn encode() -> Self {
        let low_a = SwitchSet::of(&[crate::topology::SwitchLine::S2]);
        let low_b = SwitchSet::of(&[crate::topology::SwitchLine::S4]);

        let stop_to_free = Transition::new(SwitchSet::OFF, SwitchSet::FREE_WHEEL);
        let free_to_stop = Transition::steady(SwitchSet::OFF);
        let free_to_positive = Transition::new(low_a, SwitchSet::POSITIVE);
        let positive_to_free = Transition::new(low_a, SwitchSet::FREE_WHEEL);
        let free_to_negative = Transition::new(low_b, SwitchSet::NEGATIVE);
        let negative_to_free = Transition::new(low_b, SwitchSet::FREE_WHEEL);

        let free = Transition::steady(SwitchSet::FREE_WHEEL);

        Self {
            stop_to_free,
            free_to_stop,
            free_to_positive,
            positive_to_free,
            free_to_negative,
            negative_to_free,
            free_cycle: PackedWord::new(free, 0, free).pack(),
            positive_cycle: PackedWord::new(free_to_positive, 0, positive_to_free).pack(),
            negative_cycle: PackedWord::new(free_to_negative, 0, negative_to_free).pack(),
        }
    }

    /// Word loaded before the first period of a shot: off, hold, then free-wheel.
    #[must_use]
    pub const fn arm_word(&self, delay: u16) -> u32 {
        PackedWord::new(self.free_to_stop, delay, self.stop_to_free).pack()
    }

    /// Word pushed after a shot; the pins end up with every switch open.
    #[must_use]
    pub const fn off_word(&self) -> u32 {
        self.stop_to_free.to_byte() as u32
    }

    /// Word that parks the bridge on a fixed pattern (manual mode).
    #[must_use]
    pub const fn hold_word(pattern: SwitchSet) -> u32 {
        let steady = Transition::steady(pattern);
        PackedWord::new(steady, 0, steady).pack()
    }

    /// Returns `true` when no word ever closes both switches of a leg.
    #[must_use]
    pub const fn is_safe(&self) -> bool {
        self.stop_to_free.is_safe()
            && self.free_to_stop.is_safe()
            && self.free_to_positive.is_safe()
            && self.positive_to_free.is_safe()
            && self.free_to_negative.is_safe()
            && self.negative_to_free.is_safe()
            && PackedWord::unpack(self.free_cycle).is_safe()
            && PackedWord::unpack(self.positive_cycle).is_safe()
            && PackedWord::unpack(self.negative_cycle).is_safe()
    }
}

/// Words for the board's fixed topology.
pub const STATE_WORDS: StateWords = StateWords::encode();

const _: () = assert!(STATE_WORDS.is_safe(), "state words short a bridge leg");
