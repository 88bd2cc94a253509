//! Half-bridge switch topology.
//!
//! The coil sits between two bridge legs. Leg A is formed by S1 (high side)
//! and S2 (low side), leg B by S3 (high side) and S4 (low side). Each switch
//! maps to one bit of a 4-bit pin pattern, which the PIO program shifts
//! straight onto four consecutive GPIOs.

use core::fmt;

/// Identifier for one of the four gate-drive lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwitchLine {
    S1,
    S2,
    S3,
    S4,
}

impl SwitchLine {
    /// All lines in pin order (lowest GPIO first).
    pub const ALL: [SwitchLine; 4] = [SwitchLine::S1, SwitchLine::S2, SwitchLine::S3, SwitchLine::S4];

    /// Single-bit activation mask for the line.
    #[must_use]
    pub const fn mask(self) -> u8 {
        match self {
            SwitchLine::S1 => 0x1,
            SwitchLine::S2 => 0x2,
            SwitchLine::S3 => 0x4,
            SwitchLine::S4 => 0x8,
        }
    }

    /// Offset from the first PIO output pin.
    #[must_use]
    pub const fn pin_offset(self) -> u8 {
        match self {
            SwitchLine::S1 => 0,
            SwitchLine::S2 => 1,
            SwitchLine::S3 => 2,
            SwitchLine::S4 => 3,
        }
    }
}

impl fmt::Display for SwitchLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SwitchLine::S1 => "S1",
            SwitchLine::S2 => "S2",
            SwitchLine::S3 => "S3",
            SwitchLine::S4 => "S4",
        };
        f.write_str(label)
    }
}

/// A 4-bit pin pattern naming which switches are closed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SwitchSet(u8);

impl SwitchSet {
    /// Every switch open.
    pub const OFF: SwitchSet = SwitchSet(0);
    /// Both low-side switches closed; coil current circulates without injection.
    pub const FREE_WHEEL: SwitchSet = SwitchSet::of(&[SwitchLine::S2, SwitchLine::S4]);
    /// Diagonal S3 → coil → S2: positive conduction.
    pub const POSITIVE: SwitchSet = SwitchSet::of(&[SwitchLine::S2, SwitchLine::S3]);
    /// Diagonal S1 → coil → S4: negative conduction.
    pub const NEGATIVE: SwitchSet = SwitchSet::of(&[SwitchLine::S1, SwitchLine::S4]);

    /// Combines the given lines into a pattern.
    #[must_use]
    pub const fn of(lines: &[SwitchLine]) -> Self {
        let mut bits = 0;
        let mut index = 0;
        while index < lines.len() {
            bits |= lines[index].mask();
            index += 1;
        }
        SwitchSet(bits)
    }

    /// Builds a pattern from the low nibble of `bits`.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        SwitchSet(bits & 0x0F)
    }

    /// Raw nibble value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` when `line` is closed in this pattern.
    #[must_use]
    pub const fn contains(self, line: SwitchLine) -> bool {
        self.0 & line.mask() != 0
    }

    /// Returns a copy with `line` closed or opened.
    #[must_use]
    pub const fn with(self, line: SwitchLine, closed: bool) -> Self {
        if closed {
            SwitchSet(self.0 | line.mask())
        } else {
            SwitchSet(self.0 & !line.mask())
        }
    }

    /// Returns `true` when the pattern closes both switches of a bridge leg.
    #[must_use]
    pub const fn shoots_through(self) -> bool {
        let leg_a = SwitchLine::S1.mask() | SwitchLine::S2.mask();
        let leg_b = SwitchLine::S3.mask() | SwitchLine::S4.mask();
        self.0 & leg_a == leg_a || self.0 & leg_b == leg_b
    }
}

impl fmt::Display for SwitchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for line in SwitchLine::ALL {
            if self.contains(line) {
                if !first {
                    f.write_str("|")?;
                }
                write!(f, "{line}")?;
                first = false;
            }
        }
        if first {
            f.write_str("off")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_masks_are_disjoint_single_bits() {
        let mut seen = 0u8;
        for line in SwitchLine::ALL {
            let mask = line.mask();
            assert_eq!(mask.count_ones(), 1, "{line} must be a single bit");
            assert_eq!(seen & mask, 0, "{line} overlaps another line");
            assert_eq!(mask, 1 << line.pin_offset());
            seen |= mask;
        }
        assert_eq!(seen, 0x0F);
    }

    #[test]
    fn canonical_patterns_never_short_a_leg() {
        for pattern in [
            SwitchSet::OFF,
            SwitchSet::FREE_WHEEL,
            SwitchSet::POSITIVE,
            SwitchSet::NEGATIVE,
        ] {
            assert!(!pattern.shoots_through(), "{pattern} shorts the bridge");
        }
        assert_eq!(SwitchSet::FREE_WHEEL.bits(), 0x0A);
        assert_eq!(SwitchSet::POSITIVE.bits(), 0x06);
        assert_eq!(SwitchSet::NEGATIVE.bits(), 0x09);
    }

    #[test]
    fn same_leg_pairs_are_flagged() {
        assert!(SwitchSet::of(&[SwitchLine::S1, SwitchLine::S2]).shoots_through());
        assert!(SwitchSet::of(&[SwitchLine::S3, SwitchLine::S4]).shoots_through());
        assert!(SwitchSet::from_bits(0x0F).shoots_through());
        assert!(!SwitchSet::of(&[SwitchLine::S1, SwitchLine::S3]).shoots_through());
    }

    #[test]
    fn with_toggles_single_lines() {
        let pattern = SwitchSet::OFF
            .with(SwitchLine::S2, true)
            .with(SwitchLine::S4, true);
        assert_eq!(pattern, SwitchSet::FREE_WHEEL);
        assert_eq!(pattern.with(SwitchLine::S4, false).bits(), 0x02);
    }
}
