//! Page Table Entry bit layout, shared by the ITB and DTB fill paths.
//! Represented as a plain 64-bit integer with explicit accessors rather
//! than a host bit-field struct.

/// Granularity hint: how many consecutive 8 KiB pages a single TLB entry
/// covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranularityHint {
    OnePage,
    EightPages,
    SixtyFourPages,
    FiveTwelvePages,
}

impl GranularityHint {
    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0 => Self::OnePage,
            1 => Self::EightPages,
            2 => Self::SixtyFourPages,
            _ => Self::FiveTwelvePages,
        }
    }

    #[must_use]
    pub fn bits(self) -> u64 {
        match self {
            Self::OnePage => 0,
            Self::EightPages => 1,
            Self::SixtyFourPages => 2,
            Self::FiveTwelvePages => 3,
        }
    }

    /// Number of low virtual-address page bits this hint lets vary while
    /// still matching the entry (log2 of the page count).
    #[must_use]
    pub fn low_bits(self) -> u32 {
        match self {
            Self::OnePage => 0,
            Self::EightPages => 3,
            Self::SixtyFourPages => 6,
            Self::FiveTwelvePages => 9,
        }
    }
}

/// A Page Table Entry: 64 bits, declared low-bit-first as `v, for, fow,
/// foe, asm, gh:2, nomb, kre, ere_ure, sre, ure, kwe, ewe_uwe, swe, uwe,
/// res:16, prf:32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pte(pub u64);

impl Pte {
    #[must_use]
    pub fn valid(self) -> bool {
        self.0 & 1 != 0
    }
    #[must_use]
    pub fn fault_on_read(self) -> bool {
        (self.0 >> 1) & 1 != 0
    }
    #[must_use]
    pub fn fault_on_write(self) -> bool {
        (self.0 >> 2) & 1 != 0
    }
    #[must_use]
    pub fn fault_on_execute(self) -> bool {
        (self.0 >> 3) & 1 != 0
    }
    #[must_use]
    pub fn address_space_match(self) -> bool {
        (self.0 >> 4) & 1 != 0
    }
    #[must_use]
    pub fn granularity_hint(self) -> GranularityHint {
        GranularityHint::from_bits(self.0 >> 5)
    }
    #[must_use]
    pub fn kernel_read_enabled(self) -> bool {
        (self.0 >> 8) & 1 != 0
    }
    #[must_use]
    pub fn executive_read_enabled(self) -> bool {
        (self.0 >> 9) & 1 != 0
    }
    #[must_use]
    pub fn supervisor_read_enabled(self) -> bool {
        (self.0 >> 10) & 1 != 0
    }
    #[must_use]
    pub fn user_read_enabled(self) -> bool {
        (self.0 >> 11) & 1 != 0
    }
    #[must_use]
    pub fn kernel_write_enabled(self) -> bool {
        (self.0 >> 12) & 1 != 0
    }
    #[must_use]
    pub fn executive_write_enabled(self) -> bool {
        (self.0 >> 13) & 1 != 0
    }
    #[must_use]
    pub fn supervisor_write_enabled(self) -> bool {
        (self.0 >> 14) & 1 != 0
    }
    #[must_use]
    pub fn user_write_enabled(self) -> bool {
        (self.0 >> 15) & 1 != 0
    }
    #[must_use]
    pub fn page_frame_number(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[must_use]
    pub fn with_page_frame_number(mut self, pfn: u32) -> Self {
        self.0 = (self.0 & 0x0000_0000_ffff_ffff) | (u64::from(pfn) << 32);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_frame_number_round_trips() {
        let pte = Pte(0).with_page_frame_number(0x1234);
        assert_eq!(pte.page_frame_number(), 0x1234);
    }

    #[test]
    fn granularity_hint_decodes() {
        let pte = Pte(0b10_0000); // gh bits at position 5-6 = 0b01
        assert_eq!(pte.granularity_hint(), GranularityHint::EightPages);
    }

    #[test]
    fn flag_bits_are_independent() {
        let pte = Pte(0b1_0101); // valid + fault-on-write + asm
        assert!(pte.valid());
        assert!(pte.fault_on_write());
        assert!(pte.address_space_match());
        assert!(!pte.fault_on_read());
    }
}
