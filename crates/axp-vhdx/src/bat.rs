const STATE_MASK: u64 = 0x7;
const OFFSET_MB_SHIFT: u32 = 20;
const MB: u64 = 1024 * 1024;

/// Low 3 bits of a BAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatState {
    PayloadBlockNotPresent = 0,
    PayloadBlockUndefined = 1,
    PayloadBlockZero = 2,
    PayloadBlockUnmapped = 3,
    PayloadBlockFullyPresent = 6,
    PayloadBlockPartiallyPresent = 7,
}

impl BatState {
    fn from_bits(bits: u64) -> Self {
        match bits {
            0 => Self::PayloadBlockNotPresent,
            1 => Self::PayloadBlockUndefined,
            2 => Self::PayloadBlockZero,
            3 => Self::PayloadBlockUnmapped,
            6 => Self::PayloadBlockFullyPresent,
            7 => Self::PayloadBlockPartiallyPresent,
            _ => Self::PayloadBlockNotPresent,
        }
    }
}

/// One 64-bit Block Allocation Table entry: 3-bit state in the low bits,
/// 44-bit file offset (in 1 MiB units) in the high bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatEntry(u64);

impl BatEntry {
    #[must_use]
    pub fn new(state: BatState, file_offset: u64) -> Self {
        let offset_units = file_offset / MB;
        Self((offset_units << OFFSET_MB_SHIFT) | state as u64)
    }

    #[must_use]
    pub fn not_present() -> Self {
        Self::new(BatState::PayloadBlockNotPresent, 0)
    }

    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn state(self) -> BatState {
        BatState::from_bits(self.0 & STATE_MASK)
    }

    /// File offset in bytes, or `None` if the block is not present.
    #[must_use]
    pub fn file_offset(self) -> Option<u64> {
        match self.state() {
            BatState::PayloadBlockFullyPresent | BatState::PayloadBlockPartiallyPresent => {
                Some((self.0 >> OFFSET_MB_SHIFT) * MB)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_state_and_offset() {
        let entry = BatEntry::new(BatState::PayloadBlockFullyPresent, 19 * MB);
        assert_eq!(entry.state(), BatState::PayloadBlockFullyPresent);
        assert_eq!(entry.file_offset(), Some(19 * MB));
    }

    #[test]
    fn not_present_has_no_offset() {
        let entry = BatEntry::not_present();
        assert_eq!(entry.file_offset(), None);
    }
}
