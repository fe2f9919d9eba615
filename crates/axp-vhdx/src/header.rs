use axp_util::crc32c::crc32c;
use uuid::Uuid;

pub const HEADER_SIZE: u64 = 4096;
const SIGNATURE: &[u8; 4] = b"head";

const SIG_OFF: usize = 0;
const CHECKSUM_OFF: usize = 4;
const SEQ_OFF: usize = 8;
const FILE_WRITE_GUID_OFF: usize = 16;
const DATA_WRITE_GUID_OFF: usize = 32;
const LOG_GUID_OFF: usize = 48;
const LOG_VERSION_OFF: usize = 64;
const FORMAT_VERSION_OFF: usize = 66;
const LOG_LENGTH_OFF: usize = 68;
const LOG_OFFSET_OFF: usize = 72;

/// One of the two duplicate 4 KiB VHDX headers. Only the slot with the
/// higher sequence number and a valid CRC-32C is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhdxHeader {
    pub sequence_number: u64,
    pub file_write_guid: Uuid,
    pub data_write_guid: Uuid,
    pub log_guid: Uuid,
    pub log_version: u16,
    pub format_version: u16,
    pub log_length: u32,
    pub log_offset: u64,
}

impl VhdxHeader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequence_number: 0,
            file_write_guid: Uuid::new_v4(),
            data_write_guid: Uuid::new_v4(),
            log_guid: Uuid::new_v4(),
            log_version: 0,
            format_version: 1,
            log_length: crate::layout::LOG_SIZE as u32,
            log_offset: crate::layout::LOG_OFFSET,
        }
    }

    /// Serializes the header into a zero-padded 4 KiB buffer with the
    /// CRC-32C checksum computed over the whole buffer with the checksum
    /// field itself held at zero.
    #[must_use]
    pub fn to_bytes_with_checksum(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[SIG_OFF..SIG_OFF + 4].copy_from_slice(SIGNATURE);
        buf[SEQ_OFF..SEQ_OFF + 8].copy_from_slice(&self.sequence_number.to_le_bytes());
        buf[FILE_WRITE_GUID_OFF..FILE_WRITE_GUID_OFF + 16]
            .copy_from_slice(self.file_write_guid.as_bytes());
        buf[DATA_WRITE_GUID_OFF..DATA_WRITE_GUID_OFF + 16]
            .copy_from_slice(self.data_write_guid.as_bytes());
        buf[LOG_GUID_OFF..LOG_GUID_OFF + 16].copy_from_slice(self.log_guid.as_bytes());
        buf[LOG_VERSION_OFF..LOG_VERSION_OFF + 2].copy_from_slice(&self.log_version.to_le_bytes());
        buf[FORMAT_VERSION_OFF..FORMAT_VERSION_OFF + 2]
            .copy_from_slice(&self.format_version.to_le_bytes());
        buf[LOG_LENGTH_OFF..LOG_LENGTH_OFF + 4].copy_from_slice(&self.log_length.to_le_bytes());
        buf[LOG_OFFSET_OFF..LOG_OFFSET_OFF + 8].copy_from_slice(&self.log_offset.to_le_bytes());

        let checksum = crc32c(&buf);
        buf[CHECKSUM_OFF..CHECKSUM_OFF + 4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Parses a header slot, returning `None` if the signature doesn't
    /// match or the checksum doesn't verify.
    #[must_use]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE as usize || &buf[SIG_OFF..SIG_OFF + 4] != SIGNATURE {
            return None;
        }

        let stored_checksum = u32::from_le_bytes(buf[CHECKSUM_OFF..CHECKSUM_OFF + 4].try_into().ok()?);
        let mut verify_buf = [0u8; HEADER_SIZE as usize];
        verify_buf.copy_from_slice(&buf[..HEADER_SIZE as usize]);
        verify_buf[CHECKSUM_OFF..CHECKSUM_OFF + 4].fill(0);
        if crc32c(&verify_buf) != stored_checksum {
            return None;
        }

        Some(Self {
            sequence_number: u64::from_le_bytes(buf[SEQ_OFF..SEQ_OFF + 8].try_into().ok()?),
            file_write_guid: Uuid::from_slice(&buf[FILE_WRITE_GUID_OFF..FILE_WRITE_GUID_OFF + 16]).ok()?,
            data_write_guid: Uuid::from_slice(&buf[DATA_WRITE_GUID_OFF..DATA_WRITE_GUID_OFF + 16]).ok()?,
            log_guid: Uuid::from_slice(&buf[LOG_GUID_OFF..LOG_GUID_OFF + 16]).ok()?,
            log_version: u16::from_le_bytes(buf[LOG_VERSION_OFF..LOG_VERSION_OFF + 2].try_into().ok()?),
            format_version: u16::from_le_bytes(
                buf[FORMAT_VERSION_OFF..FORMAT_VERSION_OFF + 2].try_into().ok()?,
            ),
            log_length: u32::from_le_bytes(buf[LOG_LENGTH_OFF..LOG_LENGTH_OFF + 4].try_into().ok()?),
            log_offset: u64::from_le_bytes(buf[LOG_OFFSET_OFF..LOG_OFFSET_OFF + 8].try_into().ok()?),
        })
    }
}

impl Default for VhdxHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut header = VhdxHeader::new();
        header.sequence_number = 42;
        let bytes = header.to_bytes_with_checksum();
        let parsed = VhdxHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let header = VhdxHeader::new();
        let mut bytes = header.to_bytes_with_checksum();
        bytes[200] ^= 0xff;
        assert!(VhdxHeader::from_bytes(&bytes).is_none());
    }
}
