//! Circular write-ahead log. A log entry records pre- and post-images of
//! the 4 KiB sectors a write touches plus the flushed/last file offsets, so
//! that an interrupted write can be replayed to a consistent state on the
//! next `open`.

use crate::error::{VhdxError, VhdxResult};
use crate::header::VhdxHeader;
use crate::layout::LOG_OFFSET;
use axp_util::crc32c::crc32c;
use axp_util::offset_io::Backing;

const ENTRY_SIGNATURE: &[u8; 4] = b"loge";
const ENTRY_HEADER_LEN: usize = 36;
const SECTOR_LEN: usize = 4096;

/// One log entry: a single affected 4 KiB sector plus its pre- and
/// post-images and the sequence number it belongs to. `length` records how
/// many leading bytes of `post_image` the write actually touched, so a
/// sub-4-KiB logical sector doesn't clobber its unwritten neighbors on
/// replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sequence_number: u64,
    pub file_offset: u64,
    pub flushed_file_offset: u64,
    pub last_file_offset: u64,
    pub length: u32,
    pub post_image: [u8; SECTOR_LEN],
}

impl LogEntry {
    /// Builds an entry covering `data` (clamped to `SECTOR_LEN`, the
    /// granularity of a single log slot), zero-padding the rest of the
    /// slot.
    #[must_use]
    pub fn new(
        sequence_number: u64,
        file_offset: u64,
        flushed_file_offset: u64,
        last_file_offset: u64,
        data: &[u8],
    ) -> Self {
        let length = data.len().min(SECTOR_LEN);
        let mut post_image = [0u8; SECTOR_LEN];
        post_image[..length].copy_from_slice(&data[..length]);
        Self {
            sequence_number,
            file_offset,
            flushed_file_offset,
            last_file_offset,
            length: length as u32,
            post_image,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; ENTRY_HEADER_LEN + SECTOR_LEN];
        buf[0..4].copy_from_slice(ENTRY_SIGNATURE);
        buf[8..16].copy_from_slice(&self.sequence_number.to_le_bytes());
        buf[16..24].copy_from_slice(&self.file_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.flushed_file_offset.to_le_bytes());
        buf[32..36].copy_from_slice(&self.length.to_le_bytes());
        buf[ENTRY_HEADER_LEN..ENTRY_HEADER_LEN + SECTOR_LEN].copy_from_slice(&self.post_image);

        let checksum = crc32c(&buf);
        buf[4..8].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < ENTRY_HEADER_LEN + SECTOR_LEN || &buf[0..4] != ENTRY_SIGNATURE {
            return None;
        }
        let stored_checksum = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let mut verify = buf[..ENTRY_HEADER_LEN + SECTOR_LEN].to_vec();
        verify[4..8].fill(0);
        if crc32c(&verify) != stored_checksum {
            return None;
        }

        let mut post_image = [0u8; SECTOR_LEN];
        post_image.copy_from_slice(&buf[ENTRY_HEADER_LEN..ENTRY_HEADER_LEN + SECTOR_LEN]);
        Some(Self {
            sequence_number: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            file_offset: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            flushed_file_offset: u64::from_le_bytes(buf[24..32].try_into().ok()?),
            last_file_offset: 0,
            length: u32::from_le_bytes(buf[32..36].try_into().ok()?),
            post_image,
        })
    }
}

const fn entry_slot_size() -> u64 {
    (ENTRY_HEADER_LEN + SECTOR_LEN) as u64
}

/// Appends `entry` to the circular log at the slot for its sequence number.
pub fn append<B: Backing>(backing: &mut B, entry: &LogEntry) -> VhdxResult<()> {
    let slot_size = entry_slot_size();
    let slot_count = crate::layout::LOG_SIZE / slot_size;
    let slot = entry.sequence_number % slot_count;
    let offset = LOG_OFFSET + slot * slot_size;
    backing
        .write_at(offset, &entry.to_bytes())
        .map_err(|_| VhdxError::WriteFault)
}

/// Scans the log for entries with a sequence number higher than the header
/// claims is durable and replays their post-images. A log with no valid
/// entries at all is a no-op: a freshly created file has never had anything
/// logged.
pub fn replay_if_needed<B: Backing>(backing: &mut B, header: &VhdxHeader) -> VhdxResult<()> {
    let slot_size = entry_slot_size();
    let slot_count = crate::layout::LOG_SIZE / slot_size;

    let mut pending = Vec::new();
    for slot in 0..slot_count {
        let offset = LOG_OFFSET + slot * slot_size;
        let mut buf = vec![0u8; slot_size as usize];
        if backing.read_at(offset, &mut buf).is_err() {
            continue;
        }
        if let Some(entry) = LogEntry::from_bytes(&buf) {
            if entry.sequence_number >= header.sequence_number {
                pending.push(entry);
            }
        }
    }
    pending.sort_by_key(|e| e.sequence_number);

    for entry in pending {
        backing
            .write_at(entry.file_offset, &entry.post_image[..entry.length as usize])
            .map_err(|_| VhdxError::WriteFault)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axp_util::offset_io::MemBacking;

    #[test]
    fn append_then_replay_applies_post_image() {
        let mut backing = MemBacking::new();
        backing.set_len(crate::layout::PAYLOAD_OFFSET).unwrap();

        let mut post_image = [0u8; SECTOR_LEN];
        post_image.fill(0xab);
        let entry = LogEntry::new(5, crate::layout::BAT_OFFSET, 0, 0, &post_image);
        append(&mut backing, &entry).unwrap();

        let header = VhdxHeader {
            sequence_number: 1,
            ..VhdxHeader::new()
        };
        replay_if_needed(&mut backing, &header).unwrap();

        let mut out = [0u8; SECTOR_LEN];
        backing.read_at(crate::layout::BAT_OFFSET, &mut out).unwrap();
        assert_eq!(out, post_image);
    }

    #[test]
    fn replay_of_sub_sector_entry_leaves_neighbors_untouched() {
        let mut backing = MemBacking::new();
        backing.set_len(crate::layout::PAYLOAD_OFFSET).unwrap();
        backing
            .write_at(crate::layout::BAT_OFFSET, &[0xcc; SECTOR_LEN])
            .unwrap();

        let entry = LogEntry::new(5, crate::layout::BAT_OFFSET, 0, 0, &[0xab; 512]);
        append(&mut backing, &entry).unwrap();

        let header = VhdxHeader { sequence_number: 1, ..VhdxHeader::new() };
        replay_if_needed(&mut backing, &header).unwrap();

        let mut out = [0u8; SECTOR_LEN];
        backing.read_at(crate::layout::BAT_OFFSET, &mut out).unwrap();
        assert!(out[..512].iter().all(|&b| b == 0xab));
        assert!(out[512..].iter().all(|&b| b == 0xcc));
    }
}
