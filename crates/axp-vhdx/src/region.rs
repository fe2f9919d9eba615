use axp_util::crc32c::crc32c;
use uuid::{uuid, Uuid};

pub const REGION_TABLE_SIZE: u64 = 64 * 1024;
const SIGNATURE: &[u8; 4] = b"regi";
const HEADER_LEN: usize = 16;
const ENTRY_LEN: usize = 32;

/// Deterministic GUID for the Block Allocation Table region.
pub const BAT_REGION_GUID: Uuid = uuid!("2dc27766-f623-4200-9d64-115e9bfd4a08");
/// Deterministic GUID for the metadata region.
pub const METADATA_REGION_GUID: Uuid = uuid!("8b7ca206-4790-4b9a-b8fe-575f050f886e");

/// One entry in a region table: identifies a region by GUID and gives its
/// file offset and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionEntry {
    pub guid: Uuid,
    pub file_offset: u64,
    pub length: u32,
    pub required: bool,
}

/// The region table: lists the BAT and metadata regions with deterministic
/// GUIDs and fixed offsets for the default layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTable {
    pub entries: Vec<RegionEntry>,
}

impl RegionTable {
    #[must_use]
    pub fn default_layout() -> Self {
        Self {
            entries: vec![
                RegionEntry {
                    guid: BAT_REGION_GUID,
                    file_offset: crate::layout::BAT_OFFSET,
                    length: crate::layout::BAT_REGION_SIZE as u32,
                    required: true,
                },
                RegionEntry {
                    guid: METADATA_REGION_GUID,
                    file_offset: crate::layout::METADATA_OFFSET,
                    length: crate::layout::METADATA_REGION_SIZE as u32,
                    required: true,
                },
            ],
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; REGION_TABLE_SIZE as usize] {
        let mut buf = [0u8; REGION_TABLE_SIZE as usize];
        buf[0..4].copy_from_slice(SIGNATURE);
        buf[8..12].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for (i, entry) in self.entries.iter().enumerate() {
            let base = HEADER_LEN + i * ENTRY_LEN;
            buf[base..base + 16].copy_from_slice(entry.guid.as_bytes());
            buf[base + 16..base + 24].copy_from_slice(&entry.file_offset.to_le_bytes());
            buf[base + 24..base + 28].copy_from_slice(&entry.length.to_le_bytes());
            let flags: u32 = u32::from(entry.required);
            buf[base + 28..base + 32].copy_from_slice(&flags.to_le_bytes());
        }

        let checksum = crc32c(&buf);
        buf[4..8].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < REGION_TABLE_SIZE as usize || &buf[0..4] != SIGNATURE {
            return None;
        }

        let stored_checksum = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let mut verify = buf[..REGION_TABLE_SIZE as usize].to_vec();
        verify[4..8].fill(0);
        if crc32c(&verify) != stored_checksum {
            return None;
        }

        let count = u32::from_le_bytes(buf[8..12].try_into().ok()?) as usize;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let base = HEADER_LEN + i * ENTRY_LEN;
            if base + ENTRY_LEN > buf.len() {
                return None;
            }
            let guid = Uuid::from_slice(&buf[base..base + 16]).ok()?;
            let file_offset = u64::from_le_bytes(buf[base + 16..base + 24].try_into().ok()?);
            let length = u32::from_le_bytes(buf[base + 24..base + 28].try_into().ok()?);
            let flags = u32::from_le_bytes(buf[base + 28..base + 32].try_into().ok()?);
            entries.push(RegionEntry {
                guid,
                file_offset,
                length,
                required: flags & 1 != 0,
            });
        }
        Some(Self { entries })
    }

    #[must_use]
    pub fn find(&self, guid: Uuid) -> Option<&RegionEntry> {
        self.entries.iter().find(|e| e.guid == guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_default_layout() {
        let table = RegionTable::default_layout();
        let bytes = table.to_bytes();
        let parsed = RegionTable::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, table);
        assert!(parsed.find(BAT_REGION_GUID).is_some());
        assert!(parsed.find(METADATA_REGION_GUID).is_some());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let table = RegionTable::default_layout();
        let mut bytes = table.to_bytes();
        bytes[500] ^= 0xff;
        assert!(RegionTable::from_bytes(&bytes).is_none());
    }
}
