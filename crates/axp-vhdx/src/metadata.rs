use crate::layout::StorageType;
use uuid::{uuid, Uuid};

const TABLE_SIGNATURE: &[u8; 8] = b"metadata";
const TABLE_HEADER_LEN: usize = 32;
const ENTRY_LEN: usize = 32;
const ENTRY_COUNT: usize = 5;
const ITEM_DATA_BASE: usize = TABLE_HEADER_LEN + ENTRY_COUNT * ENTRY_LEN;

const FILE_PARAMETERS_GUID: Uuid = uuid!("caa16737-fa36-4d43-b3b6-33f0aa44e76b");
const VIRTUAL_DISK_SIZE_GUID: Uuid = uuid!("2fa54224-cd1b-4876-b211-5dbed83bf4b8");
const LOGICAL_SECTOR_SIZE_GUID: Uuid = uuid!("8141bf1d-a96f-4709-ba47-f233a8faab5f");
const PHYSICAL_SECTOR_SIZE_GUID: Uuid = uuid!("cda348c7-445d-4471-9cc9-e9885251c556");
const PAGE83_DATA_GUID: Uuid = uuid!("beca12ab-b2e6-4523-93ef-c309e000c746");

/// The five fixed metadata items written at `create` time. The loop that
/// writes them always runs exactly five iterations, with Page-83 Data
/// assigned at the fifth (index 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTable {
    pub storage_type: StorageType,
    pub block_size: u32,
    pub virtual_disk_size: u64,
    pub logical_sector_size: u32,
    pub physical_sector_size: u32,
    pub page83_data: Uuid,
}

impl MetadataTable {
    #[must_use]
    pub fn new(
        storage_type: StorageType,
        virtual_disk_size: u64,
        block_size: u32,
        logical_sector_size: u32,
    ) -> Self {
        Self {
            storage_type,
            block_size,
            virtual_disk_size,
            logical_sector_size,
            physical_sector_size: logical_sector_size,
            page83_data: Uuid::new_v4(),
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; crate::layout::METADATA_REGION_SIZE as usize];
        buf[0..8].copy_from_slice(TABLE_SIGNATURE);
        buf[10..12].copy_from_slice(&(ENTRY_COUNT as u16).to_le_bytes());

        let file_params_flags: u32 = match self.storage_type {
            StorageType::Fixed => 1,
            StorageType::Dynamic => 0,
            StorageType::Differencing => 2,
        };

        let items: [(Uuid, Vec<u8>); ENTRY_COUNT] = [
            (
                FILE_PARAMETERS_GUID,
                [self.block_size.to_le_bytes(), file_params_flags.to_le_bytes()].concat(),
            ),
            (VIRTUAL_DISK_SIZE_GUID, self.virtual_disk_size.to_le_bytes().to_vec()),
            (
                LOGICAL_SECTOR_SIZE_GUID,
                self.logical_sector_size.to_le_bytes().to_vec(),
            ),
            (
                PHYSICAL_SECTOR_SIZE_GUID,
                self.physical_sector_size.to_le_bytes().to_vec(),
            ),
            (PAGE83_DATA_GUID, self.page83_data.as_bytes().to_vec()),
        ];

        let mut data_cursor = ITEM_DATA_BASE;
        for (i, (guid, data)) in items.iter().enumerate() {
            let entry_base = TABLE_HEADER_LEN + i * ENTRY_LEN;
            buf[entry_base..entry_base + 16].copy_from_slice(guid.as_bytes());
            buf[entry_base + 16..entry_base + 20].copy_from_slice(&(data_cursor as u32).to_le_bytes());
            buf[entry_base + 20..entry_base + 24].copy_from_slice(&(data.len() as u32).to_le_bytes());

            buf[data_cursor..data_cursor + data.len()].copy_from_slice(data);
            data_cursor += data.len();
        }

        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < ITEM_DATA_BASE || &buf[0..8] != TABLE_SIGNATURE {
            return None;
        }
        let entry_count = u16::from_le_bytes(buf[10..12].try_into().ok()?) as usize;
        if entry_count != ENTRY_COUNT {
            return None;
        }

        let mut block_size = None;
        let mut storage_type = None;
        let mut virtual_disk_size = None;
        let mut logical_sector_size = None;
        let mut physical_sector_size = None;
        let mut page83_data = None;

        for i in 0..ENTRY_COUNT {
            let entry_base = TABLE_HEADER_LEN + i * ENTRY_LEN;
            let guid = Uuid::from_slice(&buf[entry_base..entry_base + 16]).ok()?;
            let offset = u32::from_le_bytes(buf[entry_base + 16..entry_base + 20].try_into().ok()?) as usize;
            let length = u32::from_le_bytes(buf[entry_base + 20..entry_base + 24].try_into().ok()?) as usize;
            let data = buf.get(offset..offset + length)?;

            if guid == FILE_PARAMETERS_GUID {
                block_size = Some(u32::from_le_bytes(data[0..4].try_into().ok()?));
                let flags = u32::from_le_bytes(data[4..8].try_into().ok()?);
                storage_type = Some(match flags {
                    1 => StorageType::Fixed,
                    2 => StorageType::Differencing,
                    _ => StorageType::Dynamic,
                });
            } else if guid == VIRTUAL_DISK_SIZE_GUID {
                virtual_disk_size = Some(u64::from_le_bytes(data.try_into().ok()?));
            } else if guid == LOGICAL_SECTOR_SIZE_GUID {
                logical_sector_size = Some(u32::from_le_bytes(data.try_into().ok()?));
            } else if guid == PHYSICAL_SECTOR_SIZE_GUID {
                physical_sector_size = Some(u32::from_le_bytes(data.try_into().ok()?));
            } else if guid == PAGE83_DATA_GUID {
                page83_data = Some(Uuid::from_slice(data).ok()?);
            }
        }

        Some(Self {
            storage_type: storage_type?,
            block_size: block_size?,
            virtual_disk_size: virtual_disk_size?,
            logical_sector_size: logical_sector_size?,
            physical_sector_size: physical_sector_size?,
            page83_data: page83_data?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let table = MetadataTable::new(StorageType::Dynamic, 100 << 20, 2 << 20, 4096);
        let bytes = table.to_bytes();
        let parsed = MetadataTable::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn writes_exactly_five_entries() {
        let table = MetadataTable::new(StorageType::Fixed, 1 << 20, 1 << 20, 512);
        let bytes = table.to_bytes();
        let count = u16::from_le_bytes(bytes[10..12].try_into().unwrap());
        assert_eq!(count, 5);
    }
}
