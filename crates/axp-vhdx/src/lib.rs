//! VHDX virtual-disk container used to back persistent storage exposed to
//! the emulated Alpha system.
//!
//! Layout and checksum rules follow the Microsoft VHDX format (version 2):
//! duplicate headers, duplicate region tables, a circular log, a block
//! allocation table, and a metadata region, all little-endian.

mod bat;
mod error;
mod header;
mod layout;
mod log;
mod metadata;
mod region;

pub use bat::{BatEntry, BatState};
pub use error::{VhdxError, VhdxResult};
pub use header::VhdxHeader;
pub use layout::{StorageType, VhdxCreateFlags, VhdxOpenFlags};
pub use metadata::MetadataTable;
pub use region::{RegionEntry, RegionTable};

use axp_util::offset_io::{Backing, MemBacking};
use layout::*;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// An open VHDX virtual disk.
pub struct VhdxFile<B: Backing> {
    backing: B,
    header: VhdxHeader,
    region_table: RegionTable,
    metadata: MetadataTable,
    bat: Vec<BatEntry>,
    block_size: u32,
    logical_sector_size: u32,
    virtual_disk_size: u64,
    chunk_ratio: u64,
}

impl VhdxFile<File> {
    /// Creates a new VHDX file on disk per the layout in the external
    /// interface table: identifier, duplicate headers, duplicate region
    /// tables, log, BAT, metadata, then payload blocks.
    pub fn create(
        path: &Path,
        storage_type: StorageType,
        virtual_disk_size: u64,
        block_size: u32,
        logical_sector_size: u32,
        _flags: VhdxCreateFlags,
    ) -> VhdxResult<Self> {
        validate_create_params(virtual_disk_size, block_size, logical_sector_size)?;

        if path.exists() {
            return Err(VhdxError::FileExists);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|_| VhdxError::InvalidParameter)?;

        let mut vhdx =
            Self::lay_out_new(file, storage_type, virtual_disk_size, block_size, logical_sector_size)?;
        if let Err(e) = vhdx.write_initial_layout() {
            let _ = std::fs::remove_file(path);
            return Err(e);
        }
        Ok(vhdx)
    }

    /// Opens an existing VHDX file, replaying the log if the tail sequence
    /// number exceeds the head.
    pub fn open(path: &Path, _flags: VhdxOpenFlags) -> VhdxResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_| VhdxError::InvalidHandle)?;
        Self::open_backing(file)
    }
}

impl<B: Backing> VhdxFile<B> {
    fn lay_out_new(
        backing: B,
        storage_type: StorageType,
        virtual_disk_size: u64,
        block_size: u32,
        logical_sector_size: u32,
    ) -> VhdxResult<Self> {
        let chunk_ratio = chunk_ratio(logical_sector_size, block_size);
        let bat_entry_count = bat_entry_count(virtual_disk_size, block_size, chunk_ratio);
        let header = VhdxHeader::new();
        let region_table = RegionTable::default_layout();
        let metadata = MetadataTable::new(storage_type, virtual_disk_size, block_size, logical_sector_size);
        let bat = vec![BatEntry::not_present(); bat_entry_count as usize];

        Ok(Self {
            backing,
            header,
            region_table,
            metadata,
            bat,
            block_size,
            logical_sector_size,
            virtual_disk_size,
            chunk_ratio,
        })
    }

    fn write_initial_layout(&mut self) -> VhdxResult<()> {
        self.backing
            .set_len(PAYLOAD_OFFSET)
            .map_err(|_| VhdxError::WriteFault)?;

        let mut ident = [0u8; FILE_IDENTIFIER_SIZE as usize];
        ident[0..8].copy_from_slice(FILE_SIGNATURE);
        let creator_utf16 = {
            let mut buf = [0u16; 256];
            axp_util::ascii::ascii_to_utf16("axp21264 emulator", &mut buf).ok();
            buf
        };
        for (i, unit) in creator_utf16.iter().enumerate() {
            let bytes = unit.to_le_bytes();
            ident[8 + i * 2] = bytes[0];
            ident[8 + i * 2 + 1] = bytes[1];
        }
        self.backing
            .write_at(FILE_IDENTIFIER_OFFSET, &ident)
            .map_err(|_| VhdxError::WriteFault)?;

        self.header.sequence_number = 1;
        self.write_header(HEADER1_OFFSET)?;
        self.write_header(HEADER2_OFFSET)?;

        let region_bytes = self.region_table.to_bytes();
        self.backing
            .write_at(REGION_TABLE1_OFFSET, &region_bytes)
            .map_err(|_| VhdxError::WriteFault)?;
        self.backing
            .write_at(REGION_TABLE2_OFFSET, &region_bytes)
            .map_err(|_| VhdxError::WriteFault)?;

        self.write_bat()?;
        self.write_metadata()?;
        Ok(())
    }

    fn write_header(&mut self, offset: u64) -> VhdxResult<()> {
        let bytes = self.header.to_bytes_with_checksum();
        self.backing
            .write_at(offset, &bytes)
            .map_err(|_| VhdxError::WriteFault)
    }

    fn write_bat(&mut self) -> VhdxResult<()> {
        let mut buf = vec![0u8; BAT_REGION_SIZE as usize];
        for (i, entry) in self.bat.iter().enumerate() {
            let off = i * 8;
            if off + 8 > buf.len() {
                break;
            }
            buf[off..off + 8].copy_from_slice(&entry.to_raw().to_le_bytes());
        }
        self.backing
            .write_at(BAT_OFFSET, &buf)
            .map_err(|_| VhdxError::WriteFault)
    }

    fn write_metadata(&mut self) -> VhdxResult<()> {
        let bytes = self.metadata.to_bytes();
        self.backing
            .write_at(METADATA_OFFSET, &bytes)
            .map_err(|_| VhdxError::WriteFault)
    }

    fn open_backing(mut backing: B) -> VhdxResult<Self> {
        let mut h1 = [0u8; header::HEADER_SIZE as usize];
        let mut h2 = [0u8; header::HEADER_SIZE as usize];
        backing
            .read_at(HEADER1_OFFSET, &mut h1)
            .map_err(|_| VhdxError::InvalidFormat)?;
        backing
            .read_at(HEADER2_OFFSET, &mut h2)
            .map_err(|_| VhdxError::InvalidFormat)?;

        let parsed1 = VhdxHeader::from_bytes(&h1);
        let parsed2 = VhdxHeader::from_bytes(&h2);
        let header = match (parsed1, parsed2) {
            (Some(a), Some(b)) if b.sequence_number > a.sequence_number => b,
            (Some(a), Some(_)) => a,
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return Err(VhdxError::InvalidFormat),
        };

        let mut rt_bytes = [0u8; region::REGION_TABLE_SIZE as usize];
        backing
            .read_at(REGION_TABLE1_OFFSET, &mut rt_bytes)
            .map_err(|_| VhdxError::InvalidFormat)?;
        let region_table =
            RegionTable::from_bytes(&rt_bytes).ok_or(VhdxError::InvalidFormat)?;

        let mut meta_bytes = vec![0u8; METADATA_REGION_SIZE as usize];
        backing
            .read_at(METADATA_OFFSET, &mut meta_bytes)
            .map_err(|_| VhdxError::InvalidFormat)?;
        let metadata = MetadataTable::from_bytes(&meta_bytes).ok_or(VhdxError::InvalidFormat)?;

        let block_size = metadata.block_size;
        let logical_sector_size = metadata.logical_sector_size;
        let virtual_disk_size = metadata.virtual_disk_size;
        let chunk_ratio = chunk_ratio(logical_sector_size, block_size);
        let bat_entry_count = bat_entry_count(virtual_disk_size, block_size, chunk_ratio);

        let mut bat_bytes = vec![0u8; BAT_REGION_SIZE as usize];
        backing
            .read_at(BAT_OFFSET, &mut bat_bytes)
            .map_err(|_| VhdxError::InvalidFormat)?;
        let mut bat = Vec::with_capacity(bat_entry_count as usize);
        for i in 0..bat_entry_count as usize {
            let off = i * 8;
            let raw = u64::from_le_bytes(bat_bytes[off..off + 8].try_into().unwrap());
            bat.push(BatEntry::from_raw(raw));
        }

        let file_len = backing.len().map_err(|_| VhdxError::InvalidFormat)?;
        for entry in &bat {
            if let Some(offset) = entry.file_offset() {
                if offset >= file_len {
                    return Err(VhdxError::InvalidFormat);
                }
            }
        }

        log::replay_if_needed(&mut backing, &header)?;

        Ok(Self {
            backing,
            header,
            region_table,
            metadata,
            bat,
            block_size,
            logical_sector_size,
            virtual_disk_size,
            chunk_ratio,
        })
    }

    /// Reads `count` logical sectors starting at `lba` into `buf`.
    pub fn read_sector(&mut self, lba: u64, buf: &mut [u8], count: u32) -> VhdxResult<()> {
        let sector_size = self.logical_sector_size as u64;
        let needed = sector_size * count as u64;
        if buf.len() < needed as usize {
            return Err(VhdxError::InvalidParameter);
        }
        let start = lba * sector_size;
        if start + needed > self.virtual_disk_size {
            return Err(VhdxError::OutOfRange);
        }

        for s in 0..count as u64 {
            let sector_off_in_disk = start + s * sector_size;
            let dest = &mut buf[(s * sector_size) as usize..((s + 1) * sector_size) as usize];
            self.read_one_sector(sector_off_in_disk, dest)?;
        }
        Ok(())
    }

    fn read_one_sector(&mut self, disk_offset: u64, dest: &mut [u8]) -> VhdxResult<()> {
        let block_index = disk_offset / self.block_size as u64;
        let entry = self.bat.get(self.payload_bat_index(block_index)).copied();
        match entry {
            Some(e)
                if e.state() == BatState::PayloadBlockFullyPresent
                    || e.state() == BatState::PayloadBlockPartiallyPresent =>
            {
                let block_base = e.file_offset().ok_or(VhdxError::InvalidFormat)?;
                let offset_in_block = disk_offset % self.block_size as u64;
                self.backing
                    .read_at(block_base + offset_in_block, dest)
                    .map_err(|_| VhdxError::WriteFault)?;
            }
            _ => dest.fill(0),
        }
        Ok(())
    }

    /// Writes `count` logical sectors starting at `lba` from `buf`.
    pub fn write_sector(&mut self, lba: u64, buf: &[u8], count: u32) -> VhdxResult<()> {
        let sector_size = self.logical_sector_size as u64;
        let needed = sector_size * count as u64;
        if buf.len() < needed as usize {
            return Err(VhdxError::InvalidParameter);
        }
        let start = lba * sector_size;
        if start + needed > self.virtual_disk_size {
            return Err(VhdxError::OutOfRange);
        }

        for s in 0..count as u64 {
            let sector_off_in_disk = start + s * sector_size;
            let src = &buf[(s * sector_size) as usize..((s + 1) * sector_size) as usize];
            self.write_one_sector(sector_off_in_disk, src)?;
        }
        Ok(())
    }

    fn write_one_sector(&mut self, disk_offset: u64, src: &[u8]) -> VhdxResult<()> {
        let block_index = disk_offset / self.block_size as u64;
        let bat_index = self.payload_bat_index(block_index);
        let offset_in_block = disk_offset % self.block_size as u64;

        let entry = self.bat[bat_index];
        let flushed_file_offset = self.backing.len().map_err(|_| VhdxError::WriteFault)?;
        let block_base = match entry.file_offset() {
            Some(base) => base,
            None => {
                let base = flushed_file_offset;
                self.backing
                    .set_len(base + self.block_size as u64)
                    .map_err(|_| VhdxError::WriteFault)?;
                base
            }
        };
        let last_file_offset = self.backing.len().map_err(|_| VhdxError::WriteFault)?;
        let disk_file_offset = block_base + offset_in_block;

        // Log-before-mutate: the post-image of the payload sector is
        // durable before either the BAT or the payload itself is touched,
        // so a power failure between here and the writes below leaves a
        // replayable entry behind.
        self.commit_log_entry(disk_file_offset, flushed_file_offset, last_file_offset, src)?;

        if entry.file_offset().is_none() {
            self.bat[bat_index] = BatEntry::new(BatState::PayloadBlockFullyPresent, block_base);
            self.write_bat()?;
        }

        self.backing
            .write_at(disk_file_offset, src)
            .map_err(|_| VhdxError::WriteFault)?;
        self.backing.flush().map_err(|_| VhdxError::WriteFault)
    }

    /// Appends a log entry covering `data` at `file_offset`, then advances
    /// and persists the header's sequence number so `replay_if_needed` has
    /// a threshold to arbitrate against: an entry with a sequence number at
    /// or above the durable header's is one that hadn't been applied yet
    /// when the header was last written.
    fn commit_log_entry(
        &mut self,
        file_offset: u64,
        flushed_file_offset: u64,
        last_file_offset: u64,
        data: &[u8],
    ) -> VhdxResult<()> {
        let sequence_number = self.header.sequence_number + 1;
        let entry =
            log::LogEntry::new(sequence_number, file_offset, flushed_file_offset, last_file_offset, data);
        log::append(&mut self.backing, &entry)?;

        self.header.sequence_number = sequence_number;
        self.write_header(HEADER1_OFFSET)?;
        self.write_header(HEADER2_OFFSET)?;
        Ok(())
    }

    /// Index into the BAT for `block_index`, accounting for the interleaved
    /// sector-bitmap entries every `chunk_ratio` payload entries.
    fn payload_bat_index(&self, block_index: u64) -> usize {
        let bitmap_entries_before = block_index / self.chunk_ratio;
        (block_index + bitmap_entries_before) as usize
    }

    /// Virtual disk size in bytes, as recorded in the metadata region.
    #[must_use]
    pub fn virtual_disk_size(&self) -> u64 {
        self.virtual_disk_size
    }

    /// Closes the handle. VHDX close is idempotent at the API layer: the
    /// caller simply drops the handle; a second `close` on an already-closed
    /// handle is represented by `VhdxError::InvalidHandle` at the call site
    /// that tracks handle validity (outside this type, per the external
    /// interface contract).
    pub fn close(self) -> VhdxResult<()> {
        Ok(())
    }
}

impl VhdxFile<MemBacking> {
    /// Creates a VHDX image entirely in memory. Used by tests.
    pub fn create_in_memory(
        storage_type: StorageType,
        virtual_disk_size: u64,
        block_size: u32,
        logical_sector_size: u32,
    ) -> VhdxResult<Self> {
        validate_create_params(virtual_disk_size, block_size, logical_sector_size)?;
        let mut vhdx = Self::lay_out_new(
            MemBacking::new(),
            storage_type,
            virtual_disk_size,
            block_size,
            logical_sector_size,
        )?;
        vhdx.write_initial_layout()?;
        Ok(vhdx)
    }

    /// Reopens an in-memory image, taking ownership of its bytes.
    pub fn open_in_memory(bytes: Vec<u8>) -> VhdxResult<Self> {
        Self::open_backing(MemBacking(bytes))
    }
}

fn validate_create_params(
    virtual_disk_size: u64,
    block_size: u32,
    logical_sector_size: u32,
) -> VhdxResult<()> {
    if logical_sector_size != 512 && logical_sector_size != 4096 {
        return Err(VhdxError::InvalidParameter);
    }
    if !block_size.is_power_of_two() || block_size < (1 << 20) || block_size > (256 << 20) {
        return Err(VhdxError::InvalidParameter);
    }
    if virtual_disk_size == 0 || virtual_disk_size % u64::from(logical_sector_size) != 0 {
        return Err(VhdxError::InvalidParameter);
    }
    Ok(())
}

/// `chunk_ratio = 2^23 * sector_size / block_size`, the spacing between
/// interleaved sector-bitmap entries in the BAT.
#[must_use]
pub fn chunk_ratio(logical_sector_size: u32, block_size: u32) -> u64 {
    (1u64 << 23) * u64::from(logical_sector_size) / u64::from(block_size)
}

fn bat_entry_count(virtual_disk_size: u64, block_size: u32, chunk_ratio: u64) -> u64 {
    let payload_blocks = virtual_disk_size.div_ceil(u64::from(block_size));
    let bitmap_blocks = payload_blocks.div_ceil(chunk_ratio);
    payload_blocks + bitmap_blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ratio_matches_formula() {
        assert_eq!(chunk_ratio(4096, 2 << 20), (1u64 << 23) * 4096 / (2 << 20));
    }

    #[test]
    fn create_then_round_trip_sector() {
        let mut vhdx =
            VhdxFile::create_in_memory(StorageType::Fixed, 100 << 20, 2 << 20, 4096).unwrap();
        assert!(vhdx.virtual_disk_size() >= 100 << 20 || vhdx.virtual_disk_size() == 100 << 20);

        let mut zeros = vec![0u8; 4096];
        vhdx.read_sector(0, &mut zeros, 1).unwrap();
        assert!(zeros.iter().all(|&b| b == 0));

        let pattern: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
        vhdx.write_sector(1000, &pattern, 1).unwrap();
        let mut out = vec![0u8; 4096];
        vhdx.read_sector(1000, &mut out, 1).unwrap();
        assert_eq!(out, pattern);
    }

    #[test]
    fn write_past_virtual_disk_size_is_out_of_range() {
        let mut vhdx =
            VhdxFile::create_in_memory(StorageType::Fixed, 1 << 20, 2 << 20, 512).unwrap();
        let buf = vec![0u8; 512];
        let lba_past_end = (1 << 20) / 512;
        assert_eq!(
            vhdx.write_sector(lba_past_end, &buf, 1),
            Err(VhdxError::OutOfRange)
        );
    }

    #[test]
    fn rejects_bad_block_size() {
        let err = VhdxFile::create_in_memory(StorageType::Fixed, 100 << 20, 3 << 20, 4096);
        assert_eq!(err.err(), Some(VhdxError::InvalidParameter));
    }

    #[test]
    fn reopen_after_close_preserves_written_data() {
        let mut vhdx =
            VhdxFile::create_in_memory(StorageType::Fixed, 50 << 20, 2 << 20, 4096).unwrap();
        let pattern: Vec<u8> = (0..4096).map(|i| ((i * 7) % 256) as u8).collect();
        vhdx.write_sector(500, &pattern, 1).unwrap();

        let bytes = vhdx.backing.0.clone();
        vhdx.close().unwrap();

        let mut reopened = VhdxFile::open_in_memory(bytes).unwrap();
        let mut out = vec![0u8; 4096];
        reopened.read_sector(500, &mut out, 1).unwrap();
        assert_eq!(out, pattern);
    }
}
