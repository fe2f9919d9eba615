//! Offset-addressed storage: the primitive the VHDX layer uses to read and
//! write fixed-size regions without tracking a stream cursor.
//!
//! Grounded on the `VirtualDisk` backing-store abstraction used to decouple
//! an on-disk container format from its backing store (a real file in
//! production, an in-memory buffer in tests).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// A source of random-access storage, addressed by absolute byte offset.
pub trait Backing {
    /// Reads exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `buf` starting at `offset`, growing the backing store if needed.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Current size of the backing store in bytes.
    fn len(&mut self) -> io::Result<u64>;

    /// Grows or truncates the backing store to exactly `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Flushes any buffered writes to stable storage.
    fn flush(&mut self) -> io::Result<()>;
}

impl Backing for File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}

/// In-memory backing store. Used by tests, and by any caller that wants a
/// VHDX image entirely in RAM.
#[derive(Debug, Default, Clone)]
pub struct MemBacking(pub Vec<u8>);

impl MemBacking {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }
}

impl Backing for MemBacking {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.0.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of in-memory backing store",
            ));
        }
        buf.copy_from_slice(&self.0[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.0.len() {
            self.0.resize(end, 0);
        }
        self.0[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.0.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.0.resize(len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_backing_round_trip() {
        let mut backing = MemBacking::new();
        backing.set_len(4096).unwrap();
        let pattern: Vec<u8> = (0..512).map(|i| (i & 0xff) as u8).collect();
        backing.write_at(1000, &pattern).unwrap();
        let mut out = vec![0u8; 512];
        backing.read_at(1000, &mut out).unwrap();
        assert_eq!(out, pattern);
    }

    #[test]
    fn mem_backing_grows_on_write_past_end() {
        let mut backing = MemBacking::new();
        backing.write_at(100, &[1, 2, 3]).unwrap();
        assert_eq!(backing.len().unwrap(), 103);
    }

    #[test]
    fn mem_backing_rejects_read_past_end() {
        let mut backing = MemBacking::new();
        backing.set_len(10).unwrap();
        let mut buf = [0u8; 4];
        assert!(backing.read_at(8, &mut buf).is_err());
    }
}
