//! Backing store abstraction and single-block transfers
//!
//! The cache never touches a file directly: it opens backing files through
//! a [`BackingStore`] and moves whole blocks with [`load_block`] and
//! [`store_block`], which are the only places alignment rules are applied.

use crate::raw_io::{AlignedBuffer, RawFile};
use blockcache_common::{Error, FileIdentity, Result};
use std::io::SeekFrom;
use std::path::Path;

/// An open backing file
pub trait BackingFile: Send {
    /// Stable identity of the file (device + inode)
    fn identity(&self) -> Result<FileIdentity>;

    /// Current on-disk length
    fn len(&self) -> Result<u64>;

    /// Positioned read; returns fewer bytes than requested only at end of file
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Positioned write
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;

    /// Reposition the file cursor
    fn seek(&self, pos: SeekFrom) -> Result<u64>;

    /// Truncate or extend the file
    fn set_len(&self, size: u64) -> Result<()>;

    /// Flush file data to stable storage
    fn sync(&self) -> Result<()>;
}

/// Opens backing files by path
pub trait BackingStore: Send {
    fn open(&self, path: &Path) -> Result<Box<dyn BackingFile>>;
}

/// Backing store over the local filesystem, using [`RawFile`]
#[derive(Debug, Clone, Copy)]
pub struct DirectStore {
    direct_io: bool,
}

impl DirectStore {
    pub fn new(direct_io: bool) -> Self {
        Self { direct_io }
    }
}

impl Default for DirectStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BackingStore for DirectStore {
    fn open(&self, path: &Path) -> Result<Box<dyn BackingFile>> {
        Ok(Box::new(RawFile::open(path, self.direct_io)?))
    }
}

impl BackingFile for RawFile {
    fn identity(&self) -> Result<FileIdentity> {
        RawFile::identity(self)
    }

    fn len(&self) -> Result<u64> {
        RawFile::len(self)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        RawFile::read_at(self, offset, buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        RawFile::write_at(self, offset, buf)
    }

    fn seek(&self, pos: SeekFrom) -> Result<u64> {
        RawFile::seek(self, pos)
    }

    fn set_len(&self, size: u64) -> Result<()> {
        RawFile::set_len(self, size)
    }

    fn sync(&self) -> Result<()> {
        self.sync_data()
    }
}

fn check_block_offset(offset: u64, block_size: usize) -> Result<()> {
    if offset % block_size as u64 != 0 {
        return Err(Error::Alignment(format!(
            "block offset {} is not a multiple of block size {}",
            offset, block_size
        )));
    }
    Ok(())
}

/// Read one whole block at `offset` into `buf`
///
/// Returns the number of bytes that came from the file. A short or empty
/// read means end of file; the rest of the buffer is zeroed.
pub fn load_block(file: &dyn BackingFile, offset: u64, buf: &mut AlignedBuffer) -> Result<usize> {
    check_block_offset(offset, buf.len())?;

    let n = file.read_at(offset, buf.as_mut_slice())?;
    if n < buf.len() {
        buf.as_mut_slice()[n..].fill(0);
    }
    Ok(n)
}

/// Write one whole block at `offset`
///
/// Anything short of the full block is a failure.
pub fn store_block(file: &dyn BackingFile, offset: u64, buf: &AlignedBuffer) -> Result<()> {
    check_block_offset(offset, buf.len())?;

    let n = file.write_at(offset, buf.as_slice())?;
    if n != buf.len() {
        return Err(Error::ShortTransfer {
            op: "pwrite",
            offset,
            done: n,
            expected: buf.len(),
        });
    }
    Ok(())
}
