//! Platform-specific raw file I/O
//!
//! Provides direct file access bypassing the OS page cache:
//! - Linux: O_DIRECT flag
//! - macOS: F_NOCACHE fcntl
//!
//! Every transfer must use an offset, length and buffer address aligned to
//! [`ALIGNMENT`]; [`AlignedBuffer`] provides memory that satisfies this.

use blockcache_common::{ALIGNMENT, Error, FileIdentity, Result};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

/// Raw file handle with optional direct I/O
pub struct RawFile {
    file: File,
    path: PathBuf,
    direct_io: bool,
}

impl RawFile {
    /// Open an existing file for reading and writing
    ///
    /// With `direct_io` set, the OS page cache is bypassed for every
    /// transfer on the returned handle.
    pub fn open(path: impl AsRef<Path>, direct_io: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.read(true).write(true);

        // O_DIRECT bypasses page cache on Linux
        #[cfg(target_os = "linux")]
        if direct_io {
            options.custom_flags(libc::O_DIRECT);
        }

        let file = options.open(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;

        // On macOS, use F_NOCACHE after opening
        #[cfg(target_os = "macos")]
        if direct_io {
            use std::os::unix::io::AsRawFd;
            let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
            if ret == -1 {
                return Err(Error::Open {
                    path,
                    source: io::Error::last_os_error(),
                });
            }
        }

        Ok(Self {
            file,
            path,
            direct_io,
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the OS page cache is bypassed
    pub fn is_direct(&self) -> bool {
        self.direct_io
    }

    /// Resolve the (device, inode) identity of the open file
    pub fn identity(&self) -> Result<FileIdentity> {
        let metadata = self.file.metadata().map_err(|source| Error::Identity {
            path: self.path.clone(),
            source,
        })?;
        Ok(FileIdentity::new(metadata.dev(), metadata.ino()))
    }

    /// Current on-disk length of the file
    pub fn len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|source| Error::Identity {
                path: self.path.clone(),
                source,
            })
    }

    /// Read data at the given offset
    ///
    /// Stops early only at end of file; the returned count may then be
    /// smaller than `buf.len()`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        check_alignment(offset, buf)?;

        let mut done = 0;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::io("pread", offset, e)),
            }
        }
        Ok(done)
    }

    /// Write data at the given offset
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        check_alignment(offset, buf)?;

        let mut done = 0;
        while done < buf.len() {
            match self.file.write_at(&buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::io("pwrite", offset, e)),
            }
        }
        Ok(done)
    }

    /// Reposition the file cursor
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut file = &self.file;
        file.seek(pos).map_err(|e| {
            let offset = match pos {
                SeekFrom::Start(n) => n,
                _ => 0,
            };
            Error::io("lseek", offset, e)
        })
    }

    /// Truncate or extend the file to `size` bytes
    pub fn set_len(&self, size: u64) -> Result<()> {
        self.file
            .set_len(size)
            .map_err(|e| Error::io("ftruncate", size, e))
    }

    /// Sync data only (not metadata) to disk
    pub fn sync_data(&self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| Error::io("fdatasync", 0, e))
    }
}

impl fmt::Debug for RawFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFile")
            .field("path", &self.path)
            .field("direct_io", &self.direct_io)
            .finish()
    }
}

/// Check alignment requirements of a direct I/O transfer
pub fn check_alignment(offset: u64, buf: &[u8]) -> Result<()> {
    if offset % ALIGNMENT as u64 != 0 {
        return Err(Error::Alignment(format!(
            "offset {} is not aligned to {}",
            offset, ALIGNMENT
        )));
    }
    if buf.len() % ALIGNMENT != 0 {
        return Err(Error::Alignment(format!(
            "size {} is not aligned to {}",
            buf.len(),
            ALIGNMENT
        )));
    }
    if buf.as_ptr() as usize % ALIGNMENT != 0 {
        return Err(Error::Alignment(format!(
            "buffer address {:p} is not aligned to {}",
            buf.as_ptr(),
            ALIGNMENT
        )));
    }
    Ok(())
}

/// Aligned buffer for direct I/O operations
///
/// With O_DIRECT the buffer address must be aligned to the filesystem's
/// block size. The memory is released when the buffer is dropped, so early
/// returns on error paths never leak it.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer exclusively owns its allocation.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate a zeroed buffer of the given size aligned to [`ALIGNMENT`]
    pub fn new(size: usize) -> Result<Self> {
        Self::with_alignment(size, ALIGNMENT)
    }

    /// Allocate a zeroed buffer with custom alignment
    ///
    /// The size is rounded up to a multiple of the alignment.
    pub fn with_alignment(size: usize, alignment: usize) -> Result<Self> {
        let failed = || Error::Allocation { size, alignment };

        if size == 0 || alignment == 0 {
            return Err(failed());
        }
        let aligned_size = size.div_ceil(alignment).checked_mul(alignment).ok_or_else(failed)?;
        let layout = Layout::from_size_align(aligned_size, alignment).map_err(|_| failed())?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(failed)?;

        Ok(Self { ptr, layout })
    }

    /// Get the buffer as a slice
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Get the buffer as a mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid and uniquely borrowed through &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Get the buffer size
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Alignment of the buffer address
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Zero the whole buffer
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }

    /// Copy data into the buffer (pads with zeros if source is smaller)
    pub fn copy_from(&mut self, src: &[u8]) {
        let data = self.as_mut_slice();
        let copy_len = src.len().min(data.len());
        data[..copy_len].copy_from_slice(&src[..copy_len]);
        data[copy_len..].fill(0);
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .field("alignment", &self.alignment())
            .finish()
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for AlignedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_aligned_buffer() {
        let mut buf = AlignedBuffer::new(4096).unwrap();
        assert_eq!(buf.len(), 4096);
        assert_eq!(buf.as_slice().as_ptr() as usize % ALIGNMENT, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));

        buf.copy_from(b"hello");
        assert_eq!(&buf.as_slice()[..5], b"hello");

        buf.clear();
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_aligned_buffer_rounds_up() {
        let buf = AlignedBuffer::with_alignment(100, 512).unwrap();
        assert_eq!(buf.len(), 512);
        assert_eq!(buf.alignment(), 512);
    }

    #[test]
    fn test_aligned_buffer_rejects_zero() {
        let err = AlignedBuffer::new(0).unwrap_err();
        assert_eq!(err.kind(), blockcache_common::ErrorKind::AllocationFailure);
    }

    #[test]
    fn test_raw_file_read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![0u8; 8192]).unwrap();

        let file = RawFile::open(&path, false).unwrap();
        let mut buf = AlignedBuffer::new(4096).unwrap();
        buf.copy_from(b"test data pattern");
        assert_eq!(file.write_at(4096, buf.as_slice()).unwrap(), 4096);
        file.sync_data().unwrap();

        let mut out = AlignedBuffer::new(4096).unwrap();
        assert_eq!(file.read_at(4096, out.as_mut_slice()).unwrap(), 4096);
        assert!(out.as_slice().starts_with(b"test data pattern"));
    }

    #[test]
    fn test_raw_file_short_read_at_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, vec![7u8; 5000]).unwrap();

        let file = RawFile::open(&path, false).unwrap();
        let mut buf = AlignedBuffer::new(4096).unwrap();
        assert_eq!(file.read_at(4096, buf.as_mut_slice()).unwrap(), 904);
        assert_eq!(file.read_at(8192, buf.as_mut_slice()).unwrap(), 0);
    }

    #[test]
    fn test_raw_file_rejects_unaligned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unaligned.bin");
        std::fs::write(&path, vec![0u8; 8192]).unwrap();

        let file = RawFile::open(&path, false).unwrap();
        let mut buf = AlignedBuffer::new(8192).unwrap();

        assert!(matches!(
            file.read_at(100, &mut buf.as_mut_slice()[..4096]),
            Err(Error::Alignment(_))
        ));
        assert!(matches!(
            file.read_at(0, &mut buf.as_mut_slice()[..100]),
            Err(Error::Alignment(_))
        ));
        assert!(matches!(
            file.write_at(0, &buf.as_slice()[1..4097]),
            Err(Error::Alignment(_))
        ));
    }

    #[test]
    fn test_identity_shared_between_handles() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let first = RawFile::open(&a, false).unwrap();
        let second = RawFile::open(&a, false).unwrap();
        let other = RawFile::open(&b, false).unwrap();

        assert_eq!(first.identity().unwrap(), second.identity().unwrap());
        assert_ne!(first.identity().unwrap(), other.identity().unwrap());
        assert_eq!(first.len().unwrap(), 1);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let err = RawFile::open(dir.path().join("missing"), false).unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
    }

    #[test]
    fn test_direct_io_when_supported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("direct.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        // tmpfs and some overlay filesystems reject O_DIRECT
        let Ok(file) = RawFile::open(&path, true) else {
            return;
        };
        assert!(file.is_direct());

        let mut buf = AlignedBuffer::new(4096).unwrap();
        buf.copy_from(b"direct");
        assert_eq!(file.write_at(0, buf.as_slice()).unwrap(), 4096);

        let mut out = AlignedBuffer::new(4096).unwrap();
        assert_eq!(file.read_at(0, out.as_mut_slice()).unwrap(), 4096);
        assert!(out.as_slice().starts_with(b"direct"));
    }
}
