//! Block-granularity I/O against the backing image file.
//!
//! Two addressing modes: absolute (block index from the start of the image)
//! and data-relative (index from the start of the data region). Block 0 is
//! the boot area and is never written. Every write is followed by a durable
//! flush of the image handle until a write-back cache is introduced.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{SffsError, SffsResult};
use crate::fs::blk32;

pub struct Device {
    file: File,
    block_size: u32,
    data_start: blk32,
    #[cfg(test)]
    pub(crate) fail_next_writes: std::cell::Cell<Option<u32>>,
}

impl Device {
    /// Open an existing image for reading and writing. Geometry is unknown
    /// until [`set_geometry`](Device::set_geometry) is called with the values
    /// recorded in the superblock.
    pub fn open<P: AsRef<Path>>(path: P) -> SffsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(SffsError::DevStat)?;
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: File) -> Self {
        Device {
            file,
            block_size: 0,
            data_start: 0,
            #[cfg(test)]
            fail_next_writes: std::cell::Cell::new(None),
        }
    }

    /// Record the block size and the first data block, both taken from the
    /// superblock. Readers must use the recorded fields rather than
    /// recomputing them.
    pub fn set_geometry(&mut self, block_size: u32, data_start: blk32) {
        self.block_size = block_size;
        self.data_start = data_start;
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Read `data.len() / block_size` whole blocks starting at the absolute
    /// block `block`.
    pub fn read_blk(&self, block: blk32, data: &mut [u8]) -> SffsResult<()> {
        let offset = block as u64 * self.block_size as u64;
        self.file
            .read_exact_at(data, offset)
            .map_err(SffsError::DevRead)
    }

    /// Write whole blocks starting at the absolute block `block`, then flush.
    /// Block 0 is reserved for the boot region.
    pub fn write_blk(&self, block: blk32, data: &[u8]) -> SffsResult<()> {
        if block == 0 {
            return Err(SffsError::InvalidArgument("write into the boot block"));
        }
        self.checked_write(data, block as u64 * self.block_size as u64)
    }

    /// Translate a data-relative block index to an absolute one. The offset
    /// covers the boot reservation plus the three metadata regions, as
    /// recorded in the superblock's first-data-block field.
    pub fn data_to_abs(&self, block: blk32) -> blk32 {
        self.data_start + block
    }

    /// Translate an absolute block index back into the data region.
    pub fn abs_to_data(&self, block: blk32) -> blk32 {
        block - self.data_start
    }

    /// Byte-granular read used only for the superblock window, which sits at
    /// a fixed byte offset regardless of the block size.
    pub fn read_at(&self, offset: u64, data: &mut [u8]) -> SffsResult<()> {
        self.file
            .read_exact_at(data, offset)
            .map_err(SffsError::DevRead)
    }

    /// Byte-granular write for the superblock window.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> SffsResult<()> {
        self.checked_write(data, offset)
    }

    fn checked_write(&self, data: &[u8], offset: u64) -> SffsResult<()> {
        #[cfg(test)]
        if let Some(left) = self.fail_next_writes.get() {
            if left == 0 {
                self.fail_next_writes.set(None);
                return Err(SffsError::DevWrite(std::io::Error::from_raw_os_error(
                    libc::EIO,
                )));
            }
            self.fail_next_writes.set(Some(left - 1));
        }
        self.file
            .write_all_at(data, offset)
            .map_err(SffsError::DevWrite)?;
        self.file.sync_data().map_err(SffsError::DevWrite)
    }
}

/// Block size of the file system holding `path`, the "device" the image
/// lives on.
pub fn host_block_size<P: AsRef<Path>>(path: P) -> SffsResult<u32> {
    let cpath = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|_| SffsError::InvalidArgument("path contains a NUL byte"))?;
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statfs(cpath.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(SffsError::DevStat(std::io::Error::last_os_error()));
    }
    Ok(stat.f_bsize as u32)
}

pub fn page_size() -> u32 {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u32 }
}
