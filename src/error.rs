//! Error taxonomy shared by every core handler.

use thiserror::Error;

/// Failure kinds surfaced to the kernel bridge. Every core operation either
/// fully succeeds or returns one of these; device and allocation errors
/// bubble out unchanged.
#[derive(Debug, Error)]
pub enum SffsError {
    /// Caller violated a handler precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Image block size is unsupported (zero, not a power of two, too small
    /// for an inode entry, or larger than the host page size).
    #[error("unsupported block size: {0}")]
    InvalidBlockSize(u32),

    /// Layout self-consistency check failed while initializing or mounting.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Transient allocation failure.
    #[error("cannot allocate memory")]
    MemAlloc,

    /// On-disk invariant violation discovered mid-operation. Fatal by
    /// convention; the caller should remount read-only.
    #[error("file system is corrupted: {0}")]
    Corrupted(&'static str),

    /// No free inode or data block satisfies the request.
    #[error("no free space")]
    NoSpace,

    #[error("device read failed")]
    DevRead(#[source] std::io::Error),

    #[error("device write failed")]
    DevWrite(#[source] std::io::Error),

    #[error("device seek failed")]
    DevSeek(#[source] std::io::Error),

    #[error("device stat failed")]
    DevStat(#[source] std::io::Error),

    /// Lookup found no such entry. Normal control flow for `insert`.
    #[error("no such entry")]
    NoEntry,

    /// Attempt to insert a directory entry that already exists.
    #[error("entry already exists")]
    EntryExists,
}

impl SffsError {
    /// Errno the FUSE bridge reports for this error.
    pub fn errno(&self) -> libc::c_int {
        match self {
            SffsError::InvalidArgument(_) => libc::EINVAL,
            SffsError::InvalidBlockSize(_) => libc::EINVAL,
            SffsError::Init(_) => libc::EIO,
            SffsError::MemAlloc => libc::ENOMEM,
            SffsError::Corrupted(_) => libc::EIO,
            SffsError::NoSpace => libc::ENOSPC,
            SffsError::DevRead(_)
            | SffsError::DevWrite(_)
            | SffsError::DevSeek(_)
            | SffsError::DevStat(_) => libc::EIO,
            SffsError::NoEntry => libc::ENOENT,
            SffsError::EntryExists => libc::EEXIST,
        }
    }
}

impl From<bincode::error::EncodeError> for SffsError {
    fn from(_: bincode::error::EncodeError) -> Self {
        SffsError::Corrupted("wire encoding failed")
    }
}

impl From<bincode::error::DecodeError> for SffsError {
    fn from(_: bincode::error::DecodeError) -> Self {
        SffsError::Corrupted("wire decoding failed")
    }
}

pub type SffsResult<T> = Result<T, SffsError>;
