//! Error taxonomy
//!
//! A single closed set of error codes crosses every layer of the core.
//! Driver-local errors are translated into this set at the driver-to-VFS
//! boundary (§7); nothing upstream of that boundary ever inspects a
//! driver-private code.

use core::fmt;

/// The VFS error taxonomy. Deliberately closed: adding a variant is a
/// breaking change to every driver's translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    Success,
    NotFound,
    Exists,
    IoError,
    NoSpace,
    InvalidArg,
    NotDirectory,
    NotFile,
    IsDirectory,
    NotEmpty,
    ReadOnly,
    Unsupported,
    Permission,
    Corrupted,
    Busy,
    Unknown,
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VfsError::Success => "success",
            VfsError::NotFound => "no such file or directory",
            VfsError::Exists => "file exists",
            VfsError::IoError => "I/O error",
            VfsError::NoSpace => "no space left on device",
            VfsError::InvalidArg => "invalid argument",
            VfsError::NotDirectory => "not a directory",
            VfsError::NotFile => "not a regular file",
            VfsError::IsDirectory => "is a directory",
            VfsError::NotEmpty => "directory not empty",
            VfsError::ReadOnly => "read-only filesystem",
            VfsError::Unsupported => "operation not supported",
            VfsError::Permission => "permission denied",
            VfsError::Corrupted => "filesystem corrupted",
            VfsError::Busy => "resource busy",
            VfsError::Unknown => "unknown error",
        };
        write!(f, "{}", s)
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

impl From<vfs_block::BlockDeviceError> for VfsError {
    fn from(e: vfs_block::BlockDeviceError) -> Self {
        use vfs_block::BlockDeviceError as B;
        match e {
            B::NotFound => VfsError::NotFound,
            B::OutOfRange => VfsError::InvalidArg,
            B::InvalidBufferSize => VfsError::InvalidArg,
            B::ReadError | B::WriteError | B::HardwareError => VfsError::IoError,
            B::ReadOnly => VfsError::ReadOnly,
            B::NotReady => VfsError::Busy,
        }
    }
}

impl From<vfs_cache::CacheError> for VfsError {
    fn from(e: vfs_cache::CacheError) -> Self {
        match e {
            vfs_cache::CacheError::Device(d) => d.into(),
        }
    }
}

/// `readdir`'s end marker. Not part of the closed error set (§4.2): a
/// directory running out of entries is an ordinary, expected outcome, not
/// a failure.
#[derive(Debug, Clone)]
pub enum ReadDirOutcome {
    Entry(crate::stat::DirEntry),
    EndOfDirectory,
}
