//! Filesystem driver capability set (§4.3)
//!
//! A driver is a factory (`FsDriver`) producing, on `mount`, an opaque
//! [`MountState`] that exposes the per-mount operation set. Capabilities
//! the driver does not support simply keep their default `Unsupported`
//! implementation; only `mount`/`unmount` and the read-only operations
//! (`open`, `read`, `close`, `stat`, `opendir`, `readdir`, `closedir`,
//! `statfs`) are mandatory.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use bitflags::bitflags;

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::error::{ReadDirOutcome, VfsError, VfsResult};
use crate::stat::{Attributes, Stat, StatFs};

bitflags! {
    /// Flags recognized by `open` (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ     = 0b0000_0001;
        const WRITE    = 0b0000_0010;
        const APPEND   = 0b0000_0100;
        const CREATE   = 0b0000_1000;
        const TRUNCATE = 0b0001_0000;
    }
}

bitflags! {
    /// Flags recorded on a mount entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        const READ_ONLY = 0b0000_0001;
        const SYNC      = 0b0000_0010;
    }
}

/// `seek` reference point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

/// A registered driver type: a factory for per-mount state. One instance
/// per filesystem type, shared across every mount of that type.
pub trait FsDriver: Send + Sync {
    /// The name this driver is registered under, e.g. `"ext2"`.
    fn name(&self) -> &str;

    /// Brings a device under management, returning the opaque state that
    /// backs every subsequent operation on the mount.
    fn mount(
        &self,
        device: Arc<dyn BlockDevice>,
        cache: Arc<BlockCache>,
        device_id: u64,
        flags: MountFlags,
    ) -> VfsResult<Box<dyn MountState>>;
}

/// Per-mount operation set. All paths passed in are already relativized
/// to this mount (§4.3). Optional capabilities default to `Unsupported`;
/// a driver overrides only what it implements.
pub trait MountState: Send + Sync {
    /// Releases driver-held resources. Called with no live handles left
    /// against the mount.
    fn unmount(&self) -> VfsResult<()>;

    fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Box<dyn FileHandleOps>>;
    fn stat(&self, path: &str) -> VfsResult<Stat>;
    fn statfs(&self) -> VfsResult<StatFs>;
    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirHandleOps>>;

    fn mkdir(&self, _path: &str, _attrs: Attributes) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
    fn rmdir(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
    fn unlink(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
    fn rename(&self, _old: &str, _new: &str) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
    fn link(&self, _old: &str, _new: &str) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
    fn symlink(&self, _target: &str, _link_path: &str) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
    fn readlink(&self, _path: &str) -> VfsResult<String> {
        Err(VfsError::Unsupported)
    }
    fn chmod(&self, _path: &str, _attrs: Attributes) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    fn getxattr(&self, _path: &str, _name: &str) -> VfsResult<alloc::vec::Vec<u8>> {
        Err(VfsError::Unsupported)
    }
    fn setxattr(&self, _path: &str, _name: &str, _value: &[u8]) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
    fn listxattr(&self, _path: &str) -> VfsResult<alloc::vec::Vec<String>> {
        Err(VfsError::Unsupported)
    }
    fn removexattr(&self, _path: &str, _name: &str) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }

    fn sync(&self) -> VfsResult<()> {
        Ok(())
    }

    /// Declares whether same-mount `rename` may be performed as an
    /// in-place directory-entry move (§9 open question: the core only
    /// takes the in-place path for drivers that opt in here; otherwise
    /// it falls back to add-new/remove-old/fix-`..`).
    fn supports_inplace_rename(&self) -> bool {
        false
    }
}

/// Per-handle file operations. Only `read` is mandatory (the read-only
/// capability set); `write`/`seek`/`tell`/`truncate` default to
/// `Unsupported` so a driver can expose, say, an append-only stream.
pub trait FileHandleOps: Send + Sync {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    fn write(&mut self, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::Unsupported)
    }
    fn seek(&mut self, _offset: i64, _whence: SeekWhence) -> VfsResult<u64> {
        Err(VfsError::Unsupported)
    }
    fn tell(&self) -> VfsResult<u64> {
        Err(VfsError::Unsupported)
    }
    fn flush(&mut self) -> VfsResult<()> {
        Ok(())
    }
    fn truncate(&mut self, _size: u64) -> VfsResult<()> {
        Err(VfsError::Unsupported)
    }
    fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}

/// Per-handle directory operations.
pub trait DirHandleOps: Send + Sync {
    fn readdir(&mut self) -> VfsResult<ReadDirOutcome>;

    fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}
