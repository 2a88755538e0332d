//! Directory entry and status types (§3)

use alloc::string::String;
use bitflags::bitflags;

/// The kind of a directory entry's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Device,
}

bitflags! {
    /// Permission/visibility attributes reported on a directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u32 {
        const READ    = 0b0000_0001;
        const WRITE   = 0b0000_0010;
        const EXECUTE = 0b0000_0100;
        const HIDDEN  = 0b0000_1000;
        const SYSTEM  = 0b0001_0000;
        const ARCHIVE = 0b0010_0000;
    }
}

/// Timestamps, widened to 64-bit seconds-since-epoch (§12 open question:
/// the source's 32-bit field is widened by this implementation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamps {
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// External directory entry view: `(name, kind, size, attributes, timestamps)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub attributes: Attributes,
    pub timestamps: Timestamps,
}

/// Result of `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: FileKind,
    pub size: u64,
    pub attributes: Attributes,
    pub timestamps: Timestamps,
    pub link_count: u32,
}

/// Result of `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatFs {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub read_only: bool,
}
