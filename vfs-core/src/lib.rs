//! Virtual File System Core
//!
//! Pluggable VFS core (spec components C, D, E): a mount registry with
//! longest-prefix path routing, a capability-set driver model, and an
//! ext2-like reference driver, sitting above the block device and cache
//! layers (`vfs-block`, `vfs-cache`).

#![no_std]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod exfat;
pub mod ext2;
pub mod fat12;
pub mod iso9660;
pub mod mount;
pub mod path;
pub mod stat;
pub mod vfs;

pub use clock::{Clock, FixedClock};
pub use driver::{DirHandleOps, FileHandleOps, FsDriver, MountFlags, MountState, OpenFlags, SeekWhence};
pub use error::{ReadDirOutcome, VfsError, VfsResult};
pub use exfat::ExfatDriver;
pub use ext2::Ext2Driver;
pub use fat12::Fat12Driver;
pub use iso9660::Iso9660Driver;
pub use mount::{MountEntry, MountRegistry};
pub use stat::{Attributes, DirEntry, FileKind, Stat, StatFs, Timestamps};
pub use vfs::{DirHandle, Handle, Vfs};
