//! Tunable policy constants (ambient stack)
//!
//! Everything a format's own on-disk layout fixes (inode size, directory
//! entry header size, group descriptor size, ...) stays defined beside
//! the code that parses that layout. What lives here instead is the
//! handful of policy knobs this implementation chooses rather than reads
//! off a disk: limits a caller can hit regardless of which driver is
//! mounted, gathered in one place instead of scattered through the
//! modules that enforce them.

/// Longest absolute path accepted by [`crate::path::normalize`].
pub const MAX_PATH_LEN: usize = 256;

/// Upper bound on simultaneously registered driver types
/// ([`crate::mount::MountRegistry::register_driver`]).
pub const MAX_DRIVERS: usize = 16;

/// Longest fast-symlink target the ext2-like driver inlines directly
/// into an inode's block-pointer array instead of allocating a data
/// block for it.
pub const FAST_SYMLINK_MAX: usize = 60;

/// Maximum symlinks followed while resolving a single path before the
/// ext2-like driver gives up and reports a loop.
pub const SYMLINK_DEPTH_LIMIT: u32 = 8;
