//! Mount registry (component D, §4.1)
//!
//! Holds the global set of registered driver types and the active mount
//! list, and performs longest-prefix path routing. A single `RwLock`
//! plays the role of `mount_registry_lock` in the lock hierarchy (§5):
//! readers take it only long enough to identify a target mount, writers
//! (register/mount/unmount) hold it across the whole structural change.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, RwLock};

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::config::MAX_DRIVERS;
use crate::driver::{FsDriver, MountFlags, MountState};
use crate::error::{VfsError, VfsResult};
use crate::path;

struct MountEntryInner {
    handle_count: usize,
    corrupted: bool,
}

/// One active mount. Shared via `Arc` so every handle bound to it can
/// outlive a concurrent registry mutation elsewhere in the table.
pub struct MountEntry {
    pub path: String,
    pub driver_name: String,
    pub state: Arc<dyn MountState>,
    pub device_id: Option<u64>,
    pub flags: MountFlags,
    inner: Mutex<MountEntryInner>,
}

impl MountEntry {
    fn new(path: String, driver_name: String, state: Arc<dyn MountState>, device_id: Option<u64>, flags: MountFlags) -> Self {
        MountEntry {
            path,
            driver_name,
            state,
            device_id,
            flags,
            inner: Mutex::new(MountEntryInner {
                handle_count: 0,
                corrupted: false,
            }),
        }
    }

    /// Increments the live-handle count (`open`, under `mount.lock`).
    pub fn acquire_handle(&self) {
        self.inner.lock().handle_count += 1;
    }

    /// Decrements the live-handle count (`close`, under `mount.lock`).
    pub fn release_handle(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.handle_count > 0);
        inner.handle_count = inner.handle_count.saturating_sub(1);
    }

    pub fn handle_count(&self) -> usize {
        self.inner.lock().handle_count
    }

    /// Latches the mount read-only after a `Corrupted` error, per §7:
    /// every subsequent mutation fails `ReadOnly` until unmount.
    pub fn mark_corrupted(&self) {
        self.inner.lock().corrupted = true;
    }

    pub fn is_corrupted(&self) -> bool {
        self.inner.lock().corrupted
    }

    /// Whether mutating operations against this mount must fail
    /// `ReadOnly`: either mounted read-only, or latched by corruption.
    pub fn effective_read_only(&self) -> bool {
        self.flags.contains(MountFlags::READ_ONLY) || self.is_corrupted()
    }
}

struct RegistryInner {
    drivers: Vec<(String, Arc<dyn FsDriver>)>,
    mounts: Vec<Arc<MountEntry>>,
}

/// Component D. One instance lives for the lifetime of the kernel; it is
/// established once at VFS init (§9) and safe to read without external
/// synchronization once `init` has returned.
pub struct MountRegistry {
    inner: RwLock<RegistryInner>,
}

impl MountRegistry {
    pub const fn new() -> Self {
        MountRegistry {
            inner: RwLock::new(RegistryInner {
                drivers: Vec::new(),
                mounts: Vec::new(),
            }),
        }
    }

    /// Registers a driver type. Fails `Exists` on a duplicate name,
    /// `NoSpace` if the driver table is full.
    pub fn register_driver(&self, driver: Arc<dyn FsDriver>) -> VfsResult<()> {
        let mut inner = self.inner.write();
        let name = driver.name();
        if inner.drivers.iter().any(|(n, _)| n == name) {
            return Err(VfsError::Exists);
        }
        if inner.drivers.len() >= MAX_DRIVERS {
            return Err(VfsError::NoSpace);
        }
        inner.drivers.push((String::from(name), driver));
        Ok(())
    }

    /// Mounts `driver_name` at `path`, backed by `device`. On failure, no
    /// mount entry is created.
    pub fn mount(
        &self,
        driver_name: &str,
        device: Arc<dyn BlockDevice>,
        cache: Arc<BlockCache>,
        device_id: u64,
        path: &str,
        flags: MountFlags,
    ) -> VfsResult<Arc<MountEntry>> {
        let normalized = path::normalize(path)?;
        let mut inner = self.inner.write();

        let driver = inner
            .drivers
            .iter()
            .find(|(n, _)| n == driver_name)
            .map(|(_, d)| d.clone())
            .ok_or(VfsError::NotFound)?;

        if inner.mounts.iter().any(|m| m.path == normalized) {
            return Err(VfsError::Exists);
        }

        let state: Arc<dyn MountState> = Arc::from(driver.mount(device, cache, device_id, flags)?);
        let entry = Arc::new(MountEntry::new(
            normalized,
            String::from(driver_name),
            state,
            Some(device_id),
            flags,
        ));
        inner.mounts.push(entry.clone());
        Ok(entry)
    }

    /// Unmounts `path`. Fails `Busy` if live handles remain, `NotFound`
    /// if nothing is mounted there.
    pub fn unmount(&self, path: &str) -> VfsResult<()> {
        let normalized = path::normalize(path)?;
        let mut inner = self.inner.write();

        let idx = inner
            .mounts
            .iter()
            .position(|m| m.path == normalized)
            .ok_or(VfsError::NotFound)?;

        if inner.mounts[idx].handle_count() > 0 {
            return Err(VfsError::Busy);
        }

        inner.mounts[idx].state.unmount()?;
        inner.mounts.remove(idx);
        Ok(())
    }

    /// Longest-prefix dispatch (§4.1): returns the matching mount and the
    /// path relativized to it.
    pub fn find_mount(&self, path: &str) -> VfsResult<(Arc<MountEntry>, String)> {
        let normalized = path::normalize(path)?;
        let inner = self.inner.read();

        let best = inner
            .mounts
            .iter()
            .filter(|m| path::is_mount_prefix(&m.path, &normalized))
            .max_by_key(|m| m.path.len())
            .cloned()
            .ok_or(VfsError::NotFound)?;

        let relative = path::relativize(&best.path, &normalized);
        Ok((best, relative))
    }

    /// Snapshot of every active mount, for `statfs`-all style introspection.
    pub fn list_mounts(&self) -> Vec<Arc<MountEntry>> {
        self.inner.read().mounts.clone()
    }

    pub fn driver_count(&self) -> usize {
        self.inner.read().drivers.len()
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DirHandleOps, FileHandleOps, OpenFlags};
    use crate::stat::{Stat, StatFs};
    use alloc::boxed::Box;
    use vfs_block::BlockDeviceError;

    struct NullDevice;
    impl BlockDevice for NullDevice {
        fn name(&self) -> &str {
            "null"
        }
        fn block_size(&self) -> usize {
            512
        }
        fn capacity_blocks(&self) -> u64 {
            0
        }
        fn read_blocks(&self, _lba: u64, _count: u32, _buf: &mut [u8]) -> Result<(), BlockDeviceError> {
            Err(BlockDeviceError::OutOfRange)
        }
        fn write_blocks(&self, _lba: u64, _count: u32, _buf: &[u8]) -> Result<(), BlockDeviceError> {
            Err(BlockDeviceError::ReadOnly)
        }
        fn sync(&self) -> Result<(), BlockDeviceError> {
            Ok(())
        }
    }

    struct StubMount;
    impl MountState for StubMount {
        fn unmount(&self) -> VfsResult<()> {
            Ok(())
        }
        fn open(&self, _path: &str, _flags: OpenFlags) -> VfsResult<Box<dyn FileHandleOps>> {
            Err(VfsError::Unsupported)
        }
        fn stat(&self, _path: &str) -> VfsResult<Stat> {
            Err(VfsError::Unsupported)
        }
        fn statfs(&self) -> VfsResult<StatFs> {
            Ok(StatFs::default())
        }
        fn opendir(&self, _path: &str) -> VfsResult<Box<dyn DirHandleOps>> {
            Err(VfsError::Unsupported)
        }
    }

    struct StubDriver(&'static str);
    impl FsDriver for StubDriver {
        fn name(&self) -> &str {
            self.0
        }
        fn mount(
            &self,
            _device: Arc<dyn BlockDevice>,
            _cache: Arc<BlockCache>,
            _device_id: u64,
            _flags: MountFlags,
        ) -> VfsResult<Box<dyn MountState>> {
            Ok(Box::new(StubMount))
        }
    }

    fn cache() -> Arc<BlockCache> {
        Arc::new(BlockCache::new(512, 4, 2))
    }

    #[test]
    fn duplicate_driver_registration_fails() {
        let reg = MountRegistry::new();
        reg.register_driver(Arc::new(StubDriver("ext2"))).unwrap();
        assert_eq!(
            reg.register_driver(Arc::new(StubDriver("ext2"))),
            Err(VfsError::Exists)
        );
    }

    #[test]
    fn longest_prefix_routing() {
        let reg = MountRegistry::new();
        reg.register_driver(Arc::new(StubDriver("a"))).unwrap();
        reg.register_driver(Arc::new(StubDriver("b"))).unwrap();
        reg.register_driver(Arc::new(StubDriver("c"))).unwrap();

        reg.mount("a", Arc::new(NullDevice), cache(), 0, "/", MountFlags::empty()).unwrap();
        reg.mount("b", Arc::new(NullDevice), cache(), 1, "/mnt", MountFlags::empty()).unwrap();
        reg.mount("c", Arc::new(NullDevice), cache(), 2, "/mnt/sub", MountFlags::empty()).unwrap();

        let (m, rel) = reg.find_mount("/mnt/sub/x").unwrap();
        assert_eq!(m.driver_name, "c");
        assert_eq!(rel, "/x");

        let (m, rel) = reg.find_mount("/mnt/x").unwrap();
        assert_eq!(m.driver_name, "b");
        assert_eq!(rel, "/x");

        let (m, rel) = reg.find_mount("/x").unwrap();
        assert_eq!(m.driver_name, "a");
        assert_eq!(rel, "/x");
    }

    #[test]
    fn unmount_rejects_busy_mount() {
        let reg = MountRegistry::new();
        reg.register_driver(Arc::new(StubDriver("a"))).unwrap();
        reg.mount("a", Arc::new(NullDevice), cache(), 0, "/", MountFlags::empty()).unwrap();
        let (m, _) = reg.find_mount("/").unwrap();
        m.acquire_handle();
        assert_eq!(reg.unmount("/"), Err(VfsError::Busy));
        m.release_handle();
        assert!(reg.unmount("/").is_ok());
    }

    #[test]
    fn double_mount_same_path_fails() {
        let reg = MountRegistry::new();
        reg.register_driver(Arc::new(StubDriver("a"))).unwrap();
        reg.mount("a", Arc::new(NullDevice), cache(), 0, "/", MountFlags::empty()).unwrap();
        assert_eq!(
            reg.mount("a", Arc::new(NullDevice), cache(), 1, "/", MountFlags::empty()),
            Err(VfsError::Exists)
        );
    }
}
