//! Boot-time wiring (ambient stack)
//!
//! Registers every shipped driver with a [`MountRegistry`] and mounts the
//! root device, in two staged steps (`register_drivers` readies the
//! table, `mount_root` performs the one mount every boot needs before
//! anything else can open a path). There is deliberately no panic
//! handler here or anywhere else in this crate: that belongs to
//! whatever binary links this library against a target, not to the
//! ambient glue itself.

use alloc::sync::Arc;

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;
use vfs_core::{Clock, Ext2Driver, ExfatDriver, Fat12Driver, Iso9660Driver, MountEntry, MountFlags, MountRegistry, VfsResult};

use crate::log::LogSink;
use crate::{printk, printkln};

/// Registers the reference ext2 driver and the three read-only stub
/// drivers. Safe to call once at boot, before any mount is attempted.
pub fn register_drivers(registry: &MountRegistry, clock: Arc<dyn Clock>) -> VfsResult<()> {
    registry.register_driver(Arc::new(Ext2Driver::new(clock)))?;
    registry.register_driver(Arc::new(Fat12Driver::new()))?;
    registry.register_driver(Arc::new(ExfatDriver::new()))?;
    registry.register_driver(Arc::new(Iso9660Driver::new()))?;
    Ok(())
}

/// Mounts `root_device` as the filesystem root, under `driver_name`
/// (almost always `"ext2"`). Panics on nothing; a failed root mount is
/// reported to the caller to decide how to fail the boot.
pub fn mount_root(
    registry: &MountRegistry,
    driver_name: &str,
    root_device: Arc<dyn BlockDevice>,
    cache: Arc<BlockCache>,
    device_id: u64,
    flags: MountFlags,
) -> VfsResult<Arc<MountEntry>> {
    registry.mount(driver_name, root_device, cache, device_id, "/", flags)
}

/// Convenience wrapper performing both steps and logging each stage,
/// mirroring the phased `early_init`/`main_init` shape without the
/// scheduler and syscall stages this crate does not own.
pub fn init(
    registry: &MountRegistry,
    clock: Arc<dyn Clock>,
    driver_name: &str,
    root_device: Arc<dyn BlockDevice>,
    cache: Arc<BlockCache>,
    device_id: u64,
    flags: MountFlags,
) -> VfsResult<Arc<MountEntry>> {
    printkln!("vfs: registering drivers");
    register_drivers(registry, clock)?;

    printkln!("vfs: mounting {} as root", driver_name);
    let root = mount_root(registry, driver_name, root_device, cache, device_id, flags)?;
    printk!("vfs: root mounted\n");
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use std::sync::Mutex as StdMutex;
    use vfs_block::BlockDeviceError;
    use vfs_core::FixedClock;

    struct NullDevice;
    impl BlockDevice for NullDevice {
        fn name(&self) -> &str {
            "null"
        }
        fn block_size(&self) -> usize {
            1024
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

    struct CaptureSink(StdMutex<alloc::vec::Vec<String>>);
    impl LogSink for CaptureSink {
        fn write_str(&self, s: &str) {
            self.0.lock().unwrap().push(String::from(s));
        }
    }

    #[test]
    fn register_drivers_installs_all_four() {
        let registry = MountRegistry::new();
        register_drivers(&registry, Arc::new(FixedClock(0))).unwrap();
        assert_eq!(registry.driver_count(), 4);
    }

    #[test]
    fn double_registration_reports_exists() {
        let registry = MountRegistry::new();
        register_drivers(&registry, Arc::new(FixedClock(0))).unwrap();
        assert!(register_drivers(&registry, Arc::new(FixedClock(0))).is_err());
    }

    #[test]
    fn mount_root_with_unregistered_driver_fails_not_found() {
        let registry = MountRegistry::new();
        register_drivers(&registry, Arc::new(FixedClock(0))).unwrap();
        let cache = Arc::new(BlockCache::new(1024, 4, 2));
        let result = mount_root(&registry, "nonexistent", Arc::new(NullDevice), cache, 0, MountFlags::empty());
        assert_eq!(result.unwrap_err(), vfs_core::VfsError::NotFound);
    }

    #[test]
    fn init_logs_each_stage() {
        static CAPTURE: CaptureSink = CaptureSink(StdMutex::new(alloc::vec::Vec::new()));
        crate::log::set_sink(&CAPTURE);

        let registry = MountRegistry::new();
        let cache = Arc::new(BlockCache::new(1024, 4, 2));
        // "nonexistent" driver so the mount step fails fast without a real image.
        let _ = init(
            &registry,
            Arc::new(FixedClock(0)),
            "nonexistent",
            Arc::new(NullDevice),
            cache,
            0,
            MountFlags::empty(),
        );

        let lines = CAPTURE.0.lock().unwrap();
        assert!(lines.join("").contains("registering drivers"));
        crate::log::clear_sink();
    }
}
