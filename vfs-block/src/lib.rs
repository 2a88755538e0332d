//! Block Device Layer
//!
//! Provides the block device abstraction consumed by the VFS core
//! (spec component A). No concrete disk controller drivers live here;
//! callers hand the core an `Arc<dyn BlockDevice>` capability.

#![no_std]

extern crate alloc;

pub mod device;

pub use device::{BlockDevice, BlockDeviceError, BlockDeviceStats};

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// Global list of registered block devices, indexed by position — the
/// index doubles as the `device_id` the block cache keys on.
static BLOCK_DEVICES: Mutex<Vec<Arc<dyn BlockDevice>>> = Mutex::new(Vec::new());

/// Register a block device, returning its `device_id`.
pub fn register_device(device: Arc<dyn BlockDevice>) -> u64 {
    let mut devices = BLOCK_DEVICES.lock();
    devices.push(device);
    (devices.len() - 1) as u64
}

/// Look up a previously registered device by id.
pub fn get_device(device_id: u64) -> Option<Arc<dyn BlockDevice>> {
    BLOCK_DEVICES.lock().get(device_id as usize).cloned()
}

/// Number of registered devices.
pub fn device_count() -> usize {
    BLOCK_DEVICES.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_register_assigns_ids_in_order() {
        let a = register_device(Arc::new(NullDevice));
        let b = register_device(Arc::new(NullDevice));
        assert!(b > a);
        assert!(get_device(a).is_some());
        assert!(get_device(b).is_some());
    }
}
