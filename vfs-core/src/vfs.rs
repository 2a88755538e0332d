//! Public VFS API (component E, §4.2)
//!
//! Translates absolute paths to `(mount, relative path)` pairs via the
//! mount registry, enforces handle invariants and refcounting, and
//! dispatches to the resolved mount's driver capability set.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use spin::Mutex;

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::driver::{DirHandleOps, FileHandleOps, FsDriver, MountFlags, OpenFlags, SeekWhence};
use crate::error::{ReadDirOutcome, VfsError, VfsResult};
use crate::mount::{MountEntry, MountRegistry};
use crate::path;
use crate::stat::{Attributes, FileKind, Stat, StatFs};

/// An open file. Bound to exactly one mount; `ops` is the driver's
/// per-handle state behind the `handle.lock` of the concurrency model —
/// concurrent `read`/`write` on the same `Handle` serialize on it.
pub struct Handle {
    mount: Arc<MountEntry>,
    flags: OpenFlags,
    ops: Mutex<Box<dyn FileHandleOps>>,
}

/// An open directory, analogous to [`Handle`].
pub struct DirHandle {
    mount: Arc<MountEntry>,
    ops: Mutex<Box<dyn DirHandleOps>>,
}

/// The VFS core: a mount registry plus the operations that sit above it.
pub struct Vfs {
    registry: MountRegistry,
}

impl Vfs {
    pub const fn new() -> Self {
        Vfs {
            registry: MountRegistry::new(),
        }
    }

    pub fn registry(&self) -> &MountRegistry {
        &self.registry
    }

    pub fn register_driver(&self, driver: Arc<dyn FsDriver>) -> VfsResult<()> {
        self.registry.register_driver(driver)
    }

    pub fn mount(
        &self,
        driver_name: &str,
        device: Arc<dyn BlockDevice>,
        cache: Arc<BlockCache>,
        device_id: u64,
        path: &str,
        flags: MountFlags,
    ) -> VfsResult<()> {
        self.registry
            .mount(driver_name, device, cache, device_id, path, flags)
            .map(|_| ())
    }

    pub fn unmount(&self, path: &str) -> VfsResult<()> {
        self.registry.unmount(path)
    }

    /// Latches `mount` read-only on `Corrupted` (§7) before returning the
    /// result unchanged.
    fn propagate<T>(mount: &MountEntry, result: VfsResult<T>) -> VfsResult<T> {
        if let Err(VfsError::Corrupted) = result {
            mount.mark_corrupted();
        }
        result
    }

    fn resolve(&self, path: &str) -> VfsResult<(Arc<MountEntry>, String)> {
        self.registry.find_mount(path)
    }

    const WRITING_FLAGS: OpenFlags = OpenFlags::WRITE
        .union(OpenFlags::APPEND)
        .union(OpenFlags::CREATE)
        .union(OpenFlags::TRUNCATE);

    pub fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Handle> {
        let (mount, rel) = self.resolve(path)?;
        if flags.intersects(Self::WRITING_FLAGS) && mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        let ops = Self::propagate(&mount, mount.state.open(&rel, flags))?;
        mount.acquire_handle();
        Ok(Handle {
            mount,
            flags,
            ops: Mutex::new(ops),
        })
    }

    /// Infallible from the caller's perspective (§4.2): errors from the
    /// underlying flush/close are discarded after the handle is
    /// invalidated, since there is no path left for the caller to act on.
    pub fn close(&self, handle: Handle) {
        let Handle { mount, ops, .. } = handle;
        let mut ops = ops.into_inner();
        let _ = ops.flush();
        let _ = ops.close();
        mount.release_handle();
    }

    pub fn read(&self, handle: &Handle, buf: &mut [u8]) -> VfsResult<usize> {
        if !handle.flags.contains(OpenFlags::READ) {
            return Err(VfsError::InvalidArg);
        }
        Self::propagate(&handle.mount, handle.ops.lock().read(buf))
    }

    pub fn write(&self, handle: &Handle, buf: &[u8]) -> VfsResult<usize> {
        if !handle.flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND) {
            return Err(VfsError::InvalidArg);
        }
        if handle.mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        Self::propagate(&handle.mount, handle.ops.lock().write(buf))
    }

    pub fn seek(&self, handle: &Handle, offset: i64, whence: SeekWhence) -> VfsResult<u64> {
        Self::propagate(&handle.mount, handle.ops.lock().seek(offset, whence))
    }

    pub fn tell(&self, handle: &Handle) -> VfsResult<u64> {
        handle.ops.lock().tell()
    }

    pub fn flush(&self, handle: &Handle) -> VfsResult<()> {
        Self::propagate(&handle.mount, handle.ops.lock().flush())
    }

    pub fn truncate(&self, handle: &Handle, size: u64) -> VfsResult<()> {
        if handle.mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        Self::propagate(&handle.mount, handle.ops.lock().truncate(size))
    }

    pub fn stat(&self, path: &str) -> VfsResult<Stat> {
        let (mount, rel) = self.resolve(path)?;
        Self::propagate(&mount, mount.state.stat(&rel))
    }

    pub fn statfs(&self, path: &str) -> VfsResult<StatFs> {
        let (mount, rel) = self.resolve(path)?;
        let _ = rel;
        Self::propagate(&mount, mount.state.statfs())
    }

    pub fn opendir(&self, path: &str) -> VfsResult<DirHandle> {
        let (mount, rel) = self.resolve(path)?;
        let ops = Self::propagate(&mount, mount.state.opendir(&rel))?;
        mount.acquire_handle();
        Ok(DirHandle {
            mount,
            ops: Mutex::new(ops),
        })
    }

    pub fn readdir(&self, handle: &DirHandle) -> VfsResult<ReadDirOutcome> {
        Self::propagate(&handle.mount, handle.ops.lock().readdir())
    }

    pub fn closedir(&self, handle: DirHandle) {
        let DirHandle { mount, ops } = handle;
        let mut ops = ops.into_inner();
        let _ = ops.close();
        mount.release_handle();
    }

    pub fn mkdir(&self, path: &str, attrs: Attributes) -> VfsResult<()> {
        let (mount, rel) = self.resolve(path)?;
        if mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        Self::propagate(&mount, mount.state.mkdir(&rel, attrs))
    }

    pub fn rmdir(&self, path: &str) -> VfsResult<()> {
        let (mount, rel) = self.resolve(path)?;
        if mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        Self::propagate(&mount, mount.state.rmdir(&rel))
    }

    pub fn unlink(&self, path: &str) -> VfsResult<()> {
        let (mount, rel) = self.resolve(path)?;
        if mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        Self::propagate(&mount, mount.state.unlink(&rel))
    }

    /// Both paths must resolve to the same mount (cross-mount rename
    /// fails `InvalidArg`); overwriting an existing destination fails
    /// `Exists` (enforced by the driver, which alone can check existence
    /// without a second resolution round-trip).
    ///
    /// Drivers that opt into [`crate::driver::MountState::supports_inplace_rename`]
    /// get the in-place path; everything else is emulated here as
    /// add-new/remove-old on top of `read`/`write`/`mkdir`/`unlink`, since
    /// such a driver has no atomic directory-entry move of its own.
    pub fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        let (old_mount, old_rel) = self.resolve(old)?;
        let (new_mount, new_rel) = self.resolve(new)?;
        if !Arc::ptr_eq(&old_mount, &new_mount) {
            return Err(VfsError::InvalidArg);
        }
        if old_mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        if old_mount.state.supports_inplace_rename() {
            return Self::propagate(&old_mount, old_mount.state.rename(&old_rel, &new_rel));
        }
        Self::propagate(&old_mount, self.emulate_rename(&old_mount, &old_rel, &new_rel))
    }

    /// Recursive copy-then-delete rename for drivers without an in-place
    /// move: directories are walked child by child, files are streamed
    /// through a read/write loop, and the source is removed only once the
    /// destination is fully in place.
    fn emulate_rename(&self, mount: &Arc<MountEntry>, old_rel: &str, new_rel: &str) -> VfsResult<()> {
        let source = mount.state.stat(old_rel)?;
        match source.kind {
            FileKind::Directory => {
                mount.state.mkdir(new_rel, source.attributes)?;
                let mut dir = mount.state.opendir(old_rel)?;
                loop {
                    match dir.readdir()? {
                        ReadDirOutcome::EndOfDirectory => break,
                        ReadDirOutcome::Entry(entry) => {
                            let child_old = path::join(old_rel, &entry.name);
                            let child_new = path::join(new_rel, &entry.name);
                            self.emulate_rename(mount, &child_old, &child_new)?;
                        }
                    }
                }
                let _ = dir.close();
                mount.state.rmdir(old_rel)
            }
            _ => {
                let mut src = mount.state.open(old_rel, OpenFlags::READ)?;
                let mut dst = mount
                    .state
                    .open(new_rel, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE)?;
                let mut buf = [0u8; 4096];
                loop {
                    let n = src.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    dst.write(&buf[..n])?;
                }
                let _ = src.close();
                let _ = dst.flush();
                let _ = dst.close();
                mount.state.unlink(old_rel)
            }
        }
    }

    /// Both paths must resolve to the same mount (§4.4).
    pub fn link(&self, old: &str, new: &str) -> VfsResult<()> {
        let (old_mount, old_rel) = self.resolve(old)?;
        let (new_mount, new_rel) = self.resolve(new)?;
        if !Arc::ptr_eq(&old_mount, &new_mount) {
            return Err(VfsError::InvalidArg);
        }
        if old_mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        Self::propagate(&old_mount, old_mount.state.link(&old_rel, &new_rel))
    }

    pub fn symlink(&self, target: &str, link_path: &str) -> VfsResult<()> {
        let (mount, rel) = self.resolve(link_path)?;
        if mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        Self::propagate(&mount, mount.state.symlink(target, &rel))
    }

    pub fn readlink(&self, path: &str) -> VfsResult<String> {
        let (mount, rel) = self.resolve(path)?;
        Self::propagate(&mount, mount.state.readlink(&rel))
    }

    pub fn chmod(&self, path: &str, attrs: Attributes) -> VfsResult<()> {
        let (mount, rel) = self.resolve(path)?;
        if mount.effective_read_only() {
            return Err(VfsError::ReadOnly);
        }
        Self::propagate(&mount, mount.state.chmod(&rel, attrs))
    }

    /// Flushes every byte previously written against any handle on the
    /// mount covering `path` down to the device (§5 ordering guarantees).
    pub fn sync(&self, path: &str) -> VfsResult<()> {
        let (mount, _) = self.resolve(path)?;
        Self::propagate(&mount, mount.state.sync())
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}
