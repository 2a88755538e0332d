//! ext2-like reference filesystem driver (component C, §4.3, §4.4)
//!
//! Ties together the on-disk layout modules (`superblock`, `group`,
//! `inode`, `dirent`, `allocator`) into the `FsDriver`/`MountState`
//! capability set. `Ext2Mount` holds the live, lockable filesystem state;
//! `Ext2Driver` is the stateless factory registered with the mount
//! registry.

pub mod allocator;
pub mod dirent;
pub mod group;
pub mod inode;
pub mod superblock;

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::clock::Clock;
use crate::config::SYMLINK_DEPTH_LIMIT;
use crate::driver::{DirHandleOps, FileHandleOps, FsDriver, MountFlags, MountState, OpenFlags, SeekWhence};
use crate::error::{ReadDirOutcome, VfsError, VfsResult};
use crate::path;
use crate::stat::{Attributes, DirEntry, FileKind, Stat, StatFs, Timestamps};

use group::GroupDescriptor;
use superblock::Superblock;

struct Ext2State {
    sb: Superblock,
    groups: Vec<GroupDescriptor>,
}

/// Live state behind one ext2-like mount. `state` is the per-mount lock
/// in the hierarchy (§5): acquired after the registry lock, before the
/// block cache's.
pub struct Ext2Mount {
    device: Arc<dyn BlockDevice>,
    cache: Arc<BlockCache>,
    device_id: u64,
    flags: MountFlags,
    clock: Arc<dyn Clock>,
    state: Mutex<Ext2State>,
    /// Live open-handle refcount per inode, for the "open while unlinked"
    /// rule (§4.4 invariant 11): an inode whose link count hits zero while
    /// still open is not actually freed until the last handle closes.
    open_counts: Mutex<BTreeMap<u32, u32>>,
    pending_delete: Mutex<BTreeSet<u32>>,
}

impl Ext2Mount {
    fn block_size(&self) -> u32 {
        self.state.lock().sb.block_size()
    }

    fn group_of_inode(&self, inode_num: u32) -> u32 {
        inode::inode_location(inode_num, &self.state.lock().sb).0
    }

    fn read_inode(&self, inode_num: u32) -> VfsResult<inode::Inode> {
        let st = self.state.lock();
        inode::read_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &st.sb, &st.groups, inode_num)
    }

    fn write_inode(&self, inode_num: u32, ino: &inode::Inode) -> VfsResult<()> {
        let st = self.state.lock();
        inode::write_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &st.sb, &st.groups, inode_num, ino)
    }

    fn resolve_block_readonly(&self, ino: &mut inode::Inode, k: u64) -> VfsResult<u64> {
        let block_size = self.block_size();
        inode::resolve_block(ino, k, block_size, false, self.device.as_ref(), self.cache.as_ref(), self.device_id, || {
            Err(VfsError::NoSpace)
        })
    }

    fn bump_open_count(&self, inode_num: u32) {
        *self.open_counts.lock().entry(inode_num).or_insert(0) += 1;
    }

    /// Drops one open reference. If it was the last one and the inode had
    /// already hit a zero link count while still open, frees it now.
    fn release_open_count(&self, inode_num: u32) -> VfsResult<()> {
        let last = {
            let mut counts = self.open_counts.lock();
            match counts.get_mut(&inode_num) {
                Some(n) => {
                    *n = n.saturating_sub(1);
                    let last = *n == 0;
                    if last {
                        counts.remove(&inode_num);
                    }
                    last
                }
                None => true,
            }
        };
        if last && self.pending_delete.lock().remove(&inode_num) {
            self.free_inode_content(inode_num)?;
        }
        Ok(())
    }

    fn free_inode_content(&self, inode_num: u32) -> VfsResult<()> {
        let mut ino = self.read_inode(inode_num)?;
        if !ino.is_fast_symlink() {
            self.truncate_content(&mut ino, 0)?;
        }
        let was_dir = ino.kind() == FileKind::Directory;
        let mut st = self.state.lock();
        allocator::free_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, inode_num, was_dir)
    }

    /// Flushes the superblock, group descriptor table, and every dirty
    /// cache line belonging to this device through to the block device.
    fn flush_device(&self) -> VfsResult<()> {
        {
            let st = self.state.lock();
            st.sb.store(self.device.as_ref(), self.cache.as_ref(), self.device_id)?;
            group::store_table(self.device.as_ref(), self.cache.as_ref(), self.device_id, &st.sb, &st.groups)?;
        }
        self.cache.flush_all(self.device.as_ref())?;
        Ok(())
    }

    // -- path resolution --------------------------------------------------

    fn resolve(&self, path: &str, follow_terminal_symlink: bool) -> VfsResult<u32> {
        self.resolve_from(inode::ROOT_INODE, path, follow_terminal_symlink, 0)
    }

    /// Resolves `path`'s components starting at directory inode `start`,
    /// following every non-terminal symlink unconditionally and the
    /// terminal one only when `follow_terminal_symlink` is set (§4.5).
    fn resolve_from(&self, start: u32, path: &str, follow_terminal_symlink: bool, depth: u32) -> VfsResult<u32> {
        let components: Vec<&str> = path::components(path).collect();
        let last_index = components.len().checked_sub(1);
        let mut current = start;

        for (i, name) in components.iter().enumerate() {
            let dir_inode = self.read_inode(current)?;
            if dir_inode.kind() != FileKind::Directory {
                return Err(VfsError::NotDirectory);
            }
            let child = self.lookup_in_directory(&dir_inode, name)?.ok_or(VfsError::NotFound)?;
            let is_last = last_index == Some(i);

            if is_last && !follow_terminal_symlink {
                current = child;
                continue;
            }

            let child_inode = self.read_inode(child)?;
            if child_inode.kind() == FileKind::Symlink {
                if depth >= SYMLINK_DEPTH_LIMIT {
                    return Err(VfsError::InvalidArg);
                }
                let target = self.read_symlink_target(&child_inode)?;
                let root_for_target = if target.starts_with('/') { inode::ROOT_INODE } else { current };
                current = self.resolve_from(root_for_target, &target, true, depth + 1)?;
            } else {
                current = child;
            }
        }
        Ok(current)
    }

    fn lookup_in_directory(&self, dir_inode: &inode::Inode, name: &str) -> VfsResult<Option<u32>> {
        let block_size = self.block_size();
        let nblocks = (dir_inode.size as u64 + block_size as u64 - 1) / block_size as u64;
        let mut copy = *dir_inode;
        for k in 0..nblocks {
            let phys = self.resolve_block_readonly(&mut copy, k)?;
            if phys == 0 {
                continue;
            }
            let data = self.cache.get(self.device.as_ref(), self.device_id, phys)?;
            if let Some(e) = dirent::find(&data, name) {
                return Ok(Some(e.inode));
            }
        }
        Ok(None)
    }

    fn read_symlink_target(&self, ino: &inode::Inode) -> VfsResult<String> {
        if ino.is_fast_symlink() {
            let bytes = ino.inline_symlink_target();
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        let mut buf = vec![0u8; ino.size as usize];
        let mut copy = *ino;
        self.read_at(&mut copy, 0, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // -- content I/O --------------------------------------------------

    fn read_at(&self, ino: &mut inode::Inode, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let block_size = self.block_size() as u64;
        let size = ino.size as u64;
        if offset >= size {
            return Ok(0);
        }
        let to_read = core::cmp::min(buf.len() as u64, size - offset) as usize;
        let mut done = 0usize;
        while done < to_read {
            let pos = offset + done as u64;
            let k = pos / block_size;
            let in_block = (pos % block_size) as usize;
            let chunk = core::cmp::min(to_read - done, block_size as usize - in_block);

            let phys = self.resolve_block_readonly(ino, k)?;
            if phys == 0 {
                buf[done..done + chunk].fill(0);
            } else {
                let data = self.cache.get(self.device.as_ref(), self.device_id, phys)?;
                buf[done..done + chunk].copy_from_slice(&data[in_block..in_block + chunk]);
            }
            done += chunk;
        }
        Ok(done)
    }

    /// Writes as much of `buf` as the volume has room for (§3 invariant:
    /// a short write is legal, `NoSpace` is only returned for zero bytes
    /// written). Block allocation can fail partway through a multi-block
    /// write; bookkeeping for the blocks already written is applied before
    /// returning, rather than discarded along with the error.
    fn write_at(&self, ino: &mut inode::Inode, offset: u64, buf: &[u8], preferred_group: u32) -> VfsResult<usize> {
        let block_size = self.block_size();
        let mut done = 0usize;
        let mut newly_allocated: u32 = 0;
        let mut alloc_err = None;

        while done < buf.len() {
            let pos = offset + done as u64;
            let k = pos / block_size as u64;
            let in_block = (pos % block_size as u64) as usize;
            let chunk = core::cmp::min(buf.len() - done, block_size as usize - in_block);

            let phys = {
                let mut st = self.state.lock();
                let sb = &mut st.sb;
                let groups = &mut st.groups;
                let device = self.device.as_ref();
                let cache = self.cache.as_ref();
                let device_id = self.device_id;
                // Count only allocations that actually succeeded: a
                // multi-level `resolve_block` call can allocate an
                // indirect block and then fail allocating the final data
                // block, and that indirect block is real and already
                // linked into the inode.
                inode::resolve_block(ino, k, block_size, true, device, cache, device_id, || {
                    let b = allocator::alloc_block(device, cache, device_id, sb, groups, preferred_group)?;
                    newly_allocated += 1;
                    Ok(b)
                })
            };
            let phys = match phys {
                Ok(phys) => phys,
                Err(e) => {
                    alloc_err = Some(e);
                    break;
                }
            };

            let mut data = self.cache.get(self.device.as_ref(), self.device_id, phys)?;
            data[in_block..in_block + chunk].copy_from_slice(&buf[done..done + chunk]);
            self.cache.dirty(self.device.as_ref(), self.device_id, phys, data)?;
            done += chunk;
        }

        ino.blocks += newly_allocated * (block_size / 512);
        let new_end = offset + done as u64;
        if new_end > ino.size as u64 {
            ino.size = new_end as u32;
        }

        if done == 0 {
            if let Some(e) = alloc_err {
                return Err(e);
            }
        }

        Ok(done)
    }

    /// Growing is a sparse no-op (§8 invariant 8): only the logical size
    /// changes, no blocks are touched until something writes into the new
    /// range. Shrinking walks every now-out-of-range logical block and
    /// frees whatever was backing it.
    fn truncate_content(&self, ino: &mut inode::Inode, new_size: u64) -> VfsResult<()> {
        let block_size = self.block_size() as u64;
        let old_size = ino.size as u64;

        if new_size >= old_size {
            ino.size = new_size as u32;
            return Ok(());
        }

        let old_blocks = (old_size + block_size - 1) / block_size;
        let new_blocks = (new_size + block_size - 1) / block_size;

        let mut st = self.state.lock();
        for k in new_blocks..old_blocks {
            let freed = inode::take_block(ino, k, block_size as u32, self.device.as_ref(), self.cache.as_ref(), self.device_id)?;
            if freed != 0 {
                allocator::free_block(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, freed)?;
                ino.blocks = ino.blocks.saturating_sub((block_size / 512) as u32);
            }
        }
        ino.size = new_size as u32;
        Ok(())
    }

    // -- directory mutation --------------------------------------------------

    fn list_directory_entries(&self, dir_inode: &inode::Inode) -> VfsResult<Vec<DirEntry>> {
        let block_size = self.block_size();
        let nblocks = (dir_inode.size as u64 + block_size as u64 - 1) / block_size as u64;
        let mut copy = *dir_inode;
        let mut out = Vec::new();
        for k in 0..nblocks {
            let phys = self.resolve_block_readonly(&mut copy, k)?;
            if phys == 0 {
                continue;
            }
            let data = self.cache.get(self.device.as_ref(), self.device_id, phys)?;
            for entry in dirent::list_live(&data) {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                let child = self.read_inode(entry.inode)?;
                out.push(DirEntry {
                    name: entry.name,
                    kind: child.kind(),
                    size: child.size as u64,
                    attributes: child.attributes(),
                    timestamps: Timestamps {
                        atime: child.atime as u64,
                        mtime: child.mtime as u64,
                        ctime: child.ctime as u64,
                    },
                });
            }
        }
        Ok(out)
    }

    fn directory_is_empty(&self, dir_inode: &inode::Inode) -> VfsResult<bool> {
        let block_size = self.block_size();
        let nblocks = (dir_inode.size as u64 + block_size as u64 - 1) / block_size as u64;
        let mut copy = *dir_inode;
        for k in 0..nblocks {
            let phys = self.resolve_block_readonly(&mut copy, k)?;
            if phys == 0 {
                continue;
            }
            let data = self.cache.get(self.device.as_ref(), self.device_id, phys)?;
            for e in dirent::list_live(&data) {
                if e.name != "." && e.name != ".." {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Adds `(name, child_inode)` to `dir_inode`'s contents, splitting an
    /// existing block with enough slack or, failing that, growing the
    /// directory by one block laid out as a single dead entry (§4.4).
    fn add_directory_entry(
        &self,
        dir_num: u32,
        dir_inode: &mut inode::Inode,
        name: &str,
        child_inode: u32,
        file_type: u8,
        preferred_group: u32,
    ) -> VfsResult<()> {
        let block_size = self.block_size();
        let nblocks = (dir_inode.size as u64 + block_size as u64 - 1) / block_size as u64;

        for k in 0..nblocks {
            let phys = self.resolve_block_readonly(dir_inode, k)?;
            if phys == 0 {
                continue;
            }
            let mut data = self.cache.get(self.device.as_ref(), self.device_id, phys)?;
            if dirent::try_insert(&mut data, name, child_inode, file_type) {
                self.cache.dirty(self.device.as_ref(), self.device_id, phys, data)?;
                self.write_inode(dir_num, dir_inode)?;
                return Ok(());
            }
        }

        let k = nblocks;
        let mut newly_allocated: u32 = 0;
        let phys = {
            let mut st = self.state.lock();
            let sb = &mut st.sb;
            let groups = &mut st.groups;
            let device = self.device.as_ref();
            let cache = self.cache.as_ref();
            let device_id = self.device_id;
            inode::resolve_block(dir_inode, k, block_size, true, device, cache, device_id, || {
                newly_allocated += 1;
                allocator::alloc_block(device, cache, device_id, sb, groups, preferred_group)
            })?
        };

        let mut data = vec![0u8; block_size as usize];
        dirent::init_empty_block(&mut data);
        if !dirent::try_insert(&mut data, name, child_inode, file_type) {
            return Err(VfsError::NoSpace);
        }
        self.cache.dirty(self.device.as_ref(), self.device_id, phys, data)?;

        dir_inode.size += block_size;
        dir_inode.blocks += newly_allocated * (block_size / 512);
        self.write_inode(dir_num, dir_inode)?;
        Ok(())
    }

    fn remove_directory_entry(&self, dir_inode: &mut inode::Inode, name: &str) -> VfsResult<bool> {
        let block_size = self.block_size();
        let nblocks = (dir_inode.size as u64 + block_size as u64 - 1) / block_size as u64;
        for k in 0..nblocks {
            let phys = self.resolve_block_readonly(dir_inode, k)?;
            if phys == 0 {
                continue;
            }
            let mut data = self.cache.get(self.device.as_ref(), self.device_id, phys)?;
            if dirent::remove(&mut data, name) {
                self.cache.dirty(self.device.as_ref(), self.device_id, phys, data)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn retarget_dotdot(&self, dir_inode: &mut inode::Inode, new_parent_num: u32) -> VfsResult<bool> {
        let block_size = self.block_size();
        let nblocks = (dir_inode.size as u64 + block_size as u64 - 1) / block_size as u64;
        for k in 0..nblocks {
            let phys = self.resolve_block_readonly(dir_inode, k)?;
            if phys == 0 {
                continue;
            }
            let mut data = self.cache.get(self.device.as_ref(), self.device_id, phys)?;
            if dirent::retarget(&mut data, "..", new_parent_num) {
                self.cache.dirty(self.device.as_ref(), self.device_id, phys, data)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn create_regular_file(&self, parent_num: u32, parent_inode: &mut inode::Inode, name: &str, attrs: Attributes) -> VfsResult<u32> {
        let group = self.group_of_inode(parent_num);
        let now = self.clock.now_unix() as u32;

        let new_num = {
            let mut st = self.state.lock();
            allocator::alloc_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, group, false)?
        };

        let result: VfsResult<()> = (|| {
            let mut new_inode = inode::Inode::new(FileKind::File, attrs, now);
            new_inode.links_count = 1;
            self.write_inode(new_num, &new_inode)?;
            self.add_directory_entry(parent_num, parent_inode, name, new_num, inode::file_type_byte(FileKind::File), group)?;
            Ok(())
        })();

        if let Err(e) = result {
            let mut st = self.state.lock();
            let _ = allocator::free_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, new_num, false);
            return Err(e);
        }
        Ok(new_num)
    }

    // -- MountState capability bodies --------------------------------------------------

    fn stat(&self, path: &str) -> VfsResult<Stat> {
        let num = self.resolve(path, true)?;
        let ino = self.read_inode(num)?;
        Ok(Stat {
            kind: ino.kind(),
            size: ino.size as u64,
            attributes: ino.attributes(),
            timestamps: Timestamps {
                atime: ino.atime as u64,
                mtime: ino.mtime as u64,
                ctime: ino.ctime as u64,
            },
            link_count: ino.links_count as u32,
        })
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        let st = self.state.lock();
        Ok(StatFs {
            block_size: st.sb.block_size(),
            total_blocks: st.sb.blocks_count as u64,
            free_blocks: st.sb.free_blocks_count as u64,
            total_inodes: st.sb.inodes_count as u64,
            free_inodes: st.sb.free_inodes_count as u64,
            read_only: self.flags.contains(MountFlags::READ_ONLY),
        })
    }

    fn open(self: Arc<Self>, path: &str, flags: OpenFlags) -> VfsResult<Box<dyn FileHandleOps>> {
        let (inode_num, mut ino) = match self.resolve(path, true) {
            Ok(num) => (num, self.read_inode(num)?),
            Err(VfsError::NotFound) if flags.contains(OpenFlags::CREATE) => {
                let (parent_path, name) = path::split_parent(path)?;
                let parent_num = self.resolve(&parent_path, true)?;
                let mut parent_inode = self.read_inode(parent_num)?;
                if parent_inode.kind() != FileKind::Directory {
                    return Err(VfsError::NotDirectory);
                }
                let new_num = self.create_regular_file(parent_num, &mut parent_inode, name, Attributes::READ | Attributes::WRITE)?;
                (new_num, self.read_inode(new_num)?)
            }
            Err(e) => return Err(e),
        };

        if ino.kind() == FileKind::Directory {
            return Err(VfsError::IsDirectory);
        }

        if flags.contains(OpenFlags::TRUNCATE) {
            self.truncate_content(&mut ino, 0)?;
            self.write_inode(inode_num, &ino)?;
        }

        self.bump_open_count(inode_num);
        Ok(Box::new(FileHandle {
            mount: self,
            inode_num,
            flags,
            position: Mutex::new(0),
            inode: Mutex::new(ino),
        }))
    }

    fn opendir(self: Arc<Self>, path: &str) -> VfsResult<Box<dyn DirHandleOps>> {
        let dir_num = self.resolve(path, true)?;
        let dir_inode = self.read_inode(dir_num)?;
        if dir_inode.kind() != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        let entries = self.list_directory_entries(&dir_inode)?;
        self.bump_open_count(dir_num);
        Ok(Box::new(Ext2DirHandle {
            mount: self,
            inode_num: dir_num,
            entries: Mutex::new((0, entries)),
        }))
    }

    fn mkdir(&self, path: &str, attrs: Attributes) -> VfsResult<()> {
        let (parent_path, name) = path::split_parent(path)?;
        let parent_num = self.resolve(&parent_path, true)?;
        let mut parent_inode = self.read_inode(parent_num)?;
        if parent_inode.kind() != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        if self.lookup_in_directory(&parent_inode, name)?.is_some() {
            return Err(VfsError::Exists);
        }

        let group = self.group_of_inode(parent_num);
        let new_num = {
            let mut st = self.state.lock();
            allocator::alloc_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, group, true)?
        };

        let result = self.mkdir_finish(new_num, parent_num, &mut parent_inode, name, attrs, group);
        if result.is_err() {
            let mut st = self.state.lock();
            let _ = allocator::free_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, new_num, true);
        }
        result
    }

    fn mkdir_finish(
        &self,
        new_num: u32,
        parent_num: u32,
        parent_inode: &mut inode::Inode,
        name: &str,
        attrs: Attributes,
        group: u32,
    ) -> VfsResult<()> {
        let now = self.clock.now_unix() as u32;
        let mut new_inode = inode::Inode::new(FileKind::Directory, attrs, now);
        new_inode.links_count = 2;

        let block_size = self.block_size();
        let block_num = {
            let mut st = self.state.lock();
            allocator::alloc_block(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, group)?
        };
        let mut data = vec![0u8; block_size as usize];
        dirent::init_directory_block(&mut data, new_num, parent_num);
        self.cache.dirty(self.device.as_ref(), self.device_id, block_num, data)?;

        new_inode.block[0] = block_num;
        new_inode.size = block_size;
        new_inode.blocks = block_size / 512;
        self.write_inode(new_num, &new_inode)?;

        self.add_directory_entry(parent_num, parent_inode, name, new_num, inode::file_type_byte(FileKind::Directory), group)?;
        parent_inode.links_count += 1;
        self.write_inode(parent_num, parent_inode)?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> VfsResult<()> {
        let (parent_path, name) = path::split_parent(path)?;
        let parent_num = self.resolve(&parent_path, true)?;
        let mut parent_inode = self.read_inode(parent_num)?;
        if parent_inode.kind() != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        let target_num = self.lookup_in_directory(&parent_inode, name)?.ok_or(VfsError::NotFound)?;
        if target_num == inode::ROOT_INODE {
            return Err(VfsError::InvalidArg);
        }
        let target_inode = self.read_inode(target_num)?;
        if target_inode.kind() != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        if !self.directory_is_empty(&target_inode)? {
            return Err(VfsError::NotEmpty);
        }

        if !self.remove_directory_entry(&mut parent_inode, name)? {
            return Err(VfsError::NotFound);
        }
        parent_inode.links_count = parent_inode.links_count.saturating_sub(1);
        self.write_inode(parent_num, &parent_inode)?;

        if self.open_counts.lock().contains_key(&target_num) {
            self.pending_delete.lock().insert(target_num);
        } else {
            self.free_inode_content(target_num)?;
        }
        Ok(())
    }

    fn unlink(&self, path: &str) -> VfsResult<()> {
        let (parent_path, name) = path::split_parent(path)?;
        let parent_num = self.resolve(&parent_path, true)?;
        let mut parent_inode = self.read_inode(parent_num)?;
        if parent_inode.kind() != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        let target_num = self.lookup_in_directory(&parent_inode, name)?.ok_or(VfsError::NotFound)?;
        let mut target_inode = self.read_inode(target_num)?;
        if target_inode.kind() == FileKind::Directory {
            return Err(VfsError::IsDirectory);
        }

        if !self.remove_directory_entry(&mut parent_inode, name)? {
            return Err(VfsError::NotFound);
        }
        self.write_inode(parent_num, &parent_inode)?;

        target_inode.links_count = target_inode.links_count.saturating_sub(1);
        self.write_inode(target_num, &target_inode)?;

        if target_inode.links_count == 0 {
            if self.open_counts.lock().contains_key(&target_num) {
                self.pending_delete.lock().insert(target_num);
            } else {
                self.free_inode_content(target_num)?;
            }
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        let (old_parent_path, old_name) = path::split_parent(old)?;
        let (new_parent_path, new_name) = path::split_parent(new)?;

        let old_parent_num = self.resolve(&old_parent_path, true)?;
        let new_parent_num = self.resolve(&new_parent_path, true)?;

        let mut old_parent_inode = self.read_inode(old_parent_num)?;
        if old_parent_inode.kind() != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        let moved_num = self.lookup_in_directory(&old_parent_inode, old_name)?.ok_or(VfsError::NotFound)?;

        if old_parent_num == new_parent_num && old_name == new_name {
            return Ok(());
        }

        let same_parent = old_parent_num == new_parent_num;
        let mut new_parent_inode = if same_parent {
            old_parent_inode
        } else {
            let inode = self.read_inode(new_parent_num)?;
            if inode.kind() != FileKind::Directory {
                return Err(VfsError::NotDirectory);
            }
            inode
        };

        if self.lookup_in_directory(&new_parent_inode, new_name)?.is_some() {
            return Err(VfsError::Exists);
        }

        let moved_inode = self.read_inode(moved_num)?;
        let file_type = inode::file_type_byte(moved_inode.kind());
        let group = self.group_of_inode(new_parent_num);

        self.add_directory_entry(new_parent_num, &mut new_parent_inode, new_name, moved_num, file_type, group)?;

        // Same-directory renames remove against the very copy that just
        // received the new entry, so a directory-growth update from the
        // add above can never be clobbered by a write of a stale copy.
        let removed = if same_parent {
            self.remove_directory_entry(&mut new_parent_inode, old_name)?
        } else {
            self.remove_directory_entry(&mut old_parent_inode, old_name)?
        };
        if !removed {
            let _ = self.remove_directory_entry(&mut new_parent_inode, new_name);
            return Err(VfsError::NotFound);
        }
        if !same_parent {
            self.write_inode(old_parent_num, &old_parent_inode)?;
        }

        if moved_inode.kind() == FileKind::Directory && !same_parent {
            let mut moved_dir_inode = moved_inode;
            if !self.retarget_dotdot(&mut moved_dir_inode, new_parent_num)? {
                return Err(VfsError::Corrupted);
            }
            old_parent_inode.links_count = old_parent_inode.links_count.saturating_sub(1);
            self.write_inode(old_parent_num, &old_parent_inode)?;
            new_parent_inode.links_count += 1;
        }

        self.write_inode(new_parent_num, &new_parent_inode)?;
        Ok(())
    }

    fn link(&self, old: &str, new: &str) -> VfsResult<()> {
        let target_num = self.resolve(old, false)?;
        let mut target_inode = self.read_inode(target_num)?;
        if target_inode.kind() == FileKind::Directory {
            return Err(VfsError::IsDirectory);
        }

        let (parent_path, name) = path::split_parent(new)?;
        let parent_num = self.resolve(&parent_path, true)?;
        let mut parent_inode = self.read_inode(parent_num)?;
        if parent_inode.kind() != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        if self.lookup_in_directory(&parent_inode, name)?.is_some() {
            return Err(VfsError::Exists);
        }

        let group = self.group_of_inode(parent_num);
        self.add_directory_entry(parent_num, &mut parent_inode, name, target_num, inode::file_type_byte(target_inode.kind()), group)?;

        target_inode.links_count += 1;
        self.write_inode(target_num, &target_inode)?;
        Ok(())
    }

    fn symlink(&self, target: &str, link_path: &str) -> VfsResult<()> {
        let (parent_path, name) = path::split_parent(link_path)?;
        let parent_num = self.resolve(&parent_path, true)?;
        let mut parent_inode = self.read_inode(parent_num)?;
        if parent_inode.kind() != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        if self.lookup_in_directory(&parent_inode, name)?.is_some() {
            return Err(VfsError::Exists);
        }

        let group = self.group_of_inode(parent_num);
        let now = self.clock.now_unix() as u32;
        let new_num = {
            let mut st = self.state.lock();
            allocator::alloc_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, group, false)?
        };

        let result: VfsResult<()> = (|| {
            let mut new_inode = inode::Inode::new(FileKind::Symlink, Attributes::READ | Attributes::WRITE, now);
            new_inode.links_count = 1;
            let target_bytes = target.as_bytes();
            if target_bytes.len() <= inode::FAST_SYMLINK_MAX {
                new_inode.set_inline_symlink_target(target_bytes);
            } else {
                self.write_at(&mut new_inode, 0, target_bytes, group)?;
            }
            self.write_inode(new_num, &new_inode)?;
            self.add_directory_entry(parent_num, &mut parent_inode, name, new_num, inode::file_type_byte(FileKind::Symlink), group)?;
            Ok(())
        })();

        if let Err(e) = result {
            let mut st = self.state.lock();
            let _ = allocator::free_inode(self.device.as_ref(), self.cache.as_ref(), self.device_id, &mut st.sb, &mut st.groups, new_num, false);
            return Err(e);
        }
        Ok(())
    }

    fn readlink(&self, path: &str) -> VfsResult<String> {
        let num = self.resolve(path, false)?;
        let ino = self.read_inode(num)?;
        if ino.kind() != FileKind::Symlink {
            return Err(VfsError::InvalidArg);
        }
        self.read_symlink_target(&ino)
    }

    fn chmod(&self, path: &str, attrs: Attributes) -> VfsResult<()> {
        let num = self.resolve(path, true)?;
        let mut ino = self.read_inode(num)?;
        ino.set_attributes(attrs);
        ino.ctime = self.clock.now_unix() as u32;
        self.write_inode(num, &ino)
    }
}

/// The registered driver type: a stateless factory sharing one clock
/// across every ext2-like mount it brings up.
pub struct Ext2Driver {
    clock: Arc<dyn Clock>,
}

impl Ext2Driver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Ext2Driver { clock }
    }
}

impl FsDriver for Ext2Driver {
    fn name(&self) -> &str {
        "ext2"
    }

    fn mount(&self, device: Arc<dyn BlockDevice>, cache: Arc<BlockCache>, device_id: u64, flags: MountFlags) -> VfsResult<Box<dyn MountState>> {
        let sb = Superblock::load(device.as_ref(), cache.as_ref(), device_id)?;
        let groups = group::load_table(device.as_ref(), cache.as_ref(), device_id, &sb)?;
        let mount = Arc::new(Ext2Mount {
            device,
            cache,
            device_id,
            flags,
            clock: self.clock.clone(),
            state: Mutex::new(Ext2State { sb, groups }),
            open_counts: Mutex::new(BTreeMap::new()),
            pending_delete: Mutex::new(BTreeSet::new()),
        });
        Ok(Box::new(mount))
    }
}

impl MountState for Arc<Ext2Mount> {
    fn unmount(&self) -> VfsResult<()> {
        self.as_ref().flush_device()
    }

    fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Box<dyn FileHandleOps>> {
        Ext2Mount::open(self.clone(), path, flags)
    }

    fn stat(&self, path: &str) -> VfsResult<Stat> {
        self.as_ref().stat(path)
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        self.as_ref().statfs()
    }

    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirHandleOps>> {
        Ext2Mount::opendir(self.clone(), path)
    }

    fn mkdir(&self, path: &str, attrs: Attributes) -> VfsResult<()> {
        self.as_ref().mkdir(path, attrs)
    }

    fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.as_ref().rmdir(path)
    }

    fn unlink(&self, path: &str) -> VfsResult<()> {
        self.as_ref().unlink(path)
    }

    fn rename(&self, old: &str, new: &str) -> VfsResult<()> {
        self.as_ref().rename(old, new)
    }

    fn link(&self, old: &str, new: &str) -> VfsResult<()> {
        self.as_ref().link(old, new)
    }

    fn symlink(&self, target: &str, link_path: &str) -> VfsResult<()> {
        self.as_ref().symlink(target, link_path)
    }

    fn readlink(&self, path: &str) -> VfsResult<String> {
        self.as_ref().readlink(path)
    }

    fn chmod(&self, path: &str, attrs: Attributes) -> VfsResult<()> {
        self.as_ref().chmod(path, attrs)
    }

    fn sync(&self) -> VfsResult<()> {
        self.as_ref().flush_device()
    }

    fn supports_inplace_rename(&self) -> bool {
        true
    }
}

struct FileHandle {
    mount: Arc<Ext2Mount>,
    inode_num: u32,
    flags: OpenFlags,
    position: Mutex<u64>,
    inode: Mutex<inode::Inode>,
}

impl FileHandleOps for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let mut ino = self.inode.lock();
        let pos = *self.position.lock();
        let n = self.mount.read_at(&mut ino, pos, buf)?;
        *self.position.lock() += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        let mut ino = self.inode.lock();
        let pos = if self.flags.contains(OpenFlags::APPEND) {
            ino.size as u64
        } else {
            *self.position.lock()
        };
        let preferred_group = self.mount.group_of_inode(self.inode_num);
        let n = self.mount.write_at(&mut ino, pos, buf, preferred_group)?;
        self.mount.write_inode(self.inode_num, &ino)?;
        *self.position.lock() = pos + n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: i64, whence: SeekWhence) -> VfsResult<u64> {
        let size = self.inode.lock().size as u64;
        let cur = *self.position.lock();
        let base: i64 = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => cur as i64,
            SeekWhence::End => size as i64,
        };
        let new_pos = base.checked_add(offset).ok_or(VfsError::InvalidArg)?;
        if new_pos < 0 {
            return Err(VfsError::InvalidArg);
        }
        *self.position.lock() = new_pos as u64;
        Ok(new_pos as u64)
    }

    fn tell(&self) -> VfsResult<u64> {
        Ok(*self.position.lock())
    }

    fn flush(&mut self) -> VfsResult<()> {
        self.mount.write_inode(self.inode_num, &self.inode.lock())
    }

    fn truncate(&mut self, size: u64) -> VfsResult<()> {
        let mut ino = self.inode.lock();
        self.mount.truncate_content(&mut ino, size)?;
        self.mount.write_inode(self.inode_num, &ino)
    }

    fn close(&mut self) -> VfsResult<()> {
        self.mount.write_inode(self.inode_num, &self.inode.lock())?;
        self.mount.release_open_count(self.inode_num)
    }
}

struct Ext2DirHandle {
    mount: Arc<Ext2Mount>,
    inode_num: u32,
    entries: Mutex<(usize, Vec<DirEntry>)>,
}

impl DirHandleOps for Ext2DirHandle {
    fn readdir(&mut self) -> VfsResult<ReadDirOutcome> {
        let mut guard = self.entries.lock();
        let (idx, entries) = &mut *guard;
        if *idx >= entries.len() {
            return Ok(ReadDirOutcome::EndOfDirectory);
        }
        let entry = entries[*idx].clone();
        *idx += 1;
        Ok(ReadDirOutcome::Entry(entry))
    }

    fn close(&mut self) -> VfsResult<()> {
        self.mount.release_open_count(self.inode_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::driver::MountFlags;
    use spin::Mutex as StdMutex;
    use vfs_block::BlockDeviceError;

    struct MemDevice {
        block_size: usize,
        blocks: StdMutex<Vec<Vec<u8>>>,
    }

    impl MemDevice {
        fn new(block_size: usize, count: usize) -> Self {
            MemDevice {
                block_size,
                blocks: StdMutex::new(vec![vec![0u8; block_size]; count]),
            }
        }
    }

    impl BlockDevice for MemDevice {
        fn name(&self) -> &str {
            "mem"
        }
        fn block_size(&self) -> usize {
            self.block_size
        }
        fn capacity_blocks(&self) -> u64 {
            self.blocks.lock().len() as u64
        }
        fn read_blocks(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), BlockDeviceError> {
            let blocks = self.blocks.lock();
            for i in 0..count as u64 {
                let src = blocks.get((lba + i) as usize).ok_or(BlockDeviceError::OutOfRange)?;
                let off = i as usize * self.block_size;
                buf[off..off + self.block_size].copy_from_slice(src);
            }
            Ok(())
        }
        fn write_blocks(&self, lba: u64, count: u32, buf: &[u8]) -> Result<(), BlockDeviceError> {
            let mut blocks = self.blocks.lock();
            for i in 0..count as u64 {
                let dst = blocks.get_mut((lba + i) as usize).ok_or(BlockDeviceError::OutOfRange)?;
                let off = i as usize * self.block_size;
                dst.copy_from_slice(&buf[off..off + self.block_size]);
            }
            Ok(())
        }
        fn sync(&self) -> Result<(), BlockDeviceError> {
            Ok(())
        }
    }

    /// Hand-writes a minimal single-group, one-block-size volume: a
    /// superblock, one group descriptor block, inode/block bitmaps, an
    /// inode table, and a root directory holding only `.`/`..`.
    fn build_fresh_volume() -> (Arc<MemDevice>, Arc<BlockCache>) {
        build_volume(256)
    }

    /// Same layout as [`build_fresh_volume`], but with `total_blocks`
    /// data blocks instead of a fixed 256 — small enough to exhaust in a
    /// couple of allocations, for tests that need a volume near full.
    fn build_volume(total_blocks: u64) -> (Arc<MemDevice>, Arc<BlockCache>) {
        const BLOCK_SIZE: usize = 1024;
        const INODES_COUNT: u32 = 64;

        let dev = Arc::new(MemDevice::new(BLOCK_SIZE, total_blocks as usize));
        let cache = Arc::new(BlockCache::new(BLOCK_SIZE, 8, 2));

        // Layout: block 0 boot block, block 1 superblock, block 2 group
        // descriptor table, block 3 block bitmap, block 4 inode bitmap,
        // blocks 5.. inode table, then data blocks.
        let inode_table_start = 5u32;
        let inode_table_blocks = ((INODES_COUNT as usize * inode::INODE_SIZE) + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let first_data_block = inode_table_start + inode_table_blocks as u32;

        let sb = Superblock {
            inodes_count: INODES_COUNT,
            blocks_count: total_blocks as u32,
            free_blocks_count: total_blocks as u32 - first_data_block as u32 - 1,
            free_inodes_count: INODES_COUNT - 1,
            first_data_block,
            log_block_size: 0,
            blocks_per_group: total_blocks as u32,
            inodes_per_group: INODES_COUNT,
            mtime: 0,
            wtime: 0,
            magic: superblock::EXT2_MAGIC,
            state: 1,
        };
        sb.store(dev.as_ref(), cache.as_ref(), 0).unwrap();

        let gd = GroupDescriptor {
            block_bitmap: 3,
            inode_bitmap: 4,
            inode_table: inode_table_start,
            free_blocks_count: sb.free_blocks_count as u16,
            free_inodes_count: sb.free_inodes_count as u16,
            used_dirs_count: 1,
        };
        group::store_table(dev.as_ref(), cache.as_ref(), 0, &sb, &[gd]).unwrap();

        // Mark the root directory's own data block and inode allocated.
        let mut bitmap = vec![0u8; BLOCK_SIZE];
        bitmap[0] = 0b0000_0001;
        cache.dirty(dev.as_ref(), 0, 3, bitmap).unwrap();
        // Root occupies in-group inode index 1 (inode number 2): mark bit 1,
        // not bit 0, so a subsequent alloc_inode doesn't hand out inode 2 again.
        let mut ibitmap = vec![0u8; BLOCK_SIZE];
        ibitmap[0] = 0b0000_0010;
        cache.dirty(dev.as_ref(), 0, 4, ibitmap).unwrap();

        let root_block = first_data_block as u64;
        let mut root_data = vec![0u8; BLOCK_SIZE];
        dirent::init_directory_block(&mut root_data, inode::ROOT_INODE, inode::ROOT_INODE);
        cache.dirty(dev.as_ref(), 0, root_block, root_data).unwrap();

        let mut root_inode = inode::Inode::new(FileKind::Directory, Attributes::READ | Attributes::WRITE, 0);
        root_inode.links_count = 2;
        root_inode.size = BLOCK_SIZE as u32;
        root_inode.blocks = (BLOCK_SIZE / 512) as u32;
        root_inode.block[0] = root_block;
        inode::write_inode(dev.as_ref(), cache.as_ref(), 0, &sb, &[gd], inode::ROOT_INODE, &root_inode).unwrap();

        cache.flush_all(dev.as_ref()).unwrap();
        (dev, cache)
    }

    fn mount_fresh() -> Arc<TestMount> {
        mount_volume(build_fresh_volume())
    }

    fn mount_volume(built: (Arc<MemDevice>, Arc<BlockCache>)) -> Arc<TestMount> {
        let (dev, cache) = built;
        let driver = Ext2Driver::new(Arc::new(FixedClock(1_000)));
        let state = driver.mount(dev, cache, 0, MountFlags::empty()).unwrap();
        // Downcasting a trait object back to its concrete type would need
        // `Any`; tests instead talk to the mount purely through the
        // `MountState` interface, matching how the VFS layer uses it.
        Arc::new(TestMount(state))
    }

    /// Adapts a boxed `MountState` back to something cloneable for tests
    /// that need to exercise multiple handles concurrently.
    struct TestMount(Box<dyn MountState>);

    impl core::ops::Deref for TestMount {
        type Target = dyn MountState;
        fn deref(&self) -> &Self::Target {
            self.0.as_ref()
        }
    }

    #[test]
    fn root_listing_excludes_dot_and_dotdot() {
        let mount = mount_fresh();
        let mut dir = mount.opendir("/").unwrap();
        assert!(matches!(dir.readdir().unwrap(), ReadDirOutcome::EndOfDirectory));
        dir.close().unwrap();
    }

    #[test]
    fn create_write_read_back() {
        let mount = mount_fresh();
        let mut h = mount.open("/a.txt", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        let n = h.write(b"hello").unwrap();
        assert_eq!(n, 5);
        h.close().unwrap();

        let mut h = mount.open("/a.txt", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 16];
        let n = h.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[0..5], b"hello");

        let st = mount.stat("/a.txt").unwrap();
        assert_eq!(st.size, 5);
        assert_eq!(st.kind, FileKind::File);
    }

    #[test]
    fn hole_write_reads_back_as_zero_padded() {
        let mount = mount_fresh();
        let mut h = mount.open("/sparse", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        h.seek(8192, SeekWhence::Set).unwrap();
        h.write(b"Z").unwrap();
        h.close().unwrap();

        let mut h = mount.open("/sparse", OpenFlags::READ).unwrap();
        let mut buf = [0xFFu8; 8193];
        let n = h.read(&mut buf).unwrap();
        assert_eq!(n, 8193);
        assert!(buf[0..8192].iter().all(|&b| b == 0));
        assert_eq!(buf[8192], b'Z');

        let st = mount.stat("/sparse").unwrap();
        assert_eq!(st.size, 8193);
    }

    #[test]
    fn truncate_to_current_size_is_a_no_op() {
        let mount = mount_fresh();
        let mut h = mount.open("/f", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        h.write(b"0123456789").unwrap();
        h.truncate(10).unwrap();
        h.seek(0, SeekWhence::Set).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(h.read(&mut buf).unwrap(), 10);
        assert_eq!(&buf, b"0123456789");
    }

    #[test]
    fn rename_non_empty_directory_moves_contents() {
        let mount = mount_fresh();
        mount.mkdir("/d1", Attributes::READ | Attributes::WRITE).unwrap();
        let mut h = mount.open("/d1/f", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        h.write(b"payload").unwrap();
        h.close().unwrap();

        mount.rename("/d1", "/d2").unwrap();

        let mut h = mount.open("/d2/f", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 16];
        let n = h.read(&mut buf).unwrap();
        assert_eq!(&buf[0..n], b"payload");

        assert_eq!(mount.stat("/d1"), Err(VfsError::NotFound));
        assert_eq!(mount.stat("/d1/f"), Err(VfsError::NotFound));
    }

    #[test]
    fn rmdir_on_non_empty_directory_fails_and_leaves_contents_intact() {
        let mount = mount_fresh();
        mount.mkdir("/d", Attributes::READ | Attributes::WRITE).unwrap();
        let mut h = mount.open("/d/f", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        h.write(b"x").unwrap();
        h.close().unwrap();

        assert_eq!(mount.rmdir("/d"), Err(VfsError::NotEmpty));
        mount.stat("/d").unwrap();
        mount.stat("/d/f").unwrap();
    }

    #[test]
    fn hard_link_survives_first_unlink_and_releases_on_second() {
        let mount = mount_fresh();
        let mut h = mount.open("/x", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        h.write(b"data").unwrap();
        h.close().unwrap();

        mount.link("/x", "/y").unwrap();
        assert_eq!(mount.stat("/x").unwrap().link_count, 2);

        mount.unlink("/x").unwrap();
        assert_eq!(mount.stat("/x"), Err(VfsError::NotFound));
        assert_eq!(mount.stat("/y").unwrap().link_count, 1);

        mount.unlink("/y").unwrap();
        assert_eq!(mount.stat("/y"), Err(VfsError::NotFound));
    }

    #[test]
    fn symlink_round_trips_through_readlink_and_resolution() {
        let mount = mount_fresh();
        let mut h = mount.open("/target", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        h.write(b"real").unwrap();
        h.close().unwrap();

        mount.symlink("/target", "/link").unwrap();
        assert_eq!(mount.readlink("/link").unwrap(), "/target");

        let mut h = mount.open("/link", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 8];
        let n = h.read(&mut buf).unwrap();
        assert_eq!(&buf[0..n], b"real");
    }

    #[test]
    fn dotdot_points_at_parent_then_retargets_on_rename() {
        let mount = mount_fresh();
        mount.mkdir("/p1", Attributes::READ | Attributes::WRITE).unwrap();
        mount.mkdir("/p2", Attributes::READ | Attributes::WRITE).unwrap();
        mount.mkdir("/p1/child", Attributes::READ | Attributes::WRITE).unwrap();

        mount.rename("/p1/child", "/p2/child").unwrap();

        // The moved directory's ".." should resolve through /p2/child/.. back
        // to /p2, not /p1: renaming it again to a sibling of /p2 must work,
        // which only holds if the dotdot link was actually retargeted.
        mount.rename("/p2/child", "/p2/child2").unwrap();
        mount.stat("/p2/child2").unwrap();
    }

    #[test]
    fn write_past_capacity_returns_a_short_write_not_an_error() {
        // 16 total blocks leaves exactly 2 free (see build_volume's layout
        // comment): enough for the root directory's own block plus two
        // more, so a 3-block write must run out of space partway through.
        let mount = mount_volume(build_volume(16));
        let mut h = mount.open("/big", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();

        let payload = vec![b'x'; 3 * 1024];
        let n = h.write(&payload).unwrap();
        assert_eq!(n, 2 * 1024, "only the two free blocks should have been written");

        let st = mount.stat("/big").unwrap();
        assert_eq!(st.size, n as u64);

        // The volume is now completely full: a further write can place
        // zero bytes, so it must fail NoSpace rather than report Ok(0).
        let mut h2 = mount.open("/another", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        assert_eq!(h2.write(b"z"), Err(VfsError::NoSpace));

        // What was already written survives and reads back intact.
        h.seek(0, SeekWhence::Set).unwrap();
        let mut readback = vec![0u8; n];
        let n2 = h.read(&mut readback).unwrap();
        assert_eq!(n2, n);
        assert_eq!(&readback[..], &payload[..n]);
    }
}
