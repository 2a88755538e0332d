//! ext2-like inodes and block-map resolution (§3, §4.4, §6)

use alloc::vec;
use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::error::{VfsError, VfsResult};
use crate::ext2::group::GroupDescriptor;
use crate::ext2::superblock::Superblock;
use crate::stat::{Attributes, FileKind};

pub use crate::config::FAST_SYMLINK_MAX;

/// On-disk inode size.
pub const INODE_SIZE: usize = 128;
/// Root directory inode number (1-based; 2 is the first non-reserved slot).
pub const ROOT_INODE: u32 = 2;
/// Direct block pointers per inode.
pub const DIRECT_COUNT: usize = 12;

const MODE_TYPE_MASK: u16 = 0xF000;
const MODE_FIFO: u16 = 0x1000;
const MODE_CHAR_DEVICE: u16 = 0x2000;
const MODE_DIRECTORY: u16 = 0x4000;
const MODE_BLOCK_DEVICE: u16 = 0x6000;
const MODE_REGULAR: u16 = 0x8000;
const MODE_SYMLINK: u16 = 0xA000;
const MODE_SOCKET: u16 = 0xC000;

const MODE_OWNER_READ: u16 = 0o400;
const MODE_OWNER_WRITE: u16 = 0o200;
const MODE_OWNER_EXEC: u16 = 0o100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub blocks: u32,
    pub block: [u32; 15],
}

impl Inode {
    pub fn new(kind: FileKind, attrs: Attributes, now: u32) -> Self {
        Inode {
            mode: mode_for(kind, attrs),
            uid: 0,
            size: 0,
            atime: now,
            ctime: now,
            mtime: now,
            gid: 0,
            links_count: 0,
            blocks: 0,
            block: [0; 15],
        }
    }

    pub fn kind(&self) -> FileKind {
        match self.mode & MODE_TYPE_MASK {
            MODE_DIRECTORY => FileKind::Directory,
            MODE_SYMLINK => FileKind::Symlink,
            MODE_CHAR_DEVICE | MODE_BLOCK_DEVICE | MODE_FIFO | MODE_SOCKET => FileKind::Device,
            _ => FileKind::File,
        }
    }

    pub fn attributes(&self) -> Attributes {
        let mut attrs = Attributes::empty();
        if self.mode & MODE_OWNER_READ != 0 {
            attrs |= Attributes::READ;
        }
        if self.mode & MODE_OWNER_WRITE != 0 {
            attrs |= Attributes::WRITE;
        }
        if self.mode & MODE_OWNER_EXEC != 0 {
            attrs |= Attributes::EXECUTE;
        }
        attrs
    }

    pub fn set_attributes(&mut self, attrs: Attributes) {
        self.mode &= !(MODE_OWNER_READ | MODE_OWNER_WRITE | MODE_OWNER_EXEC);
        if attrs.contains(Attributes::READ) {
            self.mode |= MODE_OWNER_READ;
        }
        if attrs.contains(Attributes::WRITE) {
            self.mode |= MODE_OWNER_WRITE;
        }
        if attrs.contains(Attributes::EXECUTE) {
            self.mode |= MODE_OWNER_EXEC;
        }
    }

    pub fn is_fast_symlink(&self) -> bool {
        self.kind() == FileKind::Symlink && (self.size as usize) <= FAST_SYMLINK_MAX
    }

    /// Reads an inline ("fast") symlink target out of the block pointer
    /// array, which real ext2 reuses as a 60-byte character buffer when
    /// the target is short enough to need no data block (§3).
    pub fn inline_symlink_target(&self) -> alloc::vec::Vec<u8> {
        let mut bytes = alloc::vec::Vec::with_capacity(FAST_SYMLINK_MAX);
        for word in &self.block {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.truncate(self.size as usize);
        bytes
    }

    pub fn set_inline_symlink_target(&mut self, target: &[u8]) {
        debug_assert!(target.len() <= FAST_SYMLINK_MAX);
        let mut bytes = [0u8; FAST_SYMLINK_MAX];
        bytes[..target.len()].copy_from_slice(target);
        for (i, word) in self.block.iter_mut().enumerate() {
            let off = i * 4;
            *word = u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
        }
        self.size = target.len() as u32;
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        let u32_at = |off: usize| u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]]);
        let u16_at = |off: usize| u16::from_le_bytes([b[off], b[off + 1]]);
        let mut block = [0u32; 15];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = u32_at(40 + i * 4);
        }
        Inode {
            mode: u16_at(0),
            uid: u16_at(2),
            size: u32_at(4),
            atime: u32_at(8),
            ctime: u32_at(12),
            mtime: u32_at(16),
            gid: u16_at(24),
            links_count: u16_at(26),
            blocks: u32_at(28),
            block,
        }
    }

    pub fn to_bytes(&self, out: &mut [u8; INODE_SIZE]) {
        out.fill(0);
        out[0..2].copy_from_slice(&self.mode.to_le_bytes());
        out[2..4].copy_from_slice(&self.uid.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.atime.to_le_bytes());
        out[12..16].copy_from_slice(&self.ctime.to_le_bytes());
        out[16..20].copy_from_slice(&self.mtime.to_le_bytes());
        out[24..26].copy_from_slice(&self.gid.to_le_bytes());
        out[26..28].copy_from_slice(&self.links_count.to_le_bytes());
        out[28..32].copy_from_slice(&self.blocks.to_le_bytes());
        for (i, word) in self.block.iter().enumerate() {
            out[40 + i * 4..44 + i * 4].copy_from_slice(&word.to_le_bytes());
        }
    }
}

fn mode_for(kind: FileKind, attrs: Attributes) -> u16 {
    let mut mode = match kind {
        FileKind::File => MODE_REGULAR,
        FileKind::Directory => MODE_DIRECTORY,
        FileKind::Symlink => MODE_SYMLINK,
        FileKind::Device => MODE_CHAR_DEVICE,
    };
    if attrs.contains(Attributes::READ) {
        mode |= MODE_OWNER_READ;
    }
    if attrs.contains(Attributes::WRITE) {
        mode |= MODE_OWNER_WRITE;
    }
    if attrs.contains(Attributes::EXECUTE) {
        mode |= MODE_OWNER_EXEC;
    }
    mode
}

/// Maps a file-type byte from a directory entry (§6) to a [`FileKind`].
pub fn kind_from_file_type_byte(b: u8) -> FileKind {
    match b {
        2 => FileKind::Directory,
        7 => FileKind::Symlink,
        3 | 4 | 5 | 6 => FileKind::Device,
        _ => FileKind::File,
    }
}

/// Maps a [`FileKind`] to its directory-entry file-type byte (§6).
pub fn file_type_byte(kind: FileKind) -> u8 {
    match kind {
        FileKind::File => 1,
        FileKind::Directory => 2,
        FileKind::Symlink => 7,
        FileKind::Device => 3,
    }
}

/// `(group, index_within_group)` for a 1-based inode number (§4.4).
pub fn inode_location(inode_num: u32, sb: &Superblock) -> (u32, u32) {
    let zero_based = inode_num - 1;
    (zero_based / sb.inodes_per_group, zero_based % sb.inodes_per_group)
}

pub fn read_inode(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    sb: &Superblock,
    groups: &[GroupDescriptor],
    inode_num: u32,
) -> VfsResult<Inode> {
    let (group, index) = inode_location(inode_num, sb);
    let gd = groups.get(group as usize).ok_or(VfsError::Corrupted)?;
    let block_size = sb.block_size() as usize;
    let byte_off = index as usize * INODE_SIZE;
    let block_num = gd.inode_table as u64 + (byte_off / block_size) as u64;
    let in_block_off = byte_off % block_size;

    let data = cache.get(device, device_id, block_num)?;
    Ok(Inode::from_bytes(&data[in_block_off..in_block_off + INODE_SIZE]))
}

pub fn write_inode(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    sb: &Superblock,
    groups: &[GroupDescriptor],
    inode_num: u32,
    inode: &Inode,
) -> VfsResult<()> {
    let (group, index) = inode_location(inode_num, sb);
    let gd = groups.get(group as usize).ok_or(VfsError::Corrupted)?;
    let block_size = sb.block_size() as usize;
    let byte_off = index as usize * INODE_SIZE;
    let block_num = gd.inode_table as u64 + (byte_off / block_size) as u64;
    let in_block_off = byte_off % block_size;

    let mut data = cache.get(device, device_id, block_num)?;
    let mut packed = [0u8; INODE_SIZE];
    inode.to_bytes(&mut packed);
    data[in_block_off..in_block_off + INODE_SIZE].copy_from_slice(&packed);
    cache.dirty(device, device_id, block_num, data)?;
    Ok(())
}

fn n_per_indirect(block_size: u32) -> u64 {
    block_size as u64 / 4
}

fn zero_block(device: &dyn BlockDevice, cache: &BlockCache, device_id: u64, block_num: u64, block_size: u32) -> VfsResult<()> {
    cache.dirty(device, device_id, block_num, vec![0u8; block_size as usize])?;
    Ok(())
}

fn read_index_entry(device: &dyn BlockDevice, cache: &BlockCache, device_id: u64, block_num: u64, idx: usize) -> VfsResult<u32> {
    let data = cache.get(device, device_id, block_num)?;
    let off = idx * 4;
    Ok(u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]))
}

fn write_index_entry(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    block_num: u64,
    idx: usize,
    value: u32,
) -> VfsResult<()> {
    let mut data = cache.get(device, device_id, block_num)?;
    let off = idx * 4;
    data[off..off + 4].copy_from_slice(&value.to_le_bytes());
    cache.dirty(device, device_id, block_num, data)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn resolve_chain(
    block_ptr: &mut u32,
    remaining_index: u64,
    levels: u32,
    block_size: u32,
    allocate_missing: bool,
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    alloc: &mut dyn FnMut() -> VfsResult<u64>,
) -> VfsResult<u64> {
    if levels == 0 {
        if *block_ptr == 0 {
            if !allocate_missing {
                return Ok(0);
            }
            *block_ptr = alloc()? as u32;
        }
        return Ok(*block_ptr as u64);
    }

    if *block_ptr == 0 {
        if !allocate_missing {
            return Ok(0);
        }
        let nb = alloc()?;
        zero_block(device, cache, device_id, nb, block_size)?;
        *block_ptr = nb as u32;
    }

    let n = n_per_indirect(block_size);
    let stride = n.pow(levels - 1);
    let idx = (remaining_index / stride) as usize;
    let rest = remaining_index % stride;

    let mut entry = read_index_entry(device, cache, device_id, *block_ptr as u64, idx)?;
    let before = entry;
    let result = resolve_chain(&mut entry, rest, levels - 1, block_size, allocate_missing, device, cache, device_id, alloc)?;
    if entry != before {
        write_index_entry(device, cache, device_id, *block_ptr as u64, idx, entry)?;
    }
    Ok(result)
}

/// Maps logical block index `k` of `inode` to a physical block number
/// (§4.4). Returns `0` for a sparse hole when `allocate_missing` is
/// false; otherwise allocates (via `alloc`) whatever direct or index
/// blocks are missing along the way.
#[allow(clippy::too_many_arguments)]
pub fn resolve_block(
    inode: &mut Inode,
    k: u64,
    block_size: u32,
    allocate_missing: bool,
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    mut alloc: impl FnMut() -> VfsResult<u64>,
) -> VfsResult<u64> {
    let n = n_per_indirect(block_size);

    if k < DIRECT_COUNT as u64 {
        return resolve_chain(
            &mut inode.block[k as usize],
            0,
            0,
            block_size,
            allocate_missing,
            device,
            cache,
            device_id,
            &mut alloc,
        );
    }
    let k = k - DIRECT_COUNT as u64;

    if k < n {
        return resolve_chain(&mut inode.block[12], k, 1, block_size, allocate_missing, device, cache, device_id, &mut alloc);
    }
    let k = k - n;

    if k < n * n {
        return resolve_chain(&mut inode.block[13], k, 2, block_size, allocate_missing, device, cache, device_id, &mut alloc);
    }
    let k = k - n * n;

    if k < n * n * n {
        return resolve_chain(&mut inode.block[14], k, 3, block_size, allocate_missing, device, cache, device_id, &mut alloc);
    }

    Err(VfsError::InvalidArg)
}

fn take_chain(
    block_ptr: &mut u32,
    remaining_index: u64,
    levels: u32,
    block_size: u32,
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
) -> VfsResult<u64> {
    if *block_ptr == 0 {
        return Ok(0);
    }
    if levels == 0 {
        let taken = *block_ptr as u64;
        *block_ptr = 0;
        return Ok(taken);
    }

    let n = n_per_indirect(block_size);
    let stride = n.pow(levels - 1);
    let idx = (remaining_index / stride) as usize;
    let rest = remaining_index % stride;

    let mut entry = read_index_entry(device, cache, device_id, *block_ptr as u64, idx)?;
    let before = entry;
    let taken = take_chain(&mut entry, rest, levels - 1, block_size, device, cache, device_id)?;
    if entry != before {
        write_index_entry(device, cache, device_id, *block_ptr as u64, idx, entry)?;
    }
    Ok(taken)
}

/// Reclaims the physical block backing logical index `k` of `inode`,
/// zeroing the pointer that held it (§4.4, truncate-shrink). Returns `0`
/// for a logical index that was already a sparse hole.
///
/// Index blocks (single/double/triple indirect) are left allocated even
/// once every child pointer they hold has been zeroed; reclaiming those
/// themselves is not implemented.
pub fn take_block(
    inode: &mut Inode,
    k: u64,
    block_size: u32,
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
) -> VfsResult<u64> {
    let n = n_per_indirect(block_size);

    if k < DIRECT_COUNT as u64 {
        return take_chain(&mut inode.block[k as usize], 0, 0, block_size, device, cache, device_id);
    }
    let k = k - DIRECT_COUNT as u64;

    if k < n {
        return take_chain(&mut inode.block[12], k, 1, block_size, device, cache, device_id);
    }
    let k = k - n;

    if k < n * n {
        return take_chain(&mut inode.block[13], k, 2, block_size, device, cache, device_id);
    }
    let k = k - n * n;

    if k < n * n * n {
        return take_chain(&mut inode.block[14], k, 3, block_size, device, cache, device_id);
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_round_trips_through_bytes() {
        let mut inode = Inode::new(FileKind::File, Attributes::READ | Attributes::WRITE, 100);
        inode.size = 4096;
        inode.links_count = 1;
        inode.block[0] = 42;
        let mut bytes = [0u8; INODE_SIZE];
        inode.to_bytes(&mut bytes);
        let parsed = Inode::from_bytes(&bytes);
        assert_eq!(parsed, inode);
    }

    #[test]
    fn fast_symlink_round_trips() {
        let mut inode = Inode::new(FileKind::Symlink, Attributes::empty(), 0);
        inode.set_inline_symlink_target(b"/etc/passwd");
        assert!(inode.is_fast_symlink());
        assert_eq!(inode.inline_symlink_target(), b"/etc/passwd");
    }

    #[test]
    fn inode_location_matches_group_math() {
        let sb = Superblock {
            inodes_count: 256,
            blocks_count: 4096,
            free_blocks_count: 0,
            free_inodes_count: 0,
            first_data_block: 1,
            log_block_size: 0,
            blocks_per_group: 2048,
            inodes_per_group: 128,
            mtime: 0,
            wtime: 0,
            magic: crate::ext2::superblock::EXT2_MAGIC,
            state: 1,
        };
        assert_eq!(inode_location(2, &sb), (0, 1));
        assert_eq!(inode_location(129, &sb), (1, 0));
    }

    struct MemDevice {
        block_size: usize,
        blocks: spin::Mutex<alloc::vec::Vec<alloc::vec::Vec<u8>>>,
    }

    impl MemDevice {
        fn new(block_size: usize, count: usize) -> Self {
            MemDevice {
                block_size,
                blocks: spin::Mutex::new(vec![vec![0u8; block_size]; count]),
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
        fn read_blocks(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), vfs_block::BlockDeviceError> {
            let blocks = self.blocks.lock();
            for i in 0..count as u64 {
                let src = blocks.get((lba + i) as usize).ok_or(vfs_block::BlockDeviceError::OutOfRange)?;
                let off = i as usize * self.block_size;
                buf[off..off + self.block_size].copy_from_slice(src);
            }
            Ok(())
        }
        fn write_blocks(&self, lba: u64, count: u32, buf: &[u8]) -> Result<(), vfs_block::BlockDeviceError> {
            let mut blocks = self.blocks.lock();
            for i in 0..count as u64 {
                let dst = blocks.get_mut((lba + i) as usize).ok_or(vfs_block::BlockDeviceError::OutOfRange)?;
                let off = i as usize * self.block_size;
                dst.copy_from_slice(&buf[off..off + self.block_size]);
            }
            Ok(())
        }
        fn sync(&self) -> Result<(), vfs_block::BlockDeviceError> {
            Ok(())
        }
    }

    #[test]
    fn take_block_zeroes_direct_pointer_and_returns_it() {
        let dev = MemDevice::new(1024, 8);
        let cache = BlockCache::new(1024, 4, 2);
        let mut inode = Inode::new(FileKind::File, Attributes::READ, 0);
        inode.block[3] = 7;

        let taken = take_block(&mut inode, 3, 1024, &dev, &cache, 0).unwrap();
        assert_eq!(taken, 7);
        assert_eq!(inode.block[3], 0);

        let taken_again = take_block(&mut inode, 3, 1024, &dev, &cache, 0).unwrap();
        assert_eq!(taken_again, 0, "already-sparse hole takes nothing");
    }

    #[test]
    fn take_block_through_single_indirect_leaves_index_block_allocated() {
        let dev = MemDevice::new(1024, 8);
        let cache = BlockCache::new(1024, 4, 2);
        let mut inode = Inode::new(FileKind::File, Attributes::READ, 0);

        let data_block = resolve_block(&mut inode, DIRECT_COUNT as u64, 1024, true, &dev, &cache, 0, {
            let mut next = 100u64;
            move || {
                next += 1;
                Ok(next)
            }
        })
        .unwrap();
        assert_ne!(data_block, 0);
        let index_block = inode.block[12];
        assert_ne!(index_block, 0);

        let taken = take_block(&mut inode, DIRECT_COUNT as u64, 1024, &dev, &cache, 0).unwrap();
        assert_eq!(taken, data_block);
        assert_eq!(inode.block[12], index_block, "index block itself is not reclaimed");
    }
}
