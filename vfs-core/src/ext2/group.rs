//! Block group descriptors (§3, §6)

use alloc::vec::Vec;
use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::error::VfsResult;
use crate::ext2::superblock::Superblock;

/// On-disk size of one descriptor.
pub const GROUP_DESC_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl GroupDescriptor {
    pub fn from_bytes(b: &[u8]) -> Self {
        let u32_at = |off: usize| u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]]);
        let u16_at = |off: usize| u16::from_le_bytes([b[off], b[off + 1]]);
        GroupDescriptor {
            block_bitmap: u32_at(0),
            inode_bitmap: u32_at(4),
            inode_table: u32_at(8),
            free_blocks_count: u16_at(12),
            free_inodes_count: u16_at(14),
            used_dirs_count: u16_at(16),
        }
    }

    pub fn to_bytes(&self, out: &mut [u8]) {
        out[..GROUP_DESC_SIZE].fill(0);
        out[0..4].copy_from_slice(&self.block_bitmap.to_le_bytes());
        out[4..8].copy_from_slice(&self.inode_bitmap.to_le_bytes());
        out[8..12].copy_from_slice(&self.inode_table.to_le_bytes());
        out[12..14].copy_from_slice(&self.free_blocks_count.to_le_bytes());
        out[14..16].copy_from_slice(&self.free_inodes_count.to_le_bytes());
        out[16..18].copy_from_slice(&self.used_dirs_count.to_le_bytes());
    }
}

/// Reads every group descriptor, spanning as many filesystem blocks as
/// `group_count * 32` bytes require starting at `sb.group_desc_start_block()`.
pub fn load_table(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    sb: &Superblock,
) -> VfsResult<Vec<GroupDescriptor>> {
    let block_size = sb.block_size() as usize;
    let group_count = sb.group_count() as usize;
    let total_bytes = group_count * GROUP_DESC_SIZE;
    let blocks_needed = (total_bytes + block_size - 1) / block_size;

    let mut raw = Vec::with_capacity(blocks_needed * block_size);
    let start = sb.group_desc_start_block() as u64;
    for i in 0..blocks_needed as u64 {
        raw.extend_from_slice(&cache.get(device, device_id, start + i)?);
    }

    let mut groups = Vec::with_capacity(group_count);
    for g in 0..group_count {
        let off = g * GROUP_DESC_SIZE;
        groups.push(GroupDescriptor::from_bytes(&raw[off..off + GROUP_DESC_SIZE]));
    }
    Ok(groups)
}

/// Writes every group descriptor back through the cache.
pub fn store_table(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    sb: &Superblock,
    groups: &[GroupDescriptor],
) -> VfsResult<()> {
    let block_size = sb.block_size() as usize;
    let total_bytes = groups.len() * GROUP_DESC_SIZE;
    let blocks_needed = (total_bytes + block_size - 1) / block_size;
    let start = sb.group_desc_start_block() as u64;

    let mut raw = Vec::with_capacity(blocks_needed * block_size);
    for i in 0..blocks_needed as u64 {
        raw.extend_from_slice(&cache.get(device, device_id, start + i)?);
    }
    for (g, gd) in groups.iter().enumerate() {
        let off = g * GROUP_DESC_SIZE;
        gd.to_bytes(&mut raw[off..off + GROUP_DESC_SIZE]);
    }
    for i in 0..blocks_needed {
        let chunk = raw[i * block_size..(i + 1) * block_size].to_vec();
        cache.dirty(device, device_id, start + i as u64, chunk)?;
    }
    Ok(())
}
