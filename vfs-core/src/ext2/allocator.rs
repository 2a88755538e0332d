//! Block and inode bitmap allocators (§4.4)
//!
//! Both allocators scan per-group bitmaps in ascending order starting
//! from a caller-supplied preferred group (typically the group holding
//! the containing directory, for locality), set the bit, and update the
//! group descriptor and superblock counters symmetrically. Frees run the
//! same bookkeeping in reverse.

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::error::{VfsError, VfsResult};
use crate::ext2::group::GroupDescriptor;
use crate::ext2::inode::inode_location;
use crate::ext2::superblock::Superblock;

fn find_free_bit(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    bitmap_start: u64,
    bits: usize,
    block_size: usize,
) -> VfsResult<Option<usize>> {
    let bits_per_block = block_size * 8;
    let blocks_needed = (bits + bits_per_block - 1) / bits_per_block;

    for b in 0..blocks_needed {
        let data = cache.get(device, device_id, bitmap_start + b as u64)?;
        for (byte_idx, byte) in data.iter().enumerate() {
            if *byte == 0xFF {
                continue;
            }
            for bit in 0..8 {
                let global_bit = b * bits_per_block + byte_idx * 8 + bit;
                if global_bit >= bits {
                    break;
                }
                if byte & (1 << bit) == 0 {
                    return Ok(Some(global_bit));
                }
            }
        }
    }
    Ok(None)
}

fn set_bit(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    bitmap_start: u64,
    bit: usize,
    block_size: usize,
    value: bool,
) -> VfsResult<()> {
    let bits_per_block = block_size * 8;
    let block_idx = bit / bits_per_block;
    let in_block_bit = bit % bits_per_block;
    let byte_idx = in_block_bit / 8;
    let bit_pos = in_block_bit % 8;

    let mut data = cache.get(device, device_id, bitmap_start + block_idx as u64)?;
    if value {
        data[byte_idx] |= 1 << bit_pos;
    } else {
        data[byte_idx] &= !(1 << bit_pos);
    }
    cache.dirty(device, device_id, bitmap_start + block_idx as u64, data)?;
    Ok(())
}

/// Allocates one data block, preferring `preferred_group` for locality.
pub fn alloc_block(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    sb: &mut Superblock,
    groups: &mut [GroupDescriptor],
    preferred_group: u32,
) -> VfsResult<u64> {
    let group_count = groups.len() as u32;
    let block_size = sb.block_size() as usize;
    let bpg = sb.blocks_per_group as usize;

    for offset in 0..group_count {
        let g = (preferred_group + offset) % group_count;
        if groups[g as usize].free_blocks_count == 0 {
            continue;
        }
        if let Some(bit) = find_free_bit(device, cache, device_id, groups[g as usize].block_bitmap as u64, bpg, block_size)? {
            set_bit(device, cache, device_id, groups[g as usize].block_bitmap as u64, bit, block_size, true)?;
            groups[g as usize].free_blocks_count -= 1;
            sb.free_blocks_count -= 1;
            let block_num = sb.first_data_block as u64 + g as u64 * sb.blocks_per_group as u64 + bit as u64;
            return Ok(block_num);
        }
    }
    Err(VfsError::NoSpace)
}

/// Frees a data block previously returned by [`alloc_block`].
pub fn free_block(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    sb: &mut Superblock,
    groups: &mut [GroupDescriptor],
    block_num: u64,
) -> VfsResult<()> {
    let block_size = sb.block_size() as usize;
    let rel = block_num - sb.first_data_block as u64;
    let g = (rel / sb.blocks_per_group as u64) as usize;
    let bit = (rel % sb.blocks_per_group as u64) as usize;

    set_bit(device, cache, device_id, groups[g].block_bitmap as u64, bit, block_size, false)?;
    groups[g].free_blocks_count += 1;
    sb.free_blocks_count += 1;
    Ok(())
}

/// Allocates one inode, preferring `preferred_group`. Bumps
/// `used_dirs_count` when `is_directory` is set (§4.4).
pub fn alloc_inode(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    sb: &mut Superblock,
    groups: &mut [GroupDescriptor],
    preferred_group: u32,
    is_directory: bool,
) -> VfsResult<u32> {
    let group_count = groups.len() as u32;
    let block_size = sb.block_size() as usize;
    let ipg = sb.inodes_per_group as usize;

    for offset in 0..group_count {
        let g = (preferred_group + offset) % group_count;
        if groups[g as usize].free_inodes_count == 0 {
            continue;
        }
        if let Some(bit) = find_free_bit(device, cache, device_id, groups[g as usize].inode_bitmap as u64, ipg, block_size)? {
            set_bit(device, cache, device_id, groups[g as usize].inode_bitmap as u64, bit, block_size, true)?;
            groups[g as usize].free_inodes_count -= 1;
            sb.free_inodes_count -= 1;
            if is_directory {
                groups[g as usize].used_dirs_count += 1;
            }
            let inode_num = g * sb.inodes_per_group + bit as u32 + 1;
            return Ok(inode_num);
        }
    }
    Err(VfsError::NoSpace)
}

/// Frees an inode previously returned by [`alloc_inode`].
pub fn free_inode(
    device: &dyn BlockDevice,
    cache: &BlockCache,
    device_id: u64,
    sb: &mut Superblock,
    groups: &mut [GroupDescriptor],
    inode_num: u32,
    was_directory: bool,
) -> VfsResult<()> {
    let block_size = sb.block_size() as usize;
    let (group, index) = inode_location(inode_num, sb);
    set_bit(device, cache, device_id, groups[group as usize].inode_bitmap as u64, index as usize, block_size, false)?;
    groups[group as usize].free_inodes_count += 1;
    sb.free_inodes_count += 1;
    if was_directory {
        groups[group as usize].used_dirs_count = groups[group as usize].used_dirs_count.saturating_sub(1);
    }
    Ok(())
}
