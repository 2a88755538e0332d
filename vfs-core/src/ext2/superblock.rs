//! ext2-like superblock (§6, §4.4)

use alloc::vec::Vec;
use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::error::{VfsError, VfsResult};

/// Expected magic value; a volume that doesn't carry it is rejected.
pub const EXT2_MAGIC: u16 = 0xEF53;

/// Byte offset of the superblock from the start of the device.
pub const SB_OFFSET: u64 = 1024;

/// Reserved on-disk size of the superblock region.
pub const SB_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub magic: u16,
    pub state: u16,
}

impl Superblock {
    /// Logical block size implied by `log_block_size`: `1024 << n`.
    pub fn block_size(&self) -> u32 {
        1024u32 << self.log_block_size
    }

    pub fn group_count(&self) -> u32 {
        (self.blocks_count + self.blocks_per_group - 1) / self.blocks_per_group
    }

    /// Block holding the group descriptor table: block 2 when the
    /// filesystem block size is 1024 (superblock occupies block 1 on its
    /// own), else block 1 (superblock and descriptors share block 0's
    /// successor).
    pub fn group_desc_start_block(&self) -> u32 {
        if self.block_size() == 1024 {
            2
        } else {
            1
        }
    }

    pub fn from_bytes(b: &[u8]) -> VfsResult<Self> {
        if b.len() < 84 {
            return Err(VfsError::Corrupted);
        }
        let u32_at = |off: usize| u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]]);
        let u16_at = |off: usize| u16::from_le_bytes([b[off], b[off + 1]]);

        let sb = Superblock {
            inodes_count: u32_at(0),
            blocks_count: u32_at(4),
            free_blocks_count: u32_at(12),
            free_inodes_count: u32_at(16),
            first_data_block: u32_at(20),
            log_block_size: u32_at(24),
            blocks_per_group: u32_at(32),
            inodes_per_group: u32_at(40),
            mtime: u32_at(44),
            wtime: u32_at(48),
            magic: u16_at(56),
            state: u16_at(58),
        };

        if sb.magic != EXT2_MAGIC {
            return Err(VfsError::Corrupted);
        }
        if sb.blocks_per_group == 0 || sb.inodes_per_group == 0 {
            return Err(VfsError::Corrupted);
        }
        Ok(sb)
    }

    pub fn to_bytes(&self, out: &mut [u8; SB_SIZE]) {
        out.fill(0);
        out[0..4].copy_from_slice(&self.inodes_count.to_le_bytes());
        out[4..8].copy_from_slice(&self.blocks_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.free_blocks_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.free_inodes_count.to_le_bytes());
        out[20..24].copy_from_slice(&self.first_data_block.to_le_bytes());
        out[24..28].copy_from_slice(&self.log_block_size.to_le_bytes());
        out[32..36].copy_from_slice(&self.blocks_per_group.to_le_bytes());
        out[40..44].copy_from_slice(&self.inodes_per_group.to_le_bytes());
        out[44..48].copy_from_slice(&self.mtime.to_le_bytes());
        out[48..52].copy_from_slice(&self.wtime.to_le_bytes());
        out[56..58].copy_from_slice(&self.magic.to_le_bytes());
        out[58..60].copy_from_slice(&self.state.to_le_bytes());
    }

    /// Reads the superblock from its fixed device offset.
    pub fn load(device: &dyn BlockDevice, cache: &BlockCache, device_id: u64) -> VfsResult<Superblock> {
        let dev_block_size = device.block_size() as u64;
        let start_block = SB_OFFSET / dev_block_size;
        let end_block = (SB_OFFSET + SB_SIZE as u64 - 1) / dev_block_size;

        let mut raw = Vec::with_capacity(((end_block - start_block + 1) * dev_block_size) as usize);
        for b in start_block..=end_block {
            raw.extend_from_slice(&cache.get(device, device_id, b)?);
        }
        let start_off = (SB_OFFSET % dev_block_size) as usize;
        Superblock::from_bytes(&raw[start_off..start_off + SB_SIZE])
    }

    /// Writes the superblock back through the cache (dirtied, not
    /// immediately flushed — callers `sync` to force write-back).
    pub fn store(&self, device: &dyn BlockDevice, cache: &BlockCache, device_id: u64) -> VfsResult<()> {
        let dev_block_size = device.block_size() as u64;
        let start_block = SB_OFFSET / dev_block_size;
        let end_block = (SB_OFFSET + SB_SIZE as u64 - 1) / dev_block_size;
        let start_off = (SB_OFFSET % dev_block_size) as usize;

        let mut raw = Vec::with_capacity(((end_block - start_block + 1) * dev_block_size) as usize);
        for b in start_block..=end_block {
            raw.extend_from_slice(&cache.get(device, device_id, b)?);
        }
        let mut sb_bytes = [0u8; SB_SIZE];
        self.to_bytes(&mut sb_bytes);
        raw[start_off..start_off + SB_SIZE].copy_from_slice(&sb_bytes);

        for (i, b) in (start_block..=end_block).enumerate() {
            let off = i * dev_block_size as usize;
            let chunk = raw[off..off + dev_block_size as usize].to_vec();
            cache.dirty(device, device_id, b, chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let sb = Superblock {
            inodes_count: 128,
            blocks_count: 1024,
            free_blocks_count: 900,
            free_inodes_count: 120,
            first_data_block: 1,
            log_block_size: 0,
            blocks_per_group: 8192,
            inodes_per_group: 128,
            mtime: 0,
            wtime: 0,
            magic: EXT2_MAGIC,
            state: 1,
        };
        let mut bytes = [0u8; SB_SIZE];
        sb.to_bytes(&mut bytes);
        let parsed = Superblock::from_bytes(&bytes).unwrap();
        assert_eq!(sb, parsed);
        assert_eq!(parsed.block_size(), 1024);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = [0u8; SB_SIZE];
        bytes[32..36].copy_from_slice(&8192u32.to_le_bytes());
        bytes[40..44].copy_from_slice(&128u32.to_le_bytes());
        assert_eq!(Superblock::from_bytes(&bytes), Err(VfsError::Corrupted));
    }
}
