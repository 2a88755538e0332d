//! Block cache
//!
//! A bounded, `N`-way set-associative LRU cache of device blocks keyed by
//! `(device_id, block_number)`, with dirty tracking and write-back (VFS
//! core component B, §4.6). Callers address cache lines the way a CPU
//! cache is addressed: a block hashes into one of `num_sets` sets, and
//! within a set the `ways` candidate lines are searched linearly and
//! evicted in LRU order.

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;
use vfs_block::{BlockDevice, BlockDeviceError};

/// Error surfaced by cache operations that touch the underlying device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// The backing device read or write failed.
    Device(BlockDeviceError),
}

impl From<BlockDeviceError> for CacheError {
    fn from(e: BlockDeviceError) -> Self {
        CacheError::Device(e)
    }
}

/// Hit/miss counters, externally observable for testing (§4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Line {
    key: Option<(u64, u64)>,
    data: Vec<u8>,
    dirty: bool,
    recency: u64,
}

impl Line {
    fn empty(block_size: usize) -> Self {
        Line {
            key: None,
            data: vec![0u8; block_size],
            dirty: false,
            recency: 0,
        }
    }
}

struct Inner {
    sets: Vec<Vec<Line>>,
    block_size: usize,
    ways: usize,
    clock: u64,
    stats: CacheStats,
}

impl Inner {
    fn set_index(&self, device_id: u64, block: u64) -> usize {
        fnv1a(device_id, block) as usize % self.sets.len()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Finds the line for `(device_id, block)` within its set, if resident.
    fn find(&self, device_id: u64, block: u64) -> Option<(usize, usize)> {
        let set_idx = self.set_index(device_id, block);
        let set = &self.sets[set_idx];
        set.iter()
            .position(|l| l.key == Some((device_id, block)))
            .map(|way| (set_idx, way))
    }

    /// Writes a dirty line back to `device` and clears its dirty flag.
    fn writeback(&mut self, device: &dyn BlockDevice, set_idx: usize, way: usize) -> Result<(), CacheError> {
        let line = &mut self.sets[set_idx][way];
        if !line.dirty {
            return Ok(());
        }
        let (_, block) = line.key.expect("dirty line must carry a key");
        device.write_blocks(block, 1, &line.data)?;
        line.dirty = false;
        Ok(())
    }

    /// Finds a line to hold `(device_id, block)`, evicting the LRU way of
    /// its set (flushing it first if dirty) if every way is occupied.
    fn allocate_line(
        &mut self,
        device: &dyn BlockDevice,
        device_id: u64,
        block: u64,
    ) -> Result<(usize, usize), CacheError> {
        let set_idx = self.set_index(device_id, block);
        let ways = self.ways;
        let set = &self.sets[set_idx];

        if let Some(way) = set.iter().position(|l| l.key.is_none()) {
            return Ok((set_idx, way));
        }
        debug_assert_eq!(set.len(), ways);

        let victim = set
            .iter()
            .enumerate()
            .min_by_key(|(_, l)| l.recency)
            .map(|(way, _)| way)
            .expect("a fully occupied set is never empty");

        self.writeback(device, set_idx, victim)?;
        Ok((set_idx, victim))
    }
}

/// FNV-1a over the two key halves; good enough distribution for the block
/// address stream an ext2-like filesystem produces (mostly sequential with
/// occasional indirect-block jumps).
fn fnv1a(device_id: u64, block: u64) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut h = OFFSET;
    for byte in device_id.to_le_bytes().iter().chain(block.to_le_bytes().iter()) {
        h ^= *byte as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

/// The block cache itself. A single lock guards the whole structure,
/// matching the leaf position `block_cache.lock` occupies in the lock
/// hierarchy (§5): callers never hold it across device I/O except for the
/// synchronous write-back that eviction requires.
pub struct BlockCache {
    inner: Mutex<Inner>,
}

impl BlockCache {
    /// Creates a cache with `num_sets` sets of `ways` lines, each holding
    /// one `block_size`-byte block.
    pub fn new(block_size: usize, num_sets: usize, ways: usize) -> Self {
        assert!(num_sets > 0 && ways > 0);
        let sets = (0..num_sets)
            .map(|_| (0..ways).map(|_| Line::empty(block_size)).collect())
            .collect();
        BlockCache {
            inner: Mutex::new(Inner {
                sets,
                block_size,
                ways,
                clock: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Reads a block, populating the cache from `device` on a miss.
    pub fn get(&self, device: &dyn BlockDevice, device_id: u64, block: u64) -> Result<Vec<u8>, CacheError> {
        let mut inner = self.inner.lock();
        if let Some((set_idx, way)) = inner.find(device_id, block) {
            inner.stats.hits += 1;
            let recency = inner.tick();
            let line = &mut inner.sets[set_idx][way];
            line.recency = recency;
            return Ok(line.data.clone());
        }

        inner.stats.misses += 1;
        let (set_idx, way) = inner.allocate_line(device, device_id, block)?;
        let block_size = inner.block_size;
        let mut data = vec![0u8; block_size];
        device.read_blocks(block, 1, &mut data)?;
        let recency = inner.tick();
        let line = &mut inner.sets[set_idx][way];
        line.key = Some((device_id, block));
        line.data = data.clone();
        line.dirty = false;
        line.recency = recency;
        Ok(data)
    }

    /// Stores `data` as the block's content and marks the line dirty,
    /// without reading the old content first (the caller is replacing it
    /// wholesale — typical after a `get`-modify-`dirty` round trip, or
    /// when writing a block the caller just allocated).
    pub fn dirty(&self, device: &dyn BlockDevice, device_id: u64, block: u64, data: Vec<u8>) -> Result<(), CacheError> {
        debug_assert_eq!(data.len(), self.inner.lock().block_size);
        let mut inner = self.inner.lock();
        let (set_idx, way) = match inner.find(device_id, block) {
            Some(pos) => pos,
            None => inner.allocate_line(device, device_id, block)?,
        };
        let recency = inner.tick();
        let line = &mut inner.sets[set_idx][way];
        line.key = Some((device_id, block));
        line.data = data;
        line.dirty = true;
        line.recency = recency;
        Ok(())
    }

    /// Writes a single block back to the device if dirty.
    pub fn flush(&self, device: &dyn BlockDevice, device_id: u64, block: u64) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        if let Some((set_idx, way)) = inner.find(device_id, block) {
            inner.writeback(device, set_idx, way)?;
        }
        Ok(())
    }

    /// Writes every dirty line back to the device.
    pub fn flush_all(&self, device: &dyn BlockDevice) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        let num_sets = inner.sets.len();
        let ways = inner.ways;
        for set_idx in 0..num_sets {
            for way in 0..ways {
                inner.writeback(device, set_idx, way)?;
            }
        }
        Ok(())
    }

    /// Drops a cached line, flushing it first if dirty.
    pub fn invalidate(&self, device: &dyn BlockDevice, device_id: u64, block: u64) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        if let Some((set_idx, way)) = inner.find(device_id, block) {
            inner.writeback(device, set_idx, way)?;
            let block_size = inner.block_size;
            inner.sets[set_idx][way] = Line::empty(block_size);
        }
        Ok(())
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}
