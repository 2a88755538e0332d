//! exFAT read-only driver (§2 stub driver set)
//!
//! exFAT's directory format uses chained 32-byte records (a primary entry
//! plus a stream extension plus one or more name fragments) rather than
//! FAT12/16's flat 8.3 record, and cluster chains are described by a
//! bitmap-backed allocator the boot sector points at directly. This
//! driver recognizes a volume and reads files sitting directly under the
//! root directory; it does not walk subdirectories or the up-case table,
//! which is enough to demonstrate the capability set without carrying
//! a full exFAT implementation.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::driver::{DirHandleOps, FileHandleOps, FsDriver, MountFlags, MountState, OpenFlags};
use crate::error::{ReadDirOutcome, VfsError, VfsResult};
use crate::stat::{Attributes, DirEntry, FileKind, Stat, StatFs, Timestamps};

const SECTOR_SIZE: usize = 512;
const DIR_RECORD_SIZE: usize = 32;
const ENTRY_TYPE_FILE: u8 = 0x85;
const ENTRY_TYPE_STREAM_EXT: u8 = 0xC0;
const ENTRY_TYPE_FILE_NAME: u8 = 0xC1;
const ATTR_DIRECTORY: u16 = 0x0010;
const ATTR_READ_ONLY: u16 = 0x0001;

#[derive(Clone, Copy)]
struct BootSector {
    bytes_per_sector_shift: u8,
    sectors_per_cluster_shift: u8,
    cluster_heap_offset: u32,
    first_cluster_of_root_directory: u32,
}

impl BootSector {
    fn parse(raw: &[u8]) -> VfsResult<Self> {
        if raw.len() < SECTOR_SIZE || &raw[3..11] != b"EXFAT   " {
            return Err(VfsError::Corrupted);
        }
        let u32_at = |off: usize| u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);
        Ok(BootSector {
            cluster_heap_offset: u32_at(88),
            first_cluster_of_root_directory: u32_at(96),
            bytes_per_sector_shift: raw[108],
            sectors_per_cluster_shift: raw[109],
        })
    }

    fn sector_size(&self) -> usize {
        1usize << self.bytes_per_sector_shift
    }

    fn cluster_size(&self) -> usize {
        self.sector_size() << self.sectors_per_cluster_shift
    }

    fn cluster_to_sector(&self, cluster: u32) -> u64 {
        self.cluster_heap_offset as u64 + (cluster as u64 - 2) * (1u64 << self.sectors_per_cluster_shift)
    }
}

struct ExfatEntry {
    name: String,
    is_directory: bool,
    read_only: bool,
    first_cluster: u32,
    data_length: u64,
}

pub struct ExfatMount {
    device: Arc<dyn BlockDevice>,
    cache: Arc<BlockCache>,
    device_id: u64,
    boot: BootSector,
}

impl ExfatMount {
    fn read_sector(&self, sector: u64) -> VfsResult<Vec<u8>> {
        Ok(self.cache.get(self.device.as_ref(), self.device_id, sector)?)
    }

    fn read_cluster(&self, cluster: u32) -> VfsResult<Vec<u8>> {
        let start = self.boot.cluster_to_sector(cluster);
        let sectors_per_cluster = self.boot.cluster_size() / self.boot.sector_size();
        let mut data = Vec::with_capacity(self.boot.cluster_size());
        for s in 0..sectors_per_cluster as u64 {
            data.extend_from_slice(&self.read_sector(start + s)?);
        }
        Ok(data)
    }

    /// Parses only the first cluster of a directory — adequate for a
    /// root directory with a handful of entries, not a general walk of
    /// an arbitrarily long chain.
    fn read_directory(&self, first_cluster: u32) -> VfsResult<Vec<ExfatEntry>> {
        let raw = self.read_cluster(first_cluster)?;
        let mut out = Vec::new();
        let mut i = 0;
        while i + DIR_RECORD_SIZE <= raw.len() {
            let record = &raw[i..i + DIR_RECORD_SIZE];
            if record[0] == ENTRY_TYPE_FILE {
                let attrs = u16::from_le_bytes([record[4], record[5]]);
                if i + 2 * DIR_RECORD_SIZE <= raw.len() && raw[i + DIR_RECORD_SIZE] == ENTRY_TYPE_STREAM_EXT {
                    let stream = &raw[i + DIR_RECORD_SIZE..i + 2 * DIR_RECORD_SIZE];
                    let name_length = stream[3] as usize;
                    let first_cluster = u32::from_le_bytes([stream[20], stream[21], stream[22], stream[23]]);
                    let data_length = u64::from_le_bytes([
                        stream[24], stream[25], stream[26], stream[27], stream[28], stream[29], stream[30], stream[31],
                    ]);

                    let mut name_units: Vec<u16> = Vec::with_capacity(name_length);
                    let mut j = i + 2 * DIR_RECORD_SIZE;
                    while name_units.len() < name_length && j + DIR_RECORD_SIZE <= raw.len() && raw[j] == ENTRY_TYPE_FILE_NAME {
                        let chunk = &raw[j + 2..j + DIR_RECORD_SIZE];
                        for pair in chunk.chunks_exact(2) {
                            if name_units.len() >= name_length {
                                break;
                            }
                            name_units.push(u16::from_le_bytes([pair[0], pair[1]]));
                        }
                        j += DIR_RECORD_SIZE;
                    }
                    let name = String::from_utf16_lossy(&name_units);

                    out.push(ExfatEntry {
                        name,
                        is_directory: attrs & ATTR_DIRECTORY != 0,
                        read_only: attrs & ATTR_READ_ONLY != 0,
                        first_cluster,
                        data_length,
                    });
                    i = j;
                    continue;
                }
            }
            i += DIR_RECORD_SIZE;
        }
        Ok(out)
    }

    fn lookup(&self, path: &str) -> VfsResult<ExfatEntry> {
        let name = path.trim_start_matches('/');
        if name.is_empty() {
            return Err(VfsError::InvalidArg);
        }
        if name.contains('/') {
            return Err(VfsError::Unsupported);
        }
        let entries = self.read_directory(self.boot.first_cluster_of_root_directory)?;
        entries
            .into_iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .ok_or(VfsError::NotFound)
    }
}

fn entry_attributes(e: &ExfatEntry) -> Attributes {
    let mut a = Attributes::READ;
    if !e.read_only {
        a |= Attributes::WRITE;
    }
    a
}

impl MountState for ExfatMount {
    fn unmount(&self) -> VfsResult<()> {
        Ok(())
    }

    fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Box<dyn FileHandleOps>> {
        if flags.intersects(OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE) {
            return Err(VfsError::ReadOnly);
        }
        let entry = self.lookup(path)?;
        if entry.is_directory {
            return Err(VfsError::IsDirectory);
        }
        let mut data = self.read_cluster(entry.first_cluster)?;
        data.truncate(entry.data_length as usize);
        Ok(Box::new(ExfatFileHandle { data, position: 0 }))
    }

    fn stat(&self, path: &str) -> VfsResult<Stat> {
        let entry = self.lookup(path)?;
        Ok(Stat {
            kind: if entry.is_directory { FileKind::Directory } else { FileKind::File },
            size: entry.data_length,
            attributes: entry_attributes(&entry),
            timestamps: Timestamps::default(),
            link_count: 1,
        })
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        Ok(StatFs {
            block_size: self.boot.cluster_size() as u32,
            total_blocks: 0,
            free_blocks: 0,
            total_inodes: 0,
            free_inodes: 0,
            read_only: true,
        })
    }

    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirHandleOps>> {
        let cluster = if path.is_empty() || path == "/" {
            self.boot.first_cluster_of_root_directory
        } else {
            let entry = self.lookup(path)?;
            if !entry.is_directory {
                return Err(VfsError::NotDirectory);
            }
            entry.first_cluster
        };
        let entries = self.read_directory(cluster)?;
        Ok(Box::new(ExfatDirHandle { entries, pos: 0 }))
    }
}

struct ExfatFileHandle {
    data: Vec<u8>,
    position: u64,
}

impl FileHandleOps for ExfatFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let pos = self.position as usize;
        if pos >= self.data.len() {
            return Ok(0);
        }
        let n = (self.data.len() - pos).min(buf.len());
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn tell(&self) -> VfsResult<u64> {
        Ok(self.position)
    }
}

struct ExfatDirHandle {
    entries: Vec<ExfatEntry>,
    pos: usize,
}

impl DirHandleOps for ExfatDirHandle {
    fn readdir(&mut self) -> VfsResult<ReadDirOutcome> {
        if self.pos >= self.entries.len() {
            return Ok(ReadDirOutcome::EndOfDirectory);
        }
        let entry = &self.entries[self.pos];
        self.pos += 1;
        Ok(ReadDirOutcome::Entry(DirEntry {
            name: entry.name.clone(),
            kind: if entry.is_directory { FileKind::Directory } else { FileKind::File },
            size: entry.data_length,
            attributes: entry_attributes(entry),
            timestamps: Timestamps::default(),
        }))
    }
}

pub struct ExfatDriver;

impl ExfatDriver {
    pub fn new() -> Self {
        ExfatDriver
    }
}

impl Default for ExfatDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FsDriver for ExfatDriver {
    fn name(&self) -> &str {
        "exfat"
    }

    fn mount(
        &self,
        device: Arc<dyn BlockDevice>,
        cache: Arc<BlockCache>,
        device_id: u64,
        _flags: MountFlags,
    ) -> VfsResult<Box<dyn MountState>> {
        let raw = cache.get(device.as_ref(), device_id, 0)?;
        let boot = BootSector::parse(&raw)?;
        Ok(Box::new(ExfatMount {
            device,
            cache,
            device_id,
            boot,
        }))
    }
}
