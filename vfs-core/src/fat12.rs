//! FAT12 read-only driver (§2 stub driver set)
//!
//! FAT12 is the format used on the first generation of floppy disks and
//! still turns up on small flash images. This driver demonstrates the
//! capability-set model (§4.3) at its read-only extreme: every mutating
//! `MountState`/`FileHandleOps` method keeps its default `Unsupported`
//! body, and only the boot sector, FAT table, and root directory are ever
//! parsed — there is no notion of writing a cluster chain back.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::driver::{DirHandleOps, FileHandleOps, FsDriver, MountFlags, MountState, OpenFlags};
use crate::error::{ReadDirOutcome, VfsError, VfsResult};
use crate::stat::{Attributes, DirEntry, FileKind, Stat, StatFs, Timestamps};

const SECTOR_SIZE: usize = 512;
const DIR_ENTRY_SIZE: usize = 32;
const ATTR_READ_ONLY: u8 = 0x01;
const ATTR_HIDDEN: u8 = 0x02;
const ATTR_SYSTEM: u8 = 0x04;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const FAT12_EOC_MIN: u16 = 0x0FF8;
const FAT12_FREE: u16 = 0x000;

#[derive(Clone, Copy)]
struct BootSector {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    root_entry_count: u16,
    total_sectors: u32,
    sectors_per_fat: u16,
}

impl BootSector {
    fn parse(raw: &[u8]) -> VfsResult<Self> {
        if raw.len() < SECTOR_SIZE {
            return Err(VfsError::Corrupted);
        }
        let u16_at = |off: usize| u16::from_le_bytes([raw[off], raw[off + 1]]);
        let u32_at = |off: usize| u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);

        let bytes_per_sector = u16_at(11);
        let sectors_per_cluster = raw[13];
        let reserved_sectors = u16_at(14);
        let num_fats = raw[16];
        let root_entry_count = u16_at(17);
        let total_sectors_16 = u16_at(19);
        let sectors_per_fat = u16_at(22);
        let total_sectors_32 = u32_at(32);

        if bytes_per_sector as usize != SECTOR_SIZE || sectors_per_cluster == 0 || num_fats == 0 || sectors_per_fat == 0 {
            return Err(VfsError::Corrupted);
        }

        let total_sectors = if total_sectors_16 != 0 {
            total_sectors_16 as u32
        } else {
            total_sectors_32
        };

        Ok(BootSector {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            root_entry_count,
            total_sectors,
            sectors_per_fat,
        })
    }

    fn root_dir_start_sector(&self) -> u32 {
        self.reserved_sectors as u32 + self.num_fats as u32 * self.sectors_per_fat as u32
    }

    fn root_dir_sectors(&self) -> u32 {
        let bytes = self.root_entry_count as u32 * DIR_ENTRY_SIZE as u32;
        (bytes + self.bytes_per_sector as u32 - 1) / self.bytes_per_sector as u32
    }

    fn data_start_sector(&self) -> u32 {
        self.root_dir_start_sector() + self.root_dir_sectors()
    }

    fn cluster_to_sector(&self, cluster: u16) -> u32 {
        self.data_start_sector() + (cluster as u32 - 2) * self.sectors_per_cluster as u32
    }

    fn cluster_size(&self) -> usize {
        self.sectors_per_cluster as usize * self.bytes_per_sector as usize
    }
}

#[derive(Clone)]
struct RawEntry {
    name: String,
    attr: u8,
    first_cluster: u16,
    size: u32,
}

fn short_name(raw: &[u8]) -> String {
    let base = core::str::from_utf8(&raw[0..8]).unwrap_or("").trim_end();
    let ext = core::str::from_utf8(&raw[8..11]).unwrap_or("").trim_end();
    if ext.is_empty() {
        String::from(base)
    } else {
        let mut s = String::from(base);
        s.push('.');
        s.push_str(ext);
        s
    }
}

pub struct Fat12Mount {
    device: Arc<dyn BlockDevice>,
    cache: Arc<BlockCache>,
    device_id: u64,
    boot: BootSector,
    fat: Mutex<Vec<u8>>,
}

impl Fat12Mount {
    fn read_sector(&self, sector: u32) -> VfsResult<Vec<u8>> {
        Ok(self.cache.get(self.device.as_ref(), self.device_id, sector as u64)?)
    }

    fn fat_entry(&self, cluster: u16) -> u16 {
        let fat = self.fat.lock();
        let offset = cluster as usize + (cluster as usize / 2);
        if offset + 1 >= fat.len() {
            return FAT12_EOC_MIN;
        }
        let word = u16::from_le_bytes([fat[offset], fat[offset + 1]]);
        if cluster % 2 == 0 {
            word & 0x0FFF
        } else {
            word >> 4
        }
    }

    fn cluster_chain(&self, first_cluster: u16) -> VfsResult<Vec<u16>> {
        let mut chain = Vec::new();
        let mut cur = first_cluster;
        let max_steps = 65536;
        for _ in 0..max_steps {
            if cur < 2 {
                break;
            }
            chain.push(cur);
            let next = self.fat_entry(cur);
            if next >= FAT12_EOC_MIN || next == FAT12_FREE {
                break;
            }
            cur = next;
        }
        Ok(chain)
    }

    fn read_cluster_chain(&self, first_cluster: u16) -> VfsResult<Vec<u8>> {
        let chain = self.cluster_chain(first_cluster)?;
        let mut data = Vec::with_capacity(chain.len() * self.boot.cluster_size());
        for cluster in chain {
            let start_sector = self.boot.cluster_to_sector(cluster);
            for s in 0..self.boot.sectors_per_cluster as u32 {
                data.extend_from_slice(&self.read_sector(start_sector + s)?);
            }
        }
        Ok(data)
    }

    fn read_root_directory(&self) -> VfsResult<Vec<RawEntry>> {
        let mut raw = Vec::new();
        let start = self.boot.root_dir_start_sector();
        for s in 0..self.boot.root_dir_sectors() {
            raw.extend_from_slice(&self.read_sector(start + s)?);
        }
        Ok(parse_dir_entries(&raw))
    }

    fn read_dir_at_cluster(&self, first_cluster: u16) -> VfsResult<Vec<RawEntry>> {
        let raw = self.read_cluster_chain(first_cluster)?;
        Ok(parse_dir_entries(&raw))
    }

    fn lookup(&self, path: &str) -> VfsResult<RawEntry> {
        let mut entries = self.read_root_directory()?;
        let comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if comps.is_empty() {
            return Ok(RawEntry {
                name: String::from("/"),
                attr: ATTR_DIRECTORY,
                first_cluster: 0,
                size: 0,
            });
        }
        let mut found: Option<RawEntry> = None;
        for (i, comp) in comps.iter().enumerate() {
            found = entries.iter().find(|e| e.name.eq_ignore_ascii_case(comp)).cloned();
            let entry = found.as_ref().ok_or(VfsError::NotFound)?;
            let last = i + 1 == comps.len();
            if !last {
                if entry.attr & ATTR_DIRECTORY == 0 {
                    return Err(VfsError::NotDirectory);
                }
                entries = self.read_dir_at_cluster(entry.first_cluster)?;
            }
        }
        found.ok_or(VfsError::NotFound)
    }
}

fn parse_dir_entries(raw: &[u8]) -> Vec<RawEntry> {
    let mut out = Vec::new();
    for chunk in raw.chunks(DIR_ENTRY_SIZE) {
        if chunk.len() < DIR_ENTRY_SIZE {
            break;
        }
        if chunk[0] == 0x00 {
            break;
        }
        if chunk[0] == 0xE5 {
            continue;
        }
        let attr = chunk[11];
        if attr == 0x0F {
            continue;
        }
        if attr & ATTR_VOLUME_ID != 0 {
            continue;
        }
        let name = short_name(chunk);
        if name == "." || name == ".." {
            continue;
        }
        let first_cluster = u16::from_le_bytes([chunk[26], chunk[27]]);
        let size = u32::from_le_bytes([chunk[28], chunk[29], chunk[30], chunk[31]]);
        out.push(RawEntry {
            name,
            attr,
            first_cluster,
            size,
        });
    }
    out
}

fn entry_attributes(attr: u8) -> Attributes {
    let mut a = Attributes::READ;
    if attr & ATTR_READ_ONLY == 0 {
        a |= Attributes::WRITE;
    }
    if attr & ATTR_HIDDEN != 0 {
        a |= Attributes::HIDDEN;
    }
    if attr & ATTR_SYSTEM != 0 {
        a |= Attributes::SYSTEM;
    }
    a
}

impl MountState for Fat12Mount {
    fn unmount(&self) -> VfsResult<()> {
        Ok(())
    }

    fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Box<dyn FileHandleOps>> {
        if flags.intersects(OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE) {
            return Err(VfsError::ReadOnly);
        }
        let entry = self.lookup(path)?;
        if entry.attr & ATTR_DIRECTORY != 0 {
            return Err(VfsError::IsDirectory);
        }
        let data = self.read_cluster_chain(entry.first_cluster)?;
        Ok(Box::new(Fat12FileHandle {
            data,
            size: entry.size as u64,
            position: 0,
        }))
    }

    fn stat(&self, path: &str) -> VfsResult<Stat> {
        let entry = self.lookup(path)?;
        let kind = if entry.attr & ATTR_DIRECTORY != 0 {
            FileKind::Directory
        } else {
            FileKind::File
        };
        Ok(Stat {
            kind,
            size: entry.size as u64,
            attributes: entry_attributes(entry.attr),
            timestamps: Timestamps::default(),
            link_count: 1,
        })
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        Ok(StatFs {
            block_size: self.boot.cluster_size() as u32,
            total_blocks: self.boot.total_sectors as u64 / self.boot.sectors_per_cluster as u64,
            free_blocks: 0,
            total_inodes: 0,
            free_inodes: 0,
            read_only: true,
        })
    }

    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirHandleOps>> {
        let entries = if path.is_empty() || path == "/" {
            self.read_root_directory()?
        } else {
            let entry = self.lookup(path)?;
            if entry.attr & ATTR_DIRECTORY == 0 {
                return Err(VfsError::NotDirectory);
            }
            self.read_dir_at_cluster(entry.first_cluster)?
        };
        Ok(Box::new(Fat12DirHandle { entries, pos: 0 }))
    }
}

struct Fat12FileHandle {
    data: Vec<u8>,
    size: u64,
    position: u64,
}

impl FileHandleOps for Fat12FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.position >= self.size {
            return Ok(0);
        }
        let remaining = (self.size - self.position) as usize;
        let n = remaining.min(buf.len()).min(self.data.len().saturating_sub(self.position as usize));
        let start = self.position as usize;
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn tell(&self) -> VfsResult<u64> {
        Ok(self.position)
    }
}

struct Fat12DirHandle {
    entries: Vec<RawEntry>,
    pos: usize,
}

impl DirHandleOps for Fat12DirHandle {
    fn readdir(&mut self) -> VfsResult<ReadDirOutcome> {
        if self.pos >= self.entries.len() {
            return Ok(ReadDirOutcome::EndOfDirectory);
        }
        let entry = &self.entries[self.pos];
        self.pos += 1;
        let kind = if entry.attr & ATTR_DIRECTORY != 0 {
            FileKind::Directory
        } else {
            FileKind::File
        };
        Ok(ReadDirOutcome::Entry(DirEntry {
            name: entry.name.clone(),
            kind,
            size: entry.size as u64,
            attributes: entry_attributes(entry.attr),
            timestamps: Timestamps::default(),
        }))
    }
}

pub struct Fat12Driver;

impl Fat12Driver {
    pub fn new() -> Self {
        Fat12Driver
    }
}

impl Default for Fat12Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl FsDriver for Fat12Driver {
    fn name(&self) -> &str {
        "fat12"
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

        let fat_start = boot.reserved_sectors as u32;
        let mut fat = vec![0u8; boot.sectors_per_fat as usize * SECTOR_SIZE];
        for s in 0..boot.sectors_per_fat as u32 {
            let sector = cache.get(device.as_ref(), device_id, (fat_start + s) as u64)?;
            let off = s as usize * SECTOR_SIZE;
            fat[off..off + SECTOR_SIZE].copy_from_slice(&sector);
        }

        Ok(Box::new(Fat12Mount {
            device,
            cache,
            device_id,
            boot,
            fat: Mutex::new(fat),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfs_block::BlockDeviceError;
    use std::sync::Mutex as StdMutex;

    struct MemDevice {
        data: StdMutex<Vec<u8>>,
        block_size: usize,
    }

    impl MemDevice {
        fn new(data: Vec<u8>, block_size: usize) -> Self {
            MemDevice {
                data: StdMutex::new(data),
                block_size,
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
            (self.data.lock().unwrap().len() / self.block_size) as u64
        }
        fn read_blocks(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), BlockDeviceError> {
            let data = self.data.lock().unwrap();
            let start = lba as usize * self.block_size;
            let len = count as usize * self.block_size;
            if start + len > data.len() {
                return Err(BlockDeviceError::OutOfRange);
            }
            buf[..len].copy_from_slice(&data[start..start + len]);
            Ok(())
        }
        fn write_blocks(&self, _lba: u64, _count: u32, _buf: &[u8]) -> Result<(), BlockDeviceError> {
            Err(BlockDeviceError::ReadOnly)
        }
        fn sync(&self) -> Result<(), BlockDeviceError> {
            Ok(())
        }
    }

    fn build_image() -> Vec<u8> {
        let sectors_per_fat = 1u16;
        let reserved = 1u16;
        let root_entries = 16u16;
        let total_sectors = 64u16;
        let mut image = vec![0u8; total_sectors as usize * SECTOR_SIZE];

        image[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        image[13] = 1; // sectors per cluster
        image[14..16].copy_from_slice(&reserved.to_le_bytes());
        image[16] = 2; // num fats
        image[17..19].copy_from_slice(&root_entries.to_le_bytes());
        image[19..21].copy_from_slice(&total_sectors.to_le_bytes());
        image[22..24].copy_from_slice(&sectors_per_fat.to_le_bytes());

        let fat_start = reserved as usize * SECTOR_SIZE;
        image[fat_start] = 0xF8;
        image[fat_start + 1] = 0xFF;
        image[fat_start + 2] = 0xFF;
        // cluster 2 -> EOC
        image[fat_start + 3] = 0xFF;
        image[fat_start + 4] = 0x0F;

        let root_start = fat_start + 2 * sectors_per_fat as usize * SECTOR_SIZE;
        let entry = &mut image[root_start..root_start + DIR_ENTRY_SIZE];
        entry[0..8].copy_from_slice(b"HELLO   ");
        entry[8..11].copy_from_slice(b"TXT");
        entry[11] = 0x20; // archive
        entry[26..28].copy_from_slice(&2u16.to_le_bytes());
        entry[28..32].copy_from_slice(&5u32.to_le_bytes());

        let root_sectors = ((root_entries as u32 * DIR_ENTRY_SIZE as u32) + SECTOR_SIZE as u32 - 1) / SECTOR_SIZE as u32;
        let data_start = (reserved as u32 + 2 * sectors_per_fat as u32 + root_sectors) as usize * SECTOR_SIZE;
        image[data_start..data_start + 5].copy_from_slice(b"hello");

        image
    }

    fn mount_fresh() -> Box<dyn MountState> {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(build_image(), SECTOR_SIZE));
        let cache = Arc::new(BlockCache::new(SECTOR_SIZE, 4, 2));
        let driver = Fat12Driver::new();
        driver.mount(dev, cache, 0, MountFlags::empty()).unwrap()
    }

    #[test]
    fn root_listing_finds_file() {
        let mount = mount_fresh();
        let mut dir = mount.opendir("/").unwrap();
        let mut names = Vec::new();
        loop {
            match dir.readdir().unwrap() {
                ReadDirOutcome::Entry(e) => names.push(e.name),
                ReadDirOutcome::EndOfDirectory => break,
            }
        }
        assert_eq!(names, vec!["HELLO.TXT"]);
    }

    #[test]
    fn read_file_contents() {
        let mount = mount_fresh();
        let mut f = mount.open("/HELLO.TXT", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 5];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_is_rejected() {
        let mount = mount_fresh();
        assert_eq!(mount.open("/HELLO.TXT", OpenFlags::WRITE), Err(VfsError::ReadOnly));
        assert_eq!(mount.mkdir("/sub", Attributes::empty()), Err(VfsError::Unsupported));
    }
}
