//! ISO 9660 read-only driver (§2 stub driver set)
//!
//! Optical media images: fixed 2048-byte sectors, a Primary Volume
//! Descriptor at sector 16 naming the root directory's extent, and flat
//! directory records with no cluster chain at all — an extent is just a
//! contiguous run of sectors. Rock Ridge / Joliet extensions are not
//! parsed; names are read as plain ISO Level 1 8.3-ish identifiers with
//! the trailing `;1` version suffix stripped.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use vfs_block::BlockDevice;
use vfs_cache::BlockCache;

use crate::driver::{DirHandleOps, FileHandleOps, FsDriver, MountFlags, MountState, OpenFlags};
use crate::error::{ReadDirOutcome, VfsError, VfsResult};
use crate::stat::{Attributes, DirEntry, FileKind, Stat, StatFs, Timestamps};

const SECTOR_SIZE: usize = 2048;
const PRIMARY_VOLUME_DESCRIPTOR_SECTOR: u64 = 16;
const FLAG_DIRECTORY: u8 = 0x02;

#[derive(Clone, Copy)]
struct RootDirRecord {
    extent_lba: u32,
    data_length: u32,
}

struct Iso9660Entry {
    name: String,
    is_directory: bool,
    extent_lba: u32,
    data_length: u32,
}

pub struct Iso9660Mount {
    device: Arc<dyn BlockDevice>,
    cache: Arc<BlockCache>,
    device_id: u64,
    root: RootDirRecord,
}

impl Iso9660Mount {
    fn read_sector(&self, sector: u64) -> VfsResult<Vec<u8>> {
        Ok(self.cache.get(self.device.as_ref(), self.device_id, sector)?)
    }

    fn read_extent(&self, lba: u32, length: u32) -> VfsResult<Vec<u8>> {
        let sectors = (length as usize + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let mut data = Vec::with_capacity(sectors * SECTOR_SIZE);
        for s in 0..sectors as u64 {
            data.extend_from_slice(&self.read_sector(lba as u64 + s)?);
        }
        data.truncate(length as usize);
        Ok(data)
    }

    fn read_directory(&self, lba: u32, length: u32) -> VfsResult<Vec<Iso9660Entry>> {
        let raw = self.read_extent(lba, length)?;
        let mut out = Vec::new();
        let mut i = 0;
        while i < raw.len() {
            let record_len = raw[i] as usize;
            if record_len == 0 {
                // padding to the next sector boundary
                let next = ((i / SECTOR_SIZE) + 1) * SECTOR_SIZE;
                if next >= raw.len() {
                    break;
                }
                i = next;
                continue;
            }
            if i + record_len > raw.len() {
                break;
            }
            let record = &raw[i..i + record_len];
            let extent_lba = u32::from_le_bytes([record[2], record[3], record[4], record[5]]);
            let data_length = u32::from_le_bytes([record[10], record[11], record[12], record[13]]);
            let flags = record[25];
            let name_len = record[32] as usize;
            let name_bytes = &record[33..33 + name_len.min(record_len.saturating_sub(33))];

            if !(name_len == 1 && (name_bytes[0] == 0 || name_bytes[0] == 1)) {
                let mut name = String::from_utf8_lossy(name_bytes).into_owned();
                if let Some(pos) = name.find(";") {
                    name.truncate(pos);
                }
                out.push(Iso9660Entry {
                    name,
                    is_directory: flags & FLAG_DIRECTORY != 0,
                    extent_lba,
                    data_length,
                });
            }
            i += record_len;
        }
        Ok(out)
    }

    fn lookup(&self, path: &str) -> VfsResult<Iso9660Entry> {
        let comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let mut lba = self.root.extent_lba;
        let mut length = self.root.data_length;
        let mut found: Option<Iso9660Entry> = None;
        for (i, comp) in comps.iter().enumerate() {
            let entries = self.read_directory(lba, length)?;
            let entry = entries
                .into_iter()
                .find(|e| e.name.eq_ignore_ascii_case(comp))
                .ok_or(VfsError::NotFound)?;
            let last = i + 1 == comps.len();
            if !last {
                if !entry.is_directory {
                    return Err(VfsError::NotDirectory);
                }
                lba = entry.extent_lba;
                length = entry.data_length;
            }
            found = Some(entry);
        }
        found.ok_or(VfsError::NotFound)
    }
}

fn entry_attributes(_e: &Iso9660Entry) -> Attributes {
    Attributes::READ
}

impl MountState for Iso9660Mount {
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
        let data = self.read_extent(entry.extent_lba, entry.data_length)?;
        Ok(Box::new(Iso9660FileHandle { data, position: 0 }))
    }

    fn stat(&self, path: &str) -> VfsResult<Stat> {
        let entry = self.lookup(path)?;
        Ok(Stat {
            kind: if entry.is_directory { FileKind::Directory } else { FileKind::File },
            size: entry.data_length as u64,
            attributes: entry_attributes(&entry),
            timestamps: Timestamps::default(),
            link_count: 1,
        })
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        Ok(StatFs {
            block_size: SECTOR_SIZE as u32,
            total_blocks: 0,
            free_blocks: 0,
            total_inodes: 0,
            free_inodes: 0,
            read_only: true,
        })
    }

    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirHandleOps>> {
        let (lba, length) = if path.is_empty() || path == "/" {
            (self.root.extent_lba, self.root.data_length)
        } else {
            let entry = self.lookup(path)?;
            if !entry.is_directory {
                return Err(VfsError::NotDirectory);
            }
            (entry.extent_lba, entry.data_length)
        };
        let entries = self.read_directory(lba, length)?;
        Ok(Box::new(Iso9660DirHandle { entries, pos: 0 }))
    }
}

struct Iso9660FileHandle {
    data: Vec<u8>,
    position: u64,
}

impl FileHandleOps for Iso9660FileHandle {
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

struct Iso9660DirHandle {
    entries: Vec<Iso9660Entry>,
    pos: usize,
}

impl DirHandleOps for Iso9660DirHandle {
    fn readdir(&mut self) -> VfsResult<ReadDirOutcome> {
        if self.pos >= self.entries.len() {
            return Ok(ReadDirOutcome::EndOfDirectory);
        }
        let entry = &self.entries[self.pos];
        self.pos += 1;
        Ok(ReadDirOutcome::Entry(DirEntry {
            name: entry.name.clone(),
            kind: if entry.is_directory { FileKind::Directory } else { FileKind::File },
            size: entry.data_length as u64,
            attributes: entry_attributes(entry),
            timestamps: Timestamps::default(),
        }))
    }
}

pub struct Iso9660Driver;

impl Iso9660Driver {
    pub fn new() -> Self {
        Iso9660Driver
    }
}

impl Default for Iso9660Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl FsDriver for Iso9660Driver {
    fn name(&self) -> &str {
        "iso9660"
    }

    fn mount(
        &self,
        device: Arc<dyn BlockDevice>,
        cache: Arc<BlockCache>,
        device_id: u64,
        _flags: MountFlags,
    ) -> VfsResult<Box<dyn MountState>> {
        let pvd = cache.get(device.as_ref(), device_id, PRIMARY_VOLUME_DESCRIPTOR_SECTOR)?;
        if pvd.len() < 190 || pvd[0] != 1 || &pvd[1..6] != b"CD001" {
            return Err(VfsError::Corrupted);
        }
        let root_record = &pvd[156..190];
        let extent_lba = u32::from_le_bytes([root_record[2], root_record[3], root_record[4], root_record[5]]);
        let data_length = u32::from_le_bytes([root_record[10], root_record[11], root_record[12], root_record[13]]);

        Ok(Box::new(Iso9660Mount {
            device,
            cache,
            device_id,
            root: RootDirRecord { extent_lba, data_length },
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

    fn put_u32(buf: &mut [u8], off: usize, v: u32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn write_dir_record(buf: &mut [u8], name: &[u8], extent_lba: u32, data_length: u32, is_dir: bool) -> usize {
        let name_len = name.len();
        let record_len = 33 + name_len + (1 - name_len % 2);
        buf[0] = record_len as u8;
        put_u32(buf, 2, extent_lba);
        put_u32(buf, 10, data_length);
        buf[25] = if is_dir { FLAG_DIRECTORY } else { 0 };
        buf[32] = name_len as u8;
        buf[33..33 + name_len].copy_from_slice(name);
        record_len
    }

    fn build_image() -> Vec<u8> {
        let root_lba = 18u32;
        let file_lba = 19u32;
        let mut image = vec![0u8; 20 * SECTOR_SIZE];

        let pvd_off = PRIMARY_VOLUME_DESCRIPTOR_SECTOR as usize * SECTOR_SIZE;
        image[pvd_off] = 1;
        image[pvd_off + 1..pvd_off + 6].copy_from_slice(b"CD001");

        let root_record = &mut image[pvd_off + 156..pvd_off + 190];
        write_dir_record(root_record, &[0u8], root_lba, SECTOR_SIZE as u32, true);

        let root_dir = &mut image[root_lba as usize * SECTOR_SIZE..(root_lba as usize + 1) * SECTOR_SIZE];
        let mut off = write_dir_record(root_dir, &[0u8], root_lba, SECTOR_SIZE as u32, true);
        off += write_dir_record(&mut root_dir[off..], &[1u8], root_lba, SECTOR_SIZE as u32, true);
        write_dir_record(&mut root_dir[off..], b"HELLO.TXT;1", file_lba, 5, false);

        let file_data = &mut image[file_lba as usize * SECTOR_SIZE..file_lba as usize * SECTOR_SIZE + 5];
        file_data.copy_from_slice(b"hello");

        image
    }

    fn mount_fresh() -> Box<dyn MountState> {
        let dev: Arc<dyn BlockDevice> = Arc::new(MemDevice::new(build_image(), SECTOR_SIZE));
        let cache = Arc::new(BlockCache::new(SECTOR_SIZE, 4, 2));
        let driver = Iso9660Driver::new();
        driver.mount(dev, cache, 0, MountFlags::empty()).unwrap()
    }

    #[test]
    fn root_listing_excludes_self_and_parent_records() {
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
    fn read_file_strips_version_suffix_from_lookup() {
        let mount = mount_fresh();
        let mut f = mount.open("/HELLO.TXT", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(f.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_is_rejected() {
        let mount = mount_fresh();
        assert_eq!(mount.open("/HELLO.TXT", OpenFlags::WRITE), Err(VfsError::ReadOnly));
        assert_eq!(mount.rename("/HELLO.TXT", "/OTHER.TXT"), Err(VfsError::Unsupported));
    }
}
