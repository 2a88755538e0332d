//! ext2-like directory entries (§3, §4.4, §6)
//!
//! Directory contents are a sequence of fixed-format records packed
//! end-to-end in each data block: `inode:4, rec_len:2, name_len:1,
//! file_type:1`, followed by `name_len` bytes of name padded to a
//! 4-byte boundary. The invariant that matters everywhere in this file:
//! every block's live and dead entries' `rec_len` sum to exactly the
//! block size.

use alloc::string::String;
use alloc::string::ToString;

pub const HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub inode: u32,
    pub rec_len: u16,
    pub file_type: u8,
    pub name: String,
}

/// Rounds `8 + name_len` up to the next multiple of 4.
pub fn min_rec_len(name_len: usize) -> u16 {
    (((HEADER_SIZE + name_len) + 3) & !3) as u16
}

fn parse_entry_at(data: &[u8], offset: usize) -> DirectoryEntry {
    let inode = u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]);
    let rec_len = u16::from_le_bytes([data[offset + 4], data[offset + 5]]);
    let name_len = data[offset + 6] as usize;
    let file_type = data[offset + 7];
    let name_bytes = &data[offset + HEADER_SIZE..offset + HEADER_SIZE + name_len];
    DirectoryEntry {
        inode,
        rec_len,
        file_type,
        name: String::from_utf8_lossy(name_bytes).to_string(),
    }
}

fn write_entry_at(data: &mut [u8], offset: usize, entry: &DirectoryEntry) {
    let end = offset + entry.rec_len as usize;
    data[offset..end].fill(0);
    data[offset..offset + 4].copy_from_slice(&entry.inode.to_le_bytes());
    data[offset + 4..offset + 6].copy_from_slice(&entry.rec_len.to_le_bytes());
    data[offset + 6] = entry.name.len() as u8;
    data[offset + 7] = entry.file_type;
    let name_bytes = entry.name.as_bytes();
    data[offset + HEADER_SIZE..offset + HEADER_SIZE + name_bytes.len()].copy_from_slice(name_bytes);
}

fn write_rec_len_at(data: &mut [u8], offset: usize, rec_len: u16) {
    data[offset + 4..offset + 6].copy_from_slice(&rec_len.to_le_bytes());
}

fn write_inode_at(data: &mut [u8], offset: usize, inode: u32) {
    data[offset..offset + 4].copy_from_slice(&inode.to_le_bytes());
}

/// Every entry in the block, live or dead (`inode == 0`), in on-disk order.
pub fn list_all(data: &[u8]) -> alloc::vec::Vec<DirectoryEntry> {
    let mut out = alloc::vec::Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let entry = parse_entry_at(data, offset);
        if entry.rec_len == 0 {
            break;
        }
        offset += entry.rec_len as usize;
        out.push(entry);
    }
    out
}

/// Live entries only, in on-disk order.
pub fn list_live(data: &[u8]) -> alloc::vec::Vec<DirectoryEntry> {
    list_all(data).into_iter().filter(|e| e.inode != 0).collect()
}

/// Looks up `name` among the block's live entries.
pub fn find(data: &[u8], name: &str) -> Option<DirectoryEntry> {
    list_live(data).into_iter().find(|e| e.name == name)
}

/// Attempts to add `(name, inode, file_type)` to the block by splitting
/// the first entry with enough slack (§4.4). Returns `false` if no
/// entry in the block has room.
pub fn try_insert(data: &mut [u8], name: &str, inode: u32, file_type: u8) -> bool {
    let required = min_rec_len(name.len());
    let mut offset = 0usize;
    while offset < data.len() {
        let entry = parse_entry_at(data, offset);
        if entry.rec_len == 0 {
            break;
        }
        let actual = if entry.inode == 0 {
            HEADER_SIZE as u16
        } else {
            min_rec_len(entry.name.len())
        };
        if entry.rec_len >= actual && entry.rec_len - actual >= required {
            let new_offset = offset + actual as usize;
            let new_rec_len = entry.rec_len - actual;
            write_rec_len_at(data, offset, actual);
            let new_entry = DirectoryEntry {
                inode,
                rec_len: new_rec_len,
                file_type,
                name: String::from(name),
            };
            write_entry_at(data, new_offset, &new_entry);
            return true;
        }
        offset += entry.rec_len as usize;
    }
    false
}

/// Removes the live entry named `name`, merging its `rec_len` into the
/// preceding entry, or zeroing its inode number if it is the block's
/// first entry (§4.4).
pub fn remove(data: &mut [u8], name: &str) -> bool {
    let mut offset = 0usize;
    let mut prev_offset: Option<usize> = None;
    while offset < data.len() {
        let entry = parse_entry_at(data, offset);
        if entry.rec_len == 0 {
            break;
        }
        if entry.inode != 0 && entry.name == name {
            match prev_offset {
                Some(p) => {
                    let prev = parse_entry_at(data, p);
                    write_rec_len_at(data, p, prev.rec_len + entry.rec_len);
                }
                None => {
                    write_inode_at(data, offset, 0);
                }
            }
            return true;
        }
        prev_offset = Some(offset);
        offset += entry.rec_len as usize;
    }
    false
}

/// Rewrites the inode number of the live entry named `name` (used by
/// `rename` to move `..` to a new parent without touching layout).
pub fn retarget(data: &mut [u8], name: &str, new_inode: u32) -> bool {
    let mut offset = 0usize;
    while offset < data.len() {
        let entry = parse_entry_at(data, offset);
        if entry.rec_len == 0 {
            break;
        }
        if entry.inode != 0 && entry.name == name {
            write_inode_at(data, offset, new_inode);
            return true;
        }
        offset += entry.rec_len as usize;
    }
    false
}

/// Lays a freshly allocated block out as one dead entry spanning the
/// whole block, ready for [`try_insert`] to split.
pub fn init_empty_block(data: &mut [u8]) {
    data.fill(0);
    write_rec_len_at(data, 0, data.len() as u16);
}

/// Lays a fresh directory block out as `.` and `..` only, spanning the
/// whole block so the sum-of-`rec_len` invariant holds immediately.
pub fn init_directory_block(data: &mut [u8], self_inode: u32, parent_inode: u32) {
    data.fill(0);
    let dot_len = min_rec_len(1);
    write_entry_at(
        data,
        0,
        &DirectoryEntry {
            inode: self_inode,
            rec_len: dot_len,
            file_type: 2,
            name: String::from("."),
        },
    );
    let dotdot_len = data.len() as u16 - dot_len;
    write_entry_at(
        data,
        dot_len as usize,
        &DirectoryEntry {
            inode: parent_inode,
            rec_len: dotdot_len,
            file_type: 2,
            name: String::from(".."),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_find_remove_round_trip() {
        let mut block = alloc::vec![0u8; 1024];
        init_directory_block(&mut block, 2, 2);
        assert!(try_insert(&mut block, "a.txt", 11, 1));
        assert_eq!(find(&block, "a.txt").unwrap().inode, 11);

        let sum: u32 = list_all(&block).iter().map(|e| e.rec_len as u32).sum();
        assert_eq!(sum, 1024);

        assert!(remove(&mut block, "a.txt"));
        assert!(find(&block, "a.txt").is_none());
        let sum: u32 = list_all(&block).iter().map(|e| e.rec_len as u32).sum();
        assert_eq!(sum, 1024);
    }

    #[test]
    fn fresh_block_has_dot_and_dotdot() {
        let mut block = alloc::vec![0u8; 1024];
        init_directory_block(&mut block, 2, 2);
        let live = list_live(&block);
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].name, ".");
        assert_eq!(live[1].name, "..");
    }

    #[test]
    fn retarget_dotdot_on_rename() {
        let mut block = alloc::vec![0u8; 1024];
        init_directory_block(&mut block, 5, 2);
        assert!(retarget(&mut block, "..", 9));
        assert_eq!(find(&block, "..").unwrap().inode, 9);
    }
}
