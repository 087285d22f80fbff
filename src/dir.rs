// src/dir.rs
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::alloc::{allocate_block, allocate_inode};
use crate::error::{Ext2Error, Result};
use crate::fs::Ext2Volume;
use crate::image::{read_le_u32, write_le_u16};
use crate::layout::{
    dir_rec_len, write_dir_record, DirRecord, FileType, Inode, BLOCK_SIZE, DIRECT_BLOCKS,
    NAME_LEN, POINTERS_PER_BLOCK, SECTORS_PER_BLOCK,
};
use crate::path::{resolve, split_parent};

/// A live directory entry as returned by `list_directory`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u32,
    pub name: String,
    pub file_type: FileType,
}

impl DirEntry {
    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

// --------- Directory block scanner ---------

/// Iterator over the records of one directory block, advancing by each
/// record's `rec_len`. Stops after the first malformed record.
pub struct DirRecords<'a> {
    block: &'a [u8],
    offset: usize,
    failed: bool,
}

pub fn records(block: &[u8]) -> DirRecords<'_> {
    DirRecords {
        block,
        offset: 0,
        failed: false,
    }
}

impl Iterator for DirRecords<'_> {
    type Item = Result<DirRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.block.len() {
            return None;
        }
        match DirRecord::parse(self.block, self.offset) {
            Ok(rec) => {
                self.offset = rec.end();
                Some(Ok(rec))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Looks for a live entry called exactly `name` in one directory block.
pub fn find_entry_in_block(block: &[u8], name: &[u8]) -> Result<Option<DirRecord>> {
    for rec in records(block) {
        let rec = rec?;
        trace!(offset = rec.offset, inode = rec.inode, "scan record");
        // length first: a stored "ab" must not match a query "abc" or vice versa
        if rec.inode != 0 && rec.name.len() == name.len() && rec.name == name {
            return Ok(Some(rec));
        }
    }
    Ok(None)
}

// --------- Directory tree walker ---------

/// Searches the inode's direct blocks, then the blocks listed in its single
/// indirect block. Zero pointers are holes and are skipped.
pub fn find_entry_in_inode(
    vol: &Ext2Volume,
    inode: &Inode,
    name: &[u8],
) -> Result<Option<DirRecord>> {
    for &blk in inode.direct_blocks() {
        if blk == 0 {
            continue;
        }
        if let Some(rec) = find_entry_in_block(vol.block(blk)?, name)? {
            return Ok(Some(rec));
        }
    }

    let indirect = inode.indirect_block();
    if indirect != 0 {
        let table = vol.block(indirect)?;
        for i in 0..POINTERS_PER_BLOCK {
            let blk = read_le_u32(table, i * 4)?;
            if blk == 0 {
                continue;
            }
            if let Some(rec) = find_entry_in_block(vol.block(blk)?, name)? {
                return Ok(Some(rec));
            }
        }
    }
    Ok(None)
}

/// Every populated data block of `inode`, direct pointers first, then the
/// entries of its single indirect block. `read_block` fetches the indirect
/// table.
pub fn data_blocks<B, F>(inode: &Inode, mut read_block: F) -> Result<Vec<u32>>
where
    B: AsRef<[u8]>,
    F: FnMut(u32) -> Result<B>,
{
    let mut blocks: Vec<u32> = inode
        .direct_blocks()
        .iter()
        .copied()
        .filter(|&b| b != 0)
        .collect();

    let indirect = inode.indirect_block();
    if indirect != 0 {
        let table = read_block(indirect)?;
        for i in 0..POINTERS_PER_BLOCK {
            let blk = read_le_u32(table.as_ref(), i * 4)?;
            if blk != 0 {
                blocks.push(blk);
            }
        }
    }
    Ok(blocks)
}

pub fn dir_blocks(vol: &Ext2Volume, inode: &Inode) -> Result<Vec<u32>> {
    data_blocks(inode, |blk| vol.block(blk))
}

pub fn list_directory(vol: &Ext2Volume, ino: u32) -> Result<Vec<DirEntry>> {
    let inode = vol.inode_by_index(ino)?;
    if !inode.is_dir() {
        return Err(Ext2Error::NotADirectory);
    }

    let mut entries = Vec::new();
    for blk in dir_blocks(vol, &inode)? {
        for rec in records(vol.block(blk)?) {
            let rec = rec?;
            if rec.inode == 0 {
                continue;
            }
            entries.push(DirEntry {
                ino: rec.inode,
                name: String::from_utf8_lossy(&rec.name).into_owned(),
                file_type: rec.file_type,
            });
        }
    }
    Ok(entries)
}

// --------- Directory-entry linker ---------

fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(Ext2Error::InvalidName("empty"));
    }
    if name.len() > NAME_LEN {
        return Err(Ext2Error::InvalidName("longer than 255 bytes"));
    }
    if name.iter().any(|&b| b == b'/' || b == 0) {
        return Err(Ext2Error::InvalidName("contains '/' or NUL"));
    }
    Ok(())
}

/// Tries to fit a new record into one block by shrinking the block's last
/// record to its real size. Returns the offset of the new record.
fn insert_into_block(
    block: &mut [u8],
    target: u32,
    file_type: FileType,
    name: &[u8],
) -> Result<Option<usize>> {
    let need = dir_rec_len(name.len());
    let end = block.len();

    let mut offset = 0;
    while offset < end {
        let rec = DirRecord::parse(block, offset)?;
        if rec.end() < end {
            offset = rec.end();
            continue;
        }

        // an unused tail record can be taken over whole
        if rec.inode == 0 && rec.rec_len as usize >= need {
            block[offset..end].fill(0);
            write_dir_record(block, offset, target, end - offset, file_type, name)?;
            return Ok(Some(offset));
        }

        let actual = rec.actual_len();
        if offset + actual + need > end {
            return Ok(None);
        }
        write_le_u16(block, offset + 4, actual as u16)?;
        let new_off = offset + actual;
        block[new_off..end].fill(0);
        write_dir_record(block, new_off, target, end - new_off, file_type, name)?;
        return Ok(Some(new_off));
    }
    Ok(None)
}

/// Adds `name -> target` to the directory `parent_ino`.
///
/// Existing direct blocks are tried in order; if none has room a new block is
/// allocated into the next free direct slot. Indirect blocks are never used
/// for insertion, so a directory whose 12 direct blocks are full gets
/// `NoSpace`.
pub fn link(
    vol: &mut Ext2Volume,
    parent_ino: u32,
    name: &[u8],
    target: u32,
    file_type: FileType,
) -> Result<()> {
    validate_name(name)?;
    let mut parent = vol.inode_by_index(parent_ino)?;
    if !parent.is_dir() {
        return Err(Ext2Error::NotADirectory);
    }
    if find_entry_in_inode(vol, &parent, name)?.is_some() {
        return Err(Ext2Error::AlreadyExists);
    }

    for slot in 0..DIRECT_BLOCKS {
        let blk = parent.block[slot];
        if blk != 0 {
            let block = vol.block_mut(blk)?;
            if let Some(offset) = insert_into_block(block, target, file_type, name)? {
                debug!(
                    parent = parent_ino,
                    target,
                    block = blk,
                    offset,
                    "linked into existing block"
                );
                return Ok(());
            }
            continue;
        }

        let new_blk = allocate_block(vol)?;
        let block = vol.block_mut(new_blk)?;
        block.fill(0);
        write_dir_record(block, 0, target, BLOCK_SIZE, file_type, name)?;

        parent.block[slot] = new_blk;
        parent.size += BLOCK_SIZE as u32;
        parent.blocks += SECTORS_PER_BLOCK;
        vol.write_inode(parent_ino, &parent)?;
        debug!(parent = parent_ino, target, block = new_blk, slot, "linked into new block");
        return Ok(());
    }

    Err(Ext2Error::NoSpace)
}

// --------- Directory creation ---------

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

/// Creates the directory named by the absolute `path` and returns its inode.
///
/// The steps (allocate inode, write it, link into parent, seed `.` and `..`,
/// bump counters) are not atomic; an error after the allocation leaves the
/// earlier writes in the image.
pub fn create_directory(vol: &mut Ext2Volume, path: &str) -> Result<u32> {
    let (parent_path, name) = split_parent(path)?;
    validate_name(name.as_bytes())?;

    let parent_ino = resolve(vol, parent_path)?;
    let parent = vol.inode_by_index(parent_ino)?;
    if !parent.is_dir() {
        return Err(Ext2Error::NotADirectory);
    }
    // every directory already holds these two
    if name == "." || name == ".." {
        return Err(Ext2Error::AlreadyExists);
    }
    if find_entry_in_inode(vol, &parent, name.as_bytes())?.is_some() {
        return Err(Ext2Error::AlreadyExists);
    }

    let ino = allocate_inode(vol)?;
    vol.write_inode(ino, &Inode::directory(0o755, now_secs()))?;

    link(vol, parent_ino, name.as_bytes(), ino, FileType::Directory)?;
    link(vol, ino, b".", ino, FileType::Directory)?;
    link(vol, ino, b"..", parent_ino, FileType::Directory)?;

    // ".." of the new directory is one more link to the parent
    let mut parent = vol.inode_by_index(parent_ino)?;
    parent.links_count = parent.links_count.saturating_add(1);
    vol.write_inode(parent_ino, &parent)?;

    let group = (ino - 1) / vol.superblock()?.inodes_per_group;
    let mut gd = vol.group_desc(group)?;
    gd.used_dirs_count = gd.used_dirs_count.saturating_add(1);
    vol.set_group_desc(group, &gd)?;

    debug!(path, ino, parent = parent_ino, "created directory");
    Ok(ino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{read_le_u16, Image};
    use crate::layout::{INDIRECT_SLOT, ROOT_INO};
    use crate::mkfs::{format_bytes, FormatOptions};

    fn fresh() -> Ext2Volume {
        let bytes = format_bytes(&FormatOptions::default()).unwrap();
        Ext2Volume::from_image(Image::from_bytes(bytes)).unwrap()
    }

    fn rec_len_sum(block: &[u8]) -> usize {
        records(block).map(|r| r.unwrap().rec_len as usize).sum()
    }

    fn names(entries: &[DirEntry]) -> Vec<&str> {
        entries
            .iter()
            .filter(|e| !e.is_dot())
            .map(|e| e.name.as_str())
            .collect()
    }

    #[test]
    fn scanner_requires_exact_length_match() {
        let mut block = vec![0u8; BLOCK_SIZE];
        write_dir_record(&mut block, 0, 12, 12, FileType::Directory, b"ab").unwrap();
        write_dir_record(&mut block, 12, 13, BLOCK_SIZE - 12, FileType::RegularFile, b"abcd")
            .unwrap();

        assert_eq!(find_entry_in_block(&block, b"abcd").unwrap().unwrap().inode, 13);
        assert_eq!(find_entry_in_block(&block, b"ab").unwrap().unwrap().inode, 12);
        assert!(find_entry_in_block(&block, b"a").unwrap().is_none());
        assert!(find_entry_in_block(&block, b"abc").unwrap().is_none());
        assert!(find_entry_in_block(&block, b"abcde").unwrap().is_none());
    }

    #[test]
    fn scanner_skips_unused_records() {
        let mut block = vec![0u8; BLOCK_SIZE];
        write_dir_record(&mut block, 0, 0, BLOCK_SIZE, FileType::Unknown, b"gone").unwrap();
        assert!(find_entry_in_block(&block, b"gone").unwrap().is_none());
    }

    #[test]
    fn scanner_reports_corrupt_rec_len() {
        let mut block = vec![0u8; BLOCK_SIZE];
        write_dir_record(&mut block, 0, 2, 12, FileType::Directory, b".").unwrap();
        // the next record is all zeros: rec_len 0
        assert!(matches!(
            find_entry_in_block(&block, b"missing"),
            Err(Ext2Error::Corrupt { offset: 12, .. })
        ));
    }

    #[test]
    fn fresh_root_lists_only_dots() {
        let vol = fresh();
        let entries = list_directory(&vol, ROOT_INO).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, ".");
        assert_eq!(entries[0].ino, ROOT_INO);
        assert_eq!(entries[1].name, "..");
        assert_eq!(entries[1].ino, ROOT_INO);
        assert!(names(&entries).is_empty());
    }

    #[test]
    fn link_splits_last_record_and_keeps_block_full() {
        let mut vol = fresh();
        let blk = vol.inode_by_index(ROOT_INO).unwrap().block[0];
        assert_eq!(rec_len_sum(vol.block(blk).unwrap()), BLOCK_SIZE);

        link(&mut vol, ROOT_INO, b"hello", 20, FileType::RegularFile).unwrap();

        let block = vol.block(blk).unwrap();
        assert_eq!(rec_len_sum(block), BLOCK_SIZE);
        // ".." shrinks from 1012 to 12, "hello" starts right after it
        assert_eq!(read_le_u16(block, 12 + 4).unwrap(), 12);
        let rec = find_entry_in_block(block, b"hello").unwrap().unwrap();
        assert_eq!(rec.offset, 24);
        assert_eq!(rec.rec_len as usize, BLOCK_SIZE - 24);
        assert_eq!(rec.file_type, FileType::RegularFile);
    }

    #[test]
    fn link_rejects_duplicates_without_touching_blocks() {
        let mut vol = fresh();
        link(&mut vol, ROOT_INO, b"a", 20, FileType::RegularFile).unwrap();
        let before = vol.image().as_bytes().to_vec();

        let err = link(&mut vol, ROOT_INO, b"a", 21, FileType::RegularFile).unwrap_err();
        assert!(matches!(err, Ext2Error::AlreadyExists));
        assert_eq!(vol.image().as_bytes(), &before[..]);
    }

    #[test]
    fn link_rejects_bad_names() {
        let mut vol = fresh();
        for name in [&b""[..], b"a/b", b"nul\0"] {
            assert!(matches!(
                link(&mut vol, ROOT_INO, name, 20, FileType::RegularFile),
                Err(Ext2Error::InvalidName(_))
            ));
        }
        let long = vec![b'x'; 256];
        assert!(link(&mut vol, ROOT_INO, &long, 20, FileType::RegularFile).is_err());
    }

    #[test]
    fn link_spills_into_a_new_block_when_full() {
        let mut vol = fresh();
        let root_before = vol.inode_by_index(ROOT_INO).unwrap();

        // 250-byte names need 260-byte records: three fit beside "." and ".."
        let mut i = 0u32;
        loop {
            let name = format!("{:0>250}", i);
            link(&mut vol, ROOT_INO, name.as_bytes(), 20 + i, FileType::RegularFile).unwrap();
            i += 1;
            if vol.inode_by_index(ROOT_INO).unwrap().block[1] != 0 {
                break;
            }
        }
        assert_eq!(i, 4);

        let root = vol.inode_by_index(ROOT_INO).unwrap();
        assert_eq!(root.size, root_before.size + BLOCK_SIZE as u32);
        assert_eq!(root.blocks, root_before.blocks + SECTORS_PER_BLOCK);
        for blk in dir_blocks(&vol, &root).unwrap() {
            assert_eq!(rec_len_sum(vol.block(blk).unwrap()), BLOCK_SIZE);
        }
        let second = vol.block(root.block[1]).unwrap();
        let sole = DirRecord::parse(second, 0).unwrap();
        assert_eq!(sole.rec_len as usize, BLOCK_SIZE);
        assert_eq!(sole.inode, 23);
    }

    #[test]
    fn link_reports_no_space_when_direct_slots_are_full() {
        let mut vol = fresh();
        let mut root = vol.inode_by_index(ROOT_INO).unwrap();
        // fill every direct slot with a block whose only record leaves no room
        for slot in 1..DIRECT_BLOCKS {
            let blk = allocate_block(&mut vol).unwrap();
            let block = vol.block_mut(blk).unwrap();
            block.fill(0);
            write_dir_record(block, 0, 30, BLOCK_SIZE - 12, FileType::RegularFile, &[b'f'; 250])
                .unwrap();
            let name = [b'a' + slot as u8];
            write_dir_record(block, BLOCK_SIZE - 12, 31, 12, FileType::RegularFile, &name).unwrap();
            root.block[slot] = blk;
        }
        let first = root.block[0];
        let block = vol.block_mut(first).unwrap();
        write_le_u16(block, 4, (BLOCK_SIZE - 12) as u16).unwrap();
        write_dir_record(block, BLOCK_SIZE - 12, ROOT_INO, 12, FileType::Directory, b"..").unwrap();
        vol.write_inode(ROOT_INO, &root).unwrap();

        let err = link(&mut vol, ROOT_INO, b"one-more", 40, FileType::RegularFile).unwrap_err();
        assert!(matches!(err, Ext2Error::NoSpace));
    }

    #[test]
    fn walker_follows_single_indirect_block() {
        let mut vol = fresh();
        let data = allocate_block(&mut vol).unwrap();
        let table = allocate_block(&mut vol).unwrap();
        {
            let block = vol.block_mut(data).unwrap();
            block.fill(0);
            write_dir_record(block, 0, 17, BLOCK_SIZE, FileType::RegularFile, b"deep").unwrap();
        }
        {
            let block = vol.block_mut(table).unwrap();
            block.fill(0);
            // leave a hole before the real pointer
            block[8..12].copy_from_slice(&data.to_le_bytes());
        }
        let mut root = vol.inode_by_index(ROOT_INO).unwrap();
        root.block[INDIRECT_SLOT] = table;
        vol.write_inode(ROOT_INO, &root).unwrap();

        let rec = find_entry_in_inode(&vol, &root, b"deep").unwrap().unwrap();
        assert_eq!(rec.inode, 17);
        assert!(find_entry_in_inode(&vol, &root, b"dee").unwrap().is_none());
        let listed = list_directory(&vol, ROOT_INO).unwrap();
        assert_eq!(names(&listed), vec!["deep"]);

        // same block list whether the reader borrows or copies
        let copied = data_blocks(&root, |blk| vol.block(blk).map(<[u8]>::to_vec)).unwrap();
        assert_eq!(copied, vec![root.block[0], data]);
        assert_eq!(dir_blocks(&vol, &root).unwrap(), copied);
    }

    #[test]
    fn create_directory_seeds_dots_and_updates_counters() {
        let mut vol = fresh();
        let sb_before = vol.superblock().unwrap();
        let gd_before = vol.group_desc(0).unwrap();
        let root_links = vol.inode_by_index(ROOT_INO).unwrap().links_count;

        let ino = create_directory(&mut vol, "/a").unwrap();

        let entries = list_directory(&vol, ino).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].name.as_str(), entries[0].ino), (".", ino));
        assert_eq!((entries[1].name.as_str(), entries[1].ino), ("..", ROOT_INO));

        let dir = vol.inode_by_index(ino).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.links_count, 2);
        assert_eq!(dir.size, BLOCK_SIZE as u32);
        assert_eq!(dir.blocks, SECTORS_PER_BLOCK);
        assert_eq!(vol.inode_by_index(ROOT_INO).unwrap().links_count, root_links + 1);

        let sb = vol.superblock().unwrap();
        let gd = vol.group_desc(0).unwrap();
        assert_eq!(sb.free_inodes_count, sb_before.free_inodes_count - 1);
        assert_eq!(sb.free_blocks_count, sb_before.free_blocks_count - 1);
        assert_eq!(gd.used_dirs_count, gd_before.used_dirs_count + 1);

        let root = list_directory(&vol, ROOT_INO).unwrap();
        let a = root.iter().find(|e| e.name == "a").unwrap();
        assert_eq!(a.file_type, FileType::Directory);
        assert_eq!(a.ino, ino);
    }

    #[test]
    fn create_directory_nested_and_errors() {
        let mut vol = fresh();
        let a = create_directory(&mut vol, "/a").unwrap();
        let b = create_directory(&mut vol, "/a/b/").unwrap();
        let b_entries = list_directory(&vol, b).unwrap();
        assert_eq!(b_entries[1].ino, a);

        assert!(matches!(create_directory(&mut vol, "/a"), Err(Ext2Error::AlreadyExists)));
        assert!(matches!(create_directory(&mut vol, "/a/."), Err(Ext2Error::AlreadyExists)));
        assert!(matches!(create_directory(&mut vol, "/x/y"), Err(Ext2Error::NotFound)));
        assert!(matches!(create_directory(&mut vol, "a"), Err(Ext2Error::InvalidPath)));
        assert!(matches!(create_directory(&mut vol, "/"), Err(Ext2Error::InvalidPath)));
    }

    #[test]
    fn dot_names_resolve_the_parent_first() {
        let mut vol = fresh();
        assert!(matches!(create_directory(&mut vol, "/missing/."), Err(Ext2Error::NotFound)));
        assert!(matches!(create_directory(&mut vol, "/missing/.."), Err(Ext2Error::NotFound)));

        let free = vol.superblock().unwrap().free_inodes_count;
        assert!(matches!(create_directory(&mut vol, "/.."), Err(Ext2Error::AlreadyExists)));
        assert_eq!(vol.superblock().unwrap().free_inodes_count, free);
    }

    #[test]
    fn list_directory_on_file_is_not_a_directory() {
        let mut vol = fresh();
        let ino = allocate_inode(&mut vol).unwrap();
        let file = Inode {
            mode: crate::layout::S_IFREG | 0o644,
            links_count: 1,
            ..Inode::default()
        };
        vol.write_inode(ino, &file).unwrap();
        assert!(matches!(list_directory(&vol, ino), Err(Ext2Error::NotADirectory)));
    }
}
