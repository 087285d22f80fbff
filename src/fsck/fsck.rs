use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::alloc::bit_is_set;
use crate::dir::{data_blocks, records};
use crate::error::Result;
use crate::layout::{FileType, Superblock, BLOCK_SIZE, EXT2_MAGIC, ROOT_INO};

use super::{fsck_backend::FsckBackend, fsck_types::FsckReport};

fn check_superblock<B: FsckBackend>(backend: &B, report: &mut FsckReport) -> Result<Superblock> {
    let sb = backend.load_superblock()?;

    if sb.magic != EXT2_MAGIC {
        report.errors.push(format!("superblock: bad magic {:#X}", sb.magic));
    }
    if sb.group_count() == 0 {
        report.errors.push("superblock: no block groups".into());
        report.blocks_ok = false;
        return Ok(sb);
    }

    let mut free_blocks = 0u32;
    let mut free_inodes = 0u32;
    for group in 0..sb.group_count() {
        let gd = backend.load_group_desc(group)?;
        free_blocks += gd.free_blocks_count as u32;
        free_inodes += gd.free_inodes_count as u32;
    }

    if free_blocks != sb.free_blocks_count {
        report.errors.push(format!(
            "superblock: free_blocks_count = {}, groups add up to {}",
            sb.free_blocks_count, free_blocks
        ));
        report.blocks_ok = false;
    }
    if free_inodes != sb.free_inodes_count {
        report.errors.push(format!(
            "superblock: free_inodes_count = {}, groups add up to {}",
            sb.free_inodes_count, free_inodes
        ));
        report.inodes_ok = false;
    }
    Ok(sb)
}

fn count_zero_bits(bitmap: &[u8], units: usize) -> u32 {
    (0..units).filter(|&i| !bit_is_set(bitmap, i)).count() as u32
}

fn check_bitmaps<B: FsckBackend>(
    backend: &B,
    sb: &Superblock,
    report: &mut FsckReport,
) -> Result<()> {
    for group in 0..sb.group_count() {
        let gd = backend.load_group_desc(group)?;

        let first_block = sb.first_data_block + group * sb.blocks_per_group;
        let blocks = sb
            .blocks_per_group
            .min(sb.blocks_count.saturating_sub(first_block)) as usize;
        let free = count_zero_bits(&backend.read_block(gd.block_bitmap)?, blocks);
        if free != gd.free_blocks_count as u32 {
            report.errors.push(format!(
                "group {group}: block bitmap has {free} free, descriptor says {}",
                gd.free_blocks_count
            ));
            report.blocks_ok = false;
        }

        let first_inode = group * sb.inodes_per_group;
        let inodes = sb
            .inodes_per_group
            .min(sb.inodes_count.saturating_sub(first_inode)) as usize;
        let free = count_zero_bits(&backend.read_block(gd.inode_bitmap)?, inodes);
        if free != gd.free_inodes_count as u32 {
            report.errors.push(format!(
                "group {group}: inode bitmap has {free} free, descriptor says {}",
                gd.free_inodes_count
            ));
            report.inodes_ok = false;
        }
    }
    Ok(())
}

fn inode_is_allocated<B: FsckBackend>(backend: &B, sb: &Superblock, ino: u32) -> Result<bool> {
    if ino == 0 || ino > sb.inodes_count {
        return Ok(false);
    }
    let group = (ino - 1) / sb.inodes_per_group;
    let bit = ((ino - 1) % sb.inodes_per_group) as usize;
    let gd = backend.load_group_desc(group)?;
    Ok(bit_is_set(&backend.read_block(gd.inode_bitmap)?, bit))
}

/// Walks the tree from the root, checking each directory block and entry.
fn check_dirs<B: FsckBackend>(backend: &B, sb: &Superblock, report: &mut FsckReport) -> Result<()> {
    let root = backend.read_inode(ROOT_INO)?;
    if !root.is_dir() {
        report.errors.push("root inode is not a directory".into());
        report.dirs_ok = false;
        return Ok(());
    }

    let mut seen = HashSet::from([ROOT_INO]);
    let mut queue = VecDeque::from([(ROOT_INO, ROOT_INO)]);

    while let Some((ino, parent)) = queue.pop_front() {
        let inode = backend.read_inode(ino)?;
        let mut position = 0usize;

        for blk in data_blocks(&inode, |blk| backend.read_block(blk))? {
            let block = backend.read_block(blk)?;
            let mut spanned = 0usize;

            for rec in records(&block) {
                let rec = match rec {
                    Ok(rec) => rec,
                    Err(e) => {
                        report.errors.push(format!("dir {ino}, block {blk}: {e}"));
                        report.dirs_ok = false;
                        break;
                    }
                };
                spanned += rec.rec_len as usize;
                if rec.inode == 0 {
                    continue;
                }

                let name = String::from_utf8_lossy(&rec.name).into_owned();
                match (position, name.as_str()) {
                    (0, ".") if rec.inode == ino => {}
                    (1, "..") if rec.inode == parent => {}
                    (0, _) | (1, _) => {
                        report.errors.push(format!(
                            "dir {ino}: entry {position} is '{name}' -> {}, expected {}",
                            rec.inode,
                            if position == 0 { "'.' -> self" } else { "'..' -> parent" }
                        ));
                        report.dirs_ok = false;
                    }
                    _ => {}
                }
                position += 1;

                if !inode_is_allocated(backend, sb, rec.inode)? {
                    report.errors.push(format!(
                        "dir {ino}: '{name}' points at unallocated inode {}",
                        rec.inode
                    ));
                    report.inodes_ok = false;
                    continue;
                }

                if rec.file_type == FileType::Directory && name != "." && name != ".." {
                    let child = backend.read_inode(rec.inode)?;
                    if !child.is_dir() {
                        report.errors.push(format!(
                            "dir {ino}: '{name}' is tagged as a directory but inode {} is not",
                            rec.inode
                        ));
                        report.dirs_ok = false;
                    } else if seen.insert(rec.inode) {
                        queue.push_back((rec.inode, ino));
                    }
                }
            }

            if spanned != BLOCK_SIZE {
                report.errors.push(format!(
                    "dir {ino}, block {blk}: records span {spanned} bytes, block is {BLOCK_SIZE}"
                ));
                report.dirs_ok = false;
            }
        }

        if position < 2 {
            report.errors.push(format!("dir {ino}: missing '.' or '..'"));
            report.dirs_ok = false;
        }
    }

    debug!(directories = seen.len(), "directory walk finished");
    Ok(())
}

pub fn run_fsck<B: FsckBackend>(backend: &B) -> FsckReport {
    let mut report = FsckReport::new();

    // --- Step 1: superblock and aggregate counters ---
    let sb = match check_superblock(backend, &mut report) {
        Ok(sb) => sb,
        Err(e) => {
            report.errors.push(format!("cannot read superblock: {e}"));
            report.blocks_ok = false;
            report.inodes_ok = false;
            return report;
        }
    };

    // --- Step 2: bitmaps against group counters ---
    if let Err(e) = check_bitmaps(backend, &sb, &mut report) {
        report.errors.push(format!("cannot read bitmaps: {e}"));
        report.blocks_ok = false;
    }

    // --- Step 3: directory tree ---
    if let Err(e) = check_dirs(backend, &sb, &mut report) {
        report.errors.push(format!("cannot walk directories: {e}"));
        report.dirs_ok = false;
    }

    report
}
