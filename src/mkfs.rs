// src/mkfs.rs
//! Builds a fresh single-group ext2 image: superblock, one group descriptor,
//! both bitmaps, the inode table and a root directory holding `.` and `..`.
//!
//! Block map for 1 KiB blocks:
//!   0        boot block (superblock at byte 1024 lives in block 1)
//!   1        superblock
//!   2        group descriptor table
//!   3        block bitmap
//!   4        inode bitmap
//!   5..      inode table
//!   next     root directory data

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{Ext2Error, Result};
use crate::layout::{
    dir_rec_len, write_dir_record, FileType, GroupDesc, Inode, Superblock, BLOCK_SIZE, EXT2_MAGIC,
    FEATURE_INCOMPAT_FILETYPE, FIRST_INO, INODE_SIZE, ROOT_INO, SECTORS_PER_BLOCK,
    SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE,
};

const BITS_PER_BITMAP: u32 = (BLOCK_SIZE * 8) as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatOptions {
    pub blocks_count: u32,
    pub inodes_count: u32,
}

impl Default for FormatOptions {
    /// A 128 KiB image with 32 inodes.
    fn default() -> Self {
        Self {
            blocks_count: 128,
            inodes_count: 32,
        }
    }
}

/// Auxiliary structure for the computed layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsLayout {
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub inode_table_blocks: u32,
    pub root_dir_block: u32,
}

impl FsLayout {
    /// Blocks in use once the root directory exists.
    pub fn used_blocks(&self) -> u32 {
        self.root_dir_block
    }
}

pub fn build_layout(opts: &FormatOptions) -> Result<FsLayout> {
    let inodes_per_block = (BLOCK_SIZE / INODE_SIZE) as u32;
    // whole inode table blocks only
    let inodes_count = opts.inodes_count.div_ceil(inodes_per_block) * inodes_per_block;

    if inodes_count < FIRST_INO {
        return Err(Ext2Error::InvalidGeometry(format!(
            "need at least {FIRST_INO} inodes, asked for {}",
            opts.inodes_count
        )));
    }
    if inodes_count > BITS_PER_BITMAP {
        return Err(Ext2Error::InvalidGeometry(format!(
            "{inodes_count} inodes do not fit in one group"
        )));
    }
    // block 0 is outside the group when blocks are 1 KiB
    if opts.blocks_count > BITS_PER_BITMAP + 1 {
        return Err(Ext2Error::InvalidGeometry(format!(
            "{} blocks do not fit in one group",
            opts.blocks_count
        )));
    }

    let inode_table = 5;
    let inode_table_blocks = inodes_count / inodes_per_block;
    let root_dir_block = inode_table + inode_table_blocks;

    // leave at least one free data block after the root directory
    if root_dir_block + 1 >= opts.blocks_count {
        return Err(Ext2Error::InvalidGeometry(format!(
            "{} blocks is too small: metadata and root need {}",
            opts.blocks_count,
            root_dir_block + 2
        )));
    }

    Ok(FsLayout {
        blocks_count: opts.blocks_count,
        inodes_count,
        block_bitmap: 3,
        inode_bitmap: 4,
        inode_table,
        inode_table_blocks,
        root_dir_block,
    })
}

fn set_bit(bitmap: &mut [u8], pos: usize) {
    bitmap[pos / 8] |= 1 << (pos % 8);
}

/// Returns the bytes of a freshly formatted image.
pub fn format_bytes(opts: &FormatOptions) -> Result<Vec<u8>> {
    let layout = build_layout(opts)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;

    let mut bytes = vec![0u8; layout.blocks_count as usize * BLOCK_SIZE];
    let group_blocks = layout.blocks_count - 1;

    // Block bitmap: bit i stands for block i + 1. Metadata and the root
    // directory are used; bits past the end of the group are padding.
    {
        let start = layout.block_bitmap as usize * BLOCK_SIZE;
        let bitmap = &mut bytes[start..start + BLOCK_SIZE];
        for bit in 0..layout.used_blocks() as usize {
            set_bit(bitmap, bit);
        }
        for bit in group_blocks as usize..BITS_PER_BITMAP as usize {
            set_bit(bitmap, bit);
        }
    }

    // Inode bitmap: the reserved inodes 1..FIRST_INO are in use.
    {
        let start = layout.inode_bitmap as usize * BLOCK_SIZE;
        let bitmap = &mut bytes[start..start + BLOCK_SIZE];
        for bit in 0..(FIRST_INO - 1) as usize {
            set_bit(bitmap, bit);
        }
        for bit in layout.inodes_count as usize..BITS_PER_BITMAP as usize {
            set_bit(bitmap, bit);
        }
    }

    let free_blocks = group_blocks - layout.used_blocks();
    let free_inodes = layout.inodes_count - (FIRST_INO - 1);

    let superblock = Superblock {
        inodes_count: layout.inodes_count,
        blocks_count: layout.blocks_count,
        r_blocks_count: 0,
        free_blocks_count: free_blocks,
        free_inodes_count: free_inodes,
        first_data_block: 1,
        log_block_size: 0,
        blocks_per_group: BITS_PER_BITMAP,
        inodes_per_group: layout.inodes_count,
        magic: EXT2_MAGIC,
        state: 1,
        rev_level: 1,
        first_ino: FIRST_INO,
        inode_size: INODE_SIZE as u16,
        feature_incompat: FEATURE_INCOMPAT_FILETYPE,
    };
    superblock.write_to(&mut bytes[SUPERBLOCK_OFFSET..SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE])?;

    let gd = GroupDesc {
        block_bitmap: layout.block_bitmap,
        inode_bitmap: layout.inode_bitmap,
        inode_table: layout.inode_table,
        free_blocks_count: free_blocks as u16,
        free_inodes_count: free_inodes as u16,
        used_dirs_count: 1,
    };
    let gd_start = 2 * BLOCK_SIZE;
    gd.write_to(&mut bytes[gd_start..gd_start + BLOCK_SIZE])?;

    // Root directory inode and its single data block.
    let mut root = Inode::directory(0o755, now);
    root.size = BLOCK_SIZE as u32;
    root.blocks = SECTORS_PER_BLOCK;
    root.block[0] = layout.root_dir_block;
    let root_off =
        layout.inode_table as usize * BLOCK_SIZE + (ROOT_INO as usize - 1) * INODE_SIZE;
    root.write_to(&mut bytes[root_off..root_off + INODE_SIZE])?;

    let dir_start = layout.root_dir_block as usize * BLOCK_SIZE;
    let dir = &mut bytes[dir_start..dir_start + BLOCK_SIZE];
    let dot_len = dir_rec_len(1);
    write_dir_record(dir, 0, ROOT_INO, dot_len, FileType::Directory, b".")?;
    write_dir_record(dir, dot_len, ROOT_INO, BLOCK_SIZE - dot_len, FileType::Directory, b"..")?;

    debug!(?layout, free_blocks, free_inodes, "formatted image");
    Ok(bytes)
}

/// Writes a freshly formatted image to `path`, replacing any existing file.
pub fn format_image(path: &Path, opts: &FormatOptions) -> Result<FsLayout> {
    let layout = build_layout(opts)?;
    let bytes = format_bytes(opts)?;
    fs::write(path, bytes)?;
    Ok(layout)
}
