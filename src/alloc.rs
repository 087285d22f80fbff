// src/alloc.rs
//! First-fit inode and block allocation over the group bitmaps.
//!
//! Nothing is ever freed. Each allocation sets one bitmap bit and
//! decrements both the group's free counter and the superblock aggregate.

use tracing::{debug, warn};

use crate::error::{Ext2Error, Result};
use crate::fs::Ext2Volume;
use crate::layout::BLOCK_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resource {
    Inode,
    Block,
}

impl Resource {
    fn label(self) -> &'static str {
        match self {
            Resource::Inode => "inodes",
            Resource::Block => "blocks",
        }
    }
}

pub fn allocate_inode(vol: &mut Ext2Volume) -> Result<u32> {
    allocate(vol, Resource::Inode)
}

pub fn allocate_block(vol: &mut Ext2Volume) -> Result<u32> {
    allocate(vol, Resource::Block)
}

/// Index of the first clear bit among the first `limit` bits, scanning byte
/// by byte and bit by bit from the least significant bit.
pub fn first_zero_bit(bitmap: &[u8], limit: usize) -> Option<usize> {
    for (byte_idx, byte) in bitmap.iter().enumerate() {
        if *byte == 0xFF {
            continue;
        }
        for bit in 0..8 {
            let pos = byte_idx * 8 + bit;
            if pos >= limit {
                return None;
            }
            if byte & (1 << bit) == 0 {
                return Some(pos);
            }
        }
    }
    None
}

pub fn bit_is_set(bitmap: &[u8], pos: usize) -> bool {
    bitmap
        .get(pos / 8)
        .is_some_and(|byte| byte & (1 << (pos % 8)) != 0)
}

fn allocate(vol: &mut Ext2Volume, kind: Resource) -> Result<u32> {
    let mut sb = vol.superblock()?;
    let global_free = match kind {
        Resource::Inode => sb.free_inodes_count,
        Resource::Block => sb.free_blocks_count,
    };
    if global_free == 0 {
        return Err(Ext2Error::Exhausted(kind.label()));
    }

    for group in 0..sb.group_count() {
        let mut gd = vol.group_desc(group)?;
        let (group_free, bitmap_block, per_group, first_unit, total) = match kind {
            Resource::Inode => (
                gd.free_inodes_count,
                gd.inode_bitmap,
                sb.inodes_per_group,
                group * sb.inodes_per_group + 1,
                sb.inodes_count + 1,
            ),
            Resource::Block => (
                gd.free_blocks_count,
                gd.block_bitmap,
                sb.blocks_per_group,
                sb.first_data_block + group * sb.blocks_per_group,
                sb.blocks_count,
            ),
        };
        if group_free == 0 {
            continue;
        }

        // the last group may hold fewer units than a full group
        let units = per_group
            .min(total.saturating_sub(first_unit))
            .min((BLOCK_SIZE * 8) as u32) as usize;

        let bitmap = vol.block_mut(bitmap_block)?;
        let Some(bit) = first_zero_bit(bitmap, units) else {
            warn!(
                group,
                resource = kind.label(),
                free = group_free,
                "group counter says free but bitmap is full"
            );
            return Err(Ext2Error::Exhausted(kind.label()));
        };
        bitmap[bit / 8] |= 1 << (bit % 8);

        match kind {
            Resource::Inode => {
                gd.free_inodes_count -= 1;
                sb.free_inodes_count -= 1;
            }
            Resource::Block => {
                gd.free_blocks_count -= 1;
                sb.free_blocks_count -= 1;
            }
        }
        vol.set_group_desc(group, &gd)?;
        vol.set_superblock(&sb)?;

        let index = first_unit + bit as u32;
        debug!(group, bit, index, resource = kind.label(), "allocated");
        return Ok(index);
    }

    Err(Ext2Error::Exhausted(kind.label()))
}
