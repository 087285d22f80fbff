use std::path::Path;

use tracing::debug;

use crate::error::{Ext2Error, Result};
use crate::image::Image;
use crate::layout::{
    GroupDesc, Inode, Superblock, BLOCK_SIZE, EXT2_MAGIC, GROUP_DESC_BLOCK, GROUP_DESC_SIZE,
    SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE,
};

// -----------------------------------------------------------------------------
// Mount handle
// -----------------------------------------------------------------------------

/// A mounted ext2 image. Every core operation takes this handle; it owns the
/// image bytes and decodes metadata from them on demand.
///
/// Writes land in the in-memory image immediately. Nothing reaches the
/// backing file until `sync` is called, and operations that touch several
/// structures (allocate, initialize inode, link) are not atomic: a failure
/// halfway leaves the earlier writes in the buffer.
pub struct Ext2Volume {
    image: Image,
}

impl Ext2Volume {
    /// Opens the image at `path` and validates its superblock.
    /// Any failure here is reported as `MountFailed`.
    pub fn mount(path: &Path) -> Result<Self> {
        let image = Image::open(path).map_err(|e| {
            Ext2Error::MountFailed(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_image(image)
    }

    /// Mounts an image that is already in memory.
    pub fn from_image(image: Image) -> Result<Self> {
        if image.len() < SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE {
            return Err(Ext2Error::MountFailed(format!(
                "image is {} bytes, too small to hold a superblock",
                image.len()
            )));
        }

        let volume = Self { image };
        let sb = volume
            .superblock()
            .map_err(|e| Ext2Error::MountFailed(e.to_string()))?;

        if sb.magic != EXT2_MAGIC {
            return Err(Ext2Error::MountFailed(format!(
                "bad superblock magic (expected = {:#X}, found = {:#X})",
                EXT2_MAGIC, sb.magic
            )));
        }
        if sb.block_size() != BLOCK_SIZE {
            return Err(Ext2Error::MountFailed(format!(
                "unsupported block size {} (only {} is supported)",
                sb.block_size(),
                BLOCK_SIZE
            )));
        }
        if sb.inodes_per_group == 0 || sb.blocks_per_group == 0 {
            return Err(Ext2Error::MountFailed(
                "superblock has zero inodes or blocks per group".to_string(),
            ));
        }

        debug!(
            inodes = sb.inodes_count,
            blocks = sb.blocks_count,
            free_inodes = sb.free_inodes_count,
            free_blocks = sb.free_blocks_count,
            groups = sb.group_count(),
            "mounted ext2 image"
        );
        Ok(volume)
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Flushes the in-memory image to the file it was mounted from.
    pub fn sync(&self) -> Result<()> {
        self.image.persist()?;
        Ok(())
    }

    // -------------------- Superblock --------------------

    pub fn superblock(&self) -> Result<Superblock> {
        Superblock::parse(self.image.slice(SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)?)
    }

    pub fn set_superblock(&mut self, sb: &Superblock) -> Result<()> {
        sb.write_to(self.image.slice_mut(SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)?)
    }

    pub fn group_count(&self) -> Result<u32> {
        Ok(self.superblock()?.group_count())
    }

    // -------------------- Group descriptors --------------------

    fn group_desc_offset(group: u32) -> usize {
        GROUP_DESC_BLOCK as usize * BLOCK_SIZE + group as usize * GROUP_DESC_SIZE
    }

    pub fn group_desc(&self, group: u32) -> Result<GroupDesc> {
        GroupDesc::parse(
            self.image
                .slice(Self::group_desc_offset(group), GROUP_DESC_SIZE)?,
        )
    }

    pub fn set_group_desc(&mut self, group: u32, gd: &GroupDesc) -> Result<()> {
        gd.write_to(
            self.image
                .slice_mut(Self::group_desc_offset(group), GROUP_DESC_SIZE)?,
        )
    }

    // -------------------- Inode table --------------------

    /// Byte offset of inode `ino` (1-based) inside the image.
    fn inode_offset(&self, ino: u32) -> Result<(usize, usize)> {
        let sb = self.superblock()?;
        if ino == 0 || ino > sb.inodes_count {
            return Err(Ext2Error::InodeOutOfRange(ino));
        }
        let group = (ino - 1) / sb.inodes_per_group;
        let index = (ino - 1) % sb.inodes_per_group;
        let table = self.group_desc(group)?.inode_table as usize;
        let record = sb.inode_record_size();
        Ok((table * BLOCK_SIZE + index as usize * record, record))
    }

    pub fn inode_by_index(&self, ino: u32) -> Result<Inode> {
        let (offset, len) = self.inode_offset(ino)?;
        Inode::parse(self.image.slice(offset, len)?)
    }

    pub fn write_inode(&mut self, ino: u32, inode: &Inode) -> Result<()> {
        let (offset, len) = self.inode_offset(ino)?;
        inode.write_to(self.image.slice_mut(offset, len)?)
    }

    // -------------------- Data blocks --------------------

    pub fn block(&self, block: u32) -> Result<&[u8]> {
        self.image.block(block)
    }

    pub fn block_mut(&mut self, block: u32) -> Result<&mut [u8]> {
        self.image.block_mut(block)
    }
}
