use crate::error::Result;
use crate::fs::Ext2Volume;
use crate::layout::{GroupDesc, Inode, Superblock};

/// What the checker needs to read. Nothing here writes.
pub trait FsckBackend {
    fn load_superblock(&self) -> Result<Superblock>;
    fn load_group_desc(&self, group: u32) -> Result<GroupDesc>;
    fn read_inode(&self, ino: u32) -> Result<Inode>;
    fn read_block(&self, block: u32) -> Result<Vec<u8>>;
}

impl FsckBackend for Ext2Volume {
    fn load_superblock(&self) -> Result<Superblock> {
        self.superblock()
    }

    fn load_group_desc(&self, group: u32) -> Result<GroupDesc> {
        self.group_desc(group)
    }

    fn read_inode(&self, ino: u32) -> Result<Inode> {
        self.inode_by_index(ino)
    }

    fn read_block(&self, block: u32) -> Result<Vec<u8>> {
        Ok(self.block(block)?.to_vec())
    }
}
