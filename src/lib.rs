pub mod alloc;
pub mod dir;
pub mod error;
pub mod fs;
pub mod fsck;
pub mod image;
pub mod layout;
pub mod mkfs;
pub mod path;

pub use crate::alloc::{allocate_block, allocate_inode};
pub use crate::dir::{
    create_directory, find_entry_in_block, find_entry_in_inode, link, list_directory, DirEntry,
};
pub use crate::error::{Ext2Error, Result};
pub use crate::fs::Ext2Volume;
pub use crate::image::Image;
pub use crate::layout::{DirRecord, FileType, GroupDesc, Inode, Superblock, BLOCK_SIZE, ROOT_INO};
pub use crate::mkfs::{format_bytes, format_image, FormatOptions};
pub use crate::path::resolve;
