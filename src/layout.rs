// src/layout.rs
//! On-disk constants and structures of the ext2 revision-1 layout with
//! 1 KiB blocks.
//!
//! Each structure is decoded field by field from its little-endian bytes and
//! written back in place, so fields this crate does not model are preserved.

use crate::error::{Ext2Error, Result};
use crate::image::{read_le_u16, read_le_u32, read_u8, write_le_u16, write_le_u32, write_u8};

// -----------------------------------------------------------------------------
// Geometry
// -----------------------------------------------------------------------------

pub const BLOCK_SIZE: usize = 1024;
pub const SUPERBLOCK_OFFSET: usize = 1024;
pub const SUPERBLOCK_SIZE: usize = 1024;
pub const GROUP_DESC_BLOCK: u32 = 2;
pub const GROUP_DESC_SIZE: usize = 32;
pub const INODE_SIZE: usize = 128;
pub const EXT2_MAGIC: u16 = 0xEF53;

pub const ROOT_INO: u32 = 2;
pub const FIRST_INO: u32 = 11;

pub const DIRECT_BLOCKS: usize = 12;
pub const INDIRECT_SLOT: usize = 12;
pub const N_BLOCKS: usize = 15;
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;

pub const DIR_ENTRY_HEADER_LEN: usize = 8;
pub const NAME_LEN: usize = 255;

pub const S_IFMT: u16 = 0xF000;
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFREG: u16 = 0x8000;

pub const FEATURE_INCOMPAT_FILETYPE: u32 = 0x0002;

/// Sectors (512 bytes) per block, the unit of `Inode::blocks`.
pub const SECTORS_PER_BLOCK: u32 = (BLOCK_SIZE / 512) as u32;

/// Record length a directory entry with a `name_len`-byte name needs.
pub fn dir_rec_len(name_len: usize) -> usize {
    (DIR_ENTRY_HEADER_LEN + name_len + 3) & !3
}

// -----------------------------------------------------------------------------
// Superblock
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub r_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub magic: u16,
    pub state: u16,
    pub rev_level: u32,
    pub first_ino: u32,
    pub inode_size: u16,
    pub feature_incompat: u32,
}

impl Superblock {
    /// Decodes the superblock from its 1024-byte region.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            inodes_count: read_le_u32(data, 0)?,
            blocks_count: read_le_u32(data, 4)?,
            r_blocks_count: read_le_u32(data, 8)?,
            free_blocks_count: read_le_u32(data, 12)?,
            free_inodes_count: read_le_u32(data, 16)?,
            first_data_block: read_le_u32(data, 20)?,
            log_block_size: read_le_u32(data, 24)?,
            blocks_per_group: read_le_u32(data, 32)?,
            inodes_per_group: read_le_u32(data, 40)?,
            magic: read_le_u16(data, 56)?,
            state: read_le_u16(data, 58)?,
            rev_level: read_le_u32(data, 76)?,
            first_ino: read_le_u32(data, 84)?,
            inode_size: read_le_u16(data, 88)?,
            feature_incompat: read_le_u32(data, 96)?,
        })
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        write_le_u32(data, 0, self.inodes_count)?;
        write_le_u32(data, 4, self.blocks_count)?;
        write_le_u32(data, 8, self.r_blocks_count)?;
        write_le_u32(data, 12, self.free_blocks_count)?;
        write_le_u32(data, 16, self.free_inodes_count)?;
        write_le_u32(data, 20, self.first_data_block)?;
        write_le_u32(data, 24, self.log_block_size)?;
        // fragments are the same size as blocks
        write_le_u32(data, 28, self.log_block_size)?;
        write_le_u32(data, 32, self.blocks_per_group)?;
        write_le_u32(data, 36, self.blocks_per_group)?;
        write_le_u32(data, 40, self.inodes_per_group)?;
        write_le_u16(data, 56, self.magic)?;
        write_le_u16(data, 58, self.state)?;
        write_le_u32(data, 76, self.rev_level)?;
        write_le_u32(data, 84, self.first_ino)?;
        write_le_u16(data, 88, self.inode_size)?;
        write_le_u32(data, 96, self.feature_incompat)?;
        Ok(())
    }

    /// Inode record size; revision 0 images always use 128 bytes.
    pub fn inode_record_size(&self) -> usize {
        if self.rev_level == 0 || self.inode_size == 0 {
            INODE_SIZE
        } else {
            self.inode_size as usize
        }
    }

    pub fn block_size(&self) -> usize {
        1024usize << self.log_block_size.min(16)
    }

    pub fn group_count(&self) -> u32 {
        if self.blocks_per_group == 0 {
            return 0;
        }
        let data_blocks = self.blocks_count.saturating_sub(self.first_data_block);
        data_blocks.div_ceil(self.blocks_per_group)
    }
}

// -----------------------------------------------------------------------------
// Group descriptor
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl GroupDesc {
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            block_bitmap: read_le_u32(data, 0)?,
            inode_bitmap: read_le_u32(data, 4)?,
            inode_table: read_le_u32(data, 8)?,
            free_blocks_count: read_le_u16(data, 12)?,
            free_inodes_count: read_le_u16(data, 14)?,
            used_dirs_count: read_le_u16(data, 16)?,
        })
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        write_le_u32(data, 0, self.block_bitmap)?;
        write_le_u32(data, 4, self.inode_bitmap)?;
        write_le_u32(data, 8, self.inode_table)?;
        write_le_u16(data, 12, self.free_blocks_count)?;
        write_le_u16(data, 14, self.free_inodes_count)?;
        write_le_u16(data, 16, self.used_dirs_count)?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Inode
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    /// Allocated space in 512-byte sectors.
    pub blocks: u32,
    pub flags: u32,
    pub block: [u32; N_BLOCKS],
}

impl Inode {
    /// A fresh directory inode with no data blocks yet.
    pub fn directory(perm: u16, now: u32) -> Self {
        Self {
            mode: S_IFDIR | (perm & 0o7777),
            atime: now,
            ctime: now,
            mtime: now,
            links_count: 2,
            ..Self::default()
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut block = [0u32; N_BLOCKS];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = read_le_u32(data, 40 + i * 4)?;
        }
        Ok(Self {
            mode: read_le_u16(data, 0)?,
            uid: read_le_u16(data, 2)?,
            size: read_le_u32(data, 4)?,
            atime: read_le_u32(data, 8)?,
            ctime: read_le_u32(data, 12)?,
            mtime: read_le_u32(data, 16)?,
            dtime: read_le_u32(data, 20)?,
            gid: read_le_u16(data, 24)?,
            links_count: read_le_u16(data, 26)?,
            blocks: read_le_u32(data, 28)?,
            flags: read_le_u32(data, 32)?,
            block,
        })
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        write_le_u16(data, 0, self.mode)?;
        write_le_u16(data, 2, self.uid)?;
        write_le_u32(data, 4, self.size)?;
        write_le_u32(data, 8, self.atime)?;
        write_le_u32(data, 12, self.ctime)?;
        write_le_u32(data, 16, self.mtime)?;
        write_le_u32(data, 20, self.dtime)?;
        write_le_u16(data, 24, self.gid)?;
        write_le_u16(data, 26, self.links_count)?;
        write_le_u32(data, 28, self.blocks)?;
        write_le_u32(data, 32, self.flags)?;
        for (i, ptr) in self.block.iter().enumerate() {
            write_le_u32(data, 40 + i * 4, *ptr)?;
        }
        Ok(())
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn direct_blocks(&self) -> &[u32] {
        &self.block[..DIRECT_BLOCKS]
    }

    pub fn indirect_block(&self) -> u32 {
        self.block[INDIRECT_SLOT]
    }
}

// -----------------------------------------------------------------------------
// Directory entries
// -----------------------------------------------------------------------------

/// Directory entry type tag (`file_type` byte of `ext2_dir_entry_2`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    RegularFile = 1,
    Directory = 2,
    CharDevice = 3,
    BlockDevice = 4,
    NamedPipe = 5,
    Socket = 6,
    Symlink = 7,
}

impl FileType {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => FileType::RegularFile,
            2 => FileType::Directory,
            3 => FileType::CharDevice,
            4 => FileType::BlockDevice,
            5 => FileType::NamedPipe,
            6 => FileType::Socket,
            7 => FileType::Symlink,
            _ => FileType::Unknown,
        }
    }
}

/// One raw record inside a directory block, located at `offset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirRecord {
    pub offset: usize,
    pub inode: u32,
    pub rec_len: u16,
    pub file_type: FileType,
    pub name: Vec<u8>,
}

impl DirRecord {
    /// Decodes the record at `offset` and checks that it fits in `block`.
    pub fn parse(block: &[u8], offset: usize) -> Result<Self> {
        let inode = read_le_u32(block, offset)?;
        let rec_len = read_le_u16(block, offset + 4)?;
        let name_len = read_u8(block, offset + 6)? as usize;
        let file_type = FileType::from_u8(read_u8(block, offset + 7)?);

        let span = rec_len as usize;
        if span < DIR_ENTRY_HEADER_LEN || span % 4 != 0 {
            return Err(Ext2Error::corrupt(
                offset,
                format!("invalid directory rec_len {span}"),
            ));
        }
        if offset + span > block.len() {
            return Err(Ext2Error::corrupt(
                offset,
                "directory entry crosses the block boundary",
            ));
        }
        if DIR_ENTRY_HEADER_LEN + name_len > span {
            return Err(Ext2Error::corrupt(
                offset,
                "directory entry name exceeds rec_len",
            ));
        }
        let start = offset + DIR_ENTRY_HEADER_LEN;
        Ok(Self {
            offset,
            inode,
            rec_len,
            file_type,
            name: block[start..start + name_len].to_vec(),
        })
    }

    /// Bytes this record really needs; the rest of `rec_len` is slack.
    pub fn actual_len(&self) -> usize {
        dir_rec_len(self.name.len())
    }

    pub fn end(&self) -> usize {
        self.offset + self.rec_len as usize
    }
}

/// Writes a record header plus name at `offset`.
pub fn write_dir_record(
    block: &mut [u8],
    offset: usize,
    inode: u32,
    rec_len: usize,
    file_type: FileType,
    name: &[u8],
) -> Result<()> {
    let name_len = u8::try_from(name.len())
        .map_err(|_| Ext2Error::InvalidName("longer than 255 bytes"))?;
    let rec_len_u16 = u16::try_from(rec_len)
        .map_err(|_| Ext2Error::corrupt(offset, "rec_len exceeds u16"))?;
    if rec_len < dir_rec_len(name.len()) || offset + rec_len > block.len() {
        return Err(Ext2Error::corrupt(
            offset,
            format!("rec_len {rec_len} cannot hold a {}-byte name here", name.len()),
        ));
    }

    write_le_u32(block, offset, inode)?;
    write_le_u16(block, offset + 4, rec_len_u16)?;
    write_u8(block, offset + 6, name_len)?;
    write_u8(block, offset + 7, file_type as u8)?;
    let start = offset + DIR_ENTRY_HEADER_LEN;
    block[start..start + name.len()].copy_from_slice(name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rec_len_is_header_plus_name_rounded_to_four() {
        assert_eq!(dir_rec_len(1), 12);
        assert_eq!(dir_rec_len(2), 12);
        assert_eq!(dir_rec_len(4), 12);
        assert_eq!(dir_rec_len(5), 16);
        assert_eq!(dir_rec_len(255), 264);
    }

    #[test]
    fn inode_fields_land_at_ext2_offsets() {
        let mut raw = vec![0u8; INODE_SIZE];
        let mut inode = Inode::directory(0o755, 7);
        inode.size = 1024;
        inode.blocks = 2;
        inode.block[0] = 9;
        inode.block[INDIRECT_SLOT] = 40;
        inode.write_to(&mut raw).unwrap();

        assert_eq!(&raw[0..2], &(S_IFDIR | 0o755).to_le_bytes());
        assert_eq!(&raw[4..8], &1024u32.to_le_bytes());
        assert_eq!(&raw[26..28], &2u16.to_le_bytes());
        assert_eq!(&raw[40..44], &9u32.to_le_bytes());
        assert_eq!(&raw[88..92], &40u32.to_le_bytes());

        let back = Inode::parse(&raw).unwrap();
        assert_eq!(back, inode);
        assert!(back.is_dir());
        assert!(!back.is_regular());
        assert_eq!(back.indirect_block(), 40);
    }

    #[test]
    fn dir_mode_check_uses_the_whole_format_field() {
        // a socket (0xC000) shares the 0x4000 bit with directories
        let socket = Inode {
            mode: 0xC000 | 0o644,
            ..Inode::default()
        };
        assert!(!socket.is_dir());
    }

    #[test]
    fn dir_record_rejects_zero_rec_len() {
        let block = vec![0u8; BLOCK_SIZE];
        assert!(matches!(
            DirRecord::parse(&block, 0),
            Err(Ext2Error::Corrupt { offset: 0, .. })
        ));
    }

    #[test]
    fn dir_record_round_trips_name_and_type() {
        let mut block = vec![0u8; BLOCK_SIZE];
        write_dir_record(&mut block, 0, 12, BLOCK_SIZE, FileType::Directory, b"docs").unwrap();
        let rec = DirRecord::parse(&block, 0).unwrap();
        assert_eq!(rec.inode, 12);
        assert_eq!(rec.rec_len as usize, BLOCK_SIZE);
        assert_eq!(rec.file_type, FileType::Directory);
        assert_eq!(rec.name, b"docs");
        assert_eq!(rec.actual_len(), 12);
    }

    #[test]
    fn group_count_rounds_up() {
        let sb = Superblock {
            inodes_count: 32,
            blocks_count: 128,
            r_blocks_count: 0,
            free_blocks_count: 0,
            free_inodes_count: 0,
            first_data_block: 1,
            log_block_size: 0,
            blocks_per_group: 8192,
            inodes_per_group: 32,
            magic: EXT2_MAGIC,
            state: 1,
            rev_level: 1,
            first_ino: FIRST_INO,
            inode_size: 128,
            feature_incompat: FEATURE_INCOMPAT_FILETYPE,
        };
        assert_eq!(sb.group_count(), 1);
        assert_eq!(sb.block_size(), BLOCK_SIZE);
        assert_eq!(sb.inode_record_size(), INODE_SIZE);
    }
}
