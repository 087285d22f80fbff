// src/image.rs
//! Byte-addressable view of a filesystem image.
//!
//! The whole image lives in an owned buffer. Every structure access goes
//! through the bounds-checked helpers below, so a malformed image produces
//! `Ext2Error::Corrupt` instead of reading past the end of the buffer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Ext2Error, Result};
use crate::layout::BLOCK_SIZE;

pub struct Image {
    bytes: Vec<u8>,
    path: Option<PathBuf>,
}

impl Image {
    /// Reads the image file at `path` into memory. `persist` writes it back.
    pub fn open(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        Ok(Self {
            bytes,
            path: Some(path.to_path_buf()),
        })
    }

    /// Wraps a synthetic buffer that is never written anywhere.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        ensure_slice(&self.bytes, offset, len)
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        let end = checked_end(self.bytes.len(), offset, len)?;
        Ok(&mut self.bytes[offset..end])
    }

    pub fn block(&self, block: u32) -> Result<&[u8]> {
        self.slice(block_offset(block)?, BLOCK_SIZE)
    }

    pub fn block_mut(&mut self, block: u32) -> Result<&mut [u8]> {
        self.slice_mut(block_offset(block)?, BLOCK_SIZE)
    }

    /// Writes the buffer back to the file it was opened from.
    pub fn persist(&self) -> io::Result<()> {
        match &self.path {
            Some(path) => fs::write(path, &self.bytes),
            None => Ok(()),
        }
    }
}

fn block_offset(block: u32) -> Result<usize> {
    (block as usize)
        .checked_mul(BLOCK_SIZE)
        .ok_or_else(|| Ext2Error::corrupt(usize::MAX, format!("block {block} overflows")))
}

fn checked_end(data_len: usize, offset: usize, len: usize) -> Result<usize> {
    let Some(end) = offset.checked_add(len) else {
        return Err(Ext2Error::corrupt(offset, "offset overflow"));
    };
    if end > data_len {
        return Err(Ext2Error::corrupt(
            offset,
            format!("need {len} bytes, image has {}", data_len.saturating_sub(offset)),
        ));
    }
    Ok(end)
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = checked_end(data.len(), offset, len)?;
    Ok(&data[offset..end])
}

#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_u8(data: &mut [u8], offset: usize, value: u8) -> Result<()> {
    checked_end(data.len(), offset, 1)?;
    data[offset] = value;
    Ok(())
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<()> {
    let end = checked_end(data.len(), offset, 2)?;
    data[offset..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let end = checked_end(data.len(), offset, 4)?;
    data[offset..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_little_endian() {
        let data = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(read_le_u16(&data, 0).unwrap(), 0x1234);
        assert_eq!(read_le_u32(&data, 2).unwrap(), 0x1234_5678);
    }

    #[test]
    fn out_of_range_access_is_corrupt_not_panic() {
        let mut data = [0u8; 4];
        assert!(matches!(
            read_le_u32(&data, 1),
            Err(Ext2Error::Corrupt { offset: 1, .. })
        ));
        assert!(write_le_u16(&mut data, 3, 7).is_err());
        assert!(ensure_slice(&data, usize::MAX, 2).is_err());
    }

    #[test]
    fn block_access_is_bounded_by_image_length() {
        let mut image = Image::from_bytes(vec![0u8; BLOCK_SIZE * 2]);
        assert_eq!(image.block(1).unwrap().len(), BLOCK_SIZE);
        assert!(image.block(2).is_err());
        image.block_mut(1).unwrap()[0] = 9;
        assert_eq!(image.as_bytes()[BLOCK_SIZE], 9);
    }

    #[test]
    fn persist_without_path_is_a_noop() {
        let image = Image::from_bytes(vec![1, 2, 3]);
        assert!(image.path().is_none());
        image.persist().unwrap();
    }
}
