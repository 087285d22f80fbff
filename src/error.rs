// src/error.rs
use std::io;

use libc::{EEXIST, EINVAL, EIO, ENOENT, ENOSPC, ENOTDIR};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Ext2Error>;

/// Every outcome the core can report. Nothing here is printed by the
/// library; the binaries turn these into messages and exit codes.
#[derive(Debug, Error)]
pub enum Ext2Error {
    #[error("path must be absolute")]
    InvalidPath,
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("file exists")]
    AlreadyExists,
    #[error("no free {0} left in any group")]
    Exhausted(&'static str),
    #[error("directory has no room for another entry")]
    NoSpace,
    #[error("invalid entry name: {0}")]
    InvalidName(&'static str),
    #[error("inode {0} is outside the inode table")]
    InodeOutOfRange(u32),
    #[error("corrupt image at byte {offset}: {detail}")]
    Corrupt { offset: usize, detail: String },
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("mount failed: {0}")]
    MountFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Ext2Error {
    pub(crate) fn corrupt(offset: usize, detail: impl Into<String>) -> Self {
        Ext2Error::Corrupt {
            offset,
            detail: detail.into(),
        }
    }

    pub fn as_errno(&self) -> i32 {
        match self {
            Ext2Error::InvalidPath => ENOENT,
            Ext2Error::NotFound => ENOENT,
            Ext2Error::NotADirectory => ENOTDIR,
            Ext2Error::AlreadyExists => EEXIST,
            Ext2Error::Exhausted(_) => ENOSPC,
            Ext2Error::NoSpace => ENOSPC,
            Ext2Error::InvalidName(_) => EINVAL,
            Ext2Error::InodeOutOfRange(_) => EINVAL,
            Ext2Error::InvalidGeometry(_) => EINVAL,
            Ext2Error::Corrupt { .. } => EIO,
            Ext2Error::MountFailed(_) => EIO,
            Ext2Error::Io(_) => EIO,
        }
    }
}
