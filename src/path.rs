// src/path.rs
//! Absolute path resolution.

use tracing::trace;

use crate::dir::find_entry_in_inode;
use crate::error::{Ext2Error, Result};
use crate::fs::Ext2Volume;
use crate::layout::ROOT_INO;

/// Resolves a slash-separated absolute path to an inode index.
///
/// Empty components (`//`, trailing `/`) are ignored, so `"/"` is the root.
/// Every inode a component is looked up in must be a directory.
pub fn resolve(vol: &Ext2Volume, path: &str) -> Result<u32> {
    if !path.starts_with('/') {
        return Err(Ext2Error::InvalidPath);
    }

    let mut current = ROOT_INO;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        let inode = vol.inode_by_index(current)?;
        if !inode.is_dir() {
            return Err(Ext2Error::NotADirectory);
        }
        let entry = find_entry_in_inode(vol, &inode, component.as_bytes())?
            .ok_or(Ext2Error::NotFound)?;
        trace!(component, from = current, to = entry.inode, "resolved component");
        current = entry.inode;
    }
    Ok(current)
}

/// Splits an absolute path into its parent path and final name.
/// Trailing slashes are dropped: `"/a/b/"` gives `("/a", "b")`.
pub fn split_parent(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(Ext2Error::InvalidPath);
    }
    let trimmed = path.trim_end_matches('/');
    let Some(idx) = trimmed.rfind('/') else {
        // only slashes: the root has no parent or name
        return Err(Ext2Error::InvalidPath);
    };
    let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
    Ok((parent, &trimmed[idx + 1..]))
}
