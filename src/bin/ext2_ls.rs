// src/bin/ext2_ls.rs
use std::env;
use std::path::Path;

use anyhow::{bail, Result};
use ext2img::{list_directory, resolve, Ext2Volume};

mod cli;

/// Name shown when the path names a file: its last component.
fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn main() -> Result<()> {
    cli::init_tracing();

    // ext2_ls <image> <path>  or  ext2_ls <image> -a <path>
    let args: Vec<String> = env::args().skip(1).collect();
    let (image, show_dots, disk_path) = match args.as_slice() {
        [image, path] => (image, false, path),
        [image, flag, path] if flag == "-a" => (image, true, path),
        _ => bail!("Usage: ext2_ls <image file name> [-a] <absolute path on disk>"),
    };

    let vol = cli::or_exit(image, Ext2Volume::mount(Path::new(image)));
    let ino = cli::or_exit(disk_path, resolve(&vol, disk_path));
    let inode = cli::or_exit(disk_path, vol.inode_by_index(ino));

    if !inode.is_dir() {
        println!("{}", basename(disk_path));
        return Ok(());
    }

    for entry in cli::or_exit(disk_path, list_directory(&vol, ino)) {
        if show_dots || !entry.is_dot() {
            println!("{}", entry.name);
        }
    }
    Ok(())
}
