// src/bin/ext2_mkdir.rs
use std::env;
use std::path::Path;

use anyhow::{bail, Result};
use ext2img::{create_directory, Ext2Volume};
use tracing::info;

mod cli;

fn main() -> Result<()> {
    cli::init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let [image, disk_path] = args.as_slice() else {
        bail!("Usage: ext2_mkdir <image file name> <absolute path of directory>");
    };

    let mut vol = cli::or_exit(image, Ext2Volume::mount(Path::new(image)));
    let ino = cli::or_exit(disk_path, create_directory(&mut vol, disk_path));
    cli::or_exit(image, vol.sync());

    info!(path = %disk_path, ino, "directory created");
    Ok(())
}
