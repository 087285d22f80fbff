use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use ext2img::{format_image, FormatOptions};

mod cli;

fn parse_count(arg: Option<String>, default: u32, what: &str) -> Result<u32> {
    match arg {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{what} must be a positive number, got {raw:?}")),
    }
}

fn main() -> Result<()> {
    cli::init_tracing();

    // 1. Read <image> [blocks] [inodes]
    let mut args = env::args().skip(1);
    let image = args
        .next()
        .map(PathBuf::from)
        .context("Usage: mkfs.ext2img <image> [blocks] [inodes]")?;

    let defaults = FormatOptions::default();
    let opts = FormatOptions {
        blocks_count: parse_count(args.next(), defaults.blocks_count, "blocks")?,
        inodes_count: parse_count(args.next(), defaults.inodes_count, "inodes")?,
    };

    if args.next().is_some() {
        return Err(anyhow!("Usage: mkfs.ext2img <image> [blocks] [inodes]"));
    }

    // 2. Compute the layout and write the whole image
    let layout = format_image(&image, &opts)
        .with_context(|| format!("cannot format {}", image.display()))?;

    println!(
        "mkfs.ext2img: {} created: {} blocks, {} inodes, root directory in block {}.",
        image.display(),
        layout.blocks_count,
        layout.inodes_count,
        layout.root_dir_block
    );

    Ok(())
}
