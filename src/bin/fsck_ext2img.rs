use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use colored::*;
use ext2img::fsck::run_fsck;
use ext2img::Ext2Volume;

mod cli;

fn status(ok: bool, label: &str) {
    if ok {
        println!("  {} {label} OK", "✓".green());
    } else {
        println!("  {} errors in {label}", "✗".red());
    }
}

fn main() -> Result<()> {
    cli::init_tracing();

    let image = env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: fsck.ext2img <image>")?;

    let vol = Ext2Volume::mount(&image)
        .with_context(|| format!("cannot mount {}", image.display()))?;

    let rep = run_fsck(&vol);

    println!("\n{}", " EXT2 FILESYSTEM CHECK ".on_blue().bold());
    println!("{}", "──────────────────────────────────────────".blue());

    println!("\n{}", "Summary".bold().underline());
    status(rep.blocks_ok, "blocks");
    status(rep.inodes_ok, "inodes");
    status(rep.dirs_ok, "directories");

    println!("\n{}", "Problems".bold().underline());
    if rep.errors.is_empty() {
        println!("  {} none found", "✓".green());
    } else {
        for err in &rep.errors {
            println!("  {} {}", "•".red(), err.red());
        }
    }

    if rep.is_clean() {
        println!("\n{} filesystem is clean.\n", "✓ OK".green().bold());
        Ok(())
    } else {
        println!(
            "\n{} {} problems found.\n",
            "✗ fsck finished with errors:".red().bold(),
            rep.errors.len().to_string().yellow()
        );
        process::exit(1);
    }
}
