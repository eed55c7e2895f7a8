use anyhow::{Context, Result};
use clap::Parser;
use plcsim_config::ChipDescriptor;
use plcsim_loader::{uf2_blocks, UF2_BLOCK_SIZE};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect UF2 firmware containers", long_about = None)]
struct Args {
    /// Path to the UF2 firmware container
    #[arg(short, long)]
    firmware: PathBuf,

    /// Chip descriptor (YAML); block addresses are validated against its
    /// flash range
    #[arg(short, long)]
    chip: Option<PathBuf>,

    /// Enable verbose diagnostics
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    info!("Inspecting firmware container: {:?}", args.firmware);
    let data = std::fs::read(&args.firmware)
        .with_context(|| format!("Failed to read firmware container: {:?}", args.firmware))?;

    println!("container:    {}", args.firmware.display());
    println!(
        "size:         {} bytes ({} strides)",
        data.len(),
        data.len() / UF2_BLOCK_SIZE
    );
    println!("sha256:       {:x}", Sha256::digest(&data));

    let blocks: Vec<_> = uf2_blocks(&data).collect();
    println!("valid blocks: {}", blocks.len());

    if blocks.is_empty() {
        warn!("No usable UF2 blocks; loading this container would program nothing");
    } else {
        let lo = blocks.iter().map(|b| u64::from(b.target_addr)).min().unwrap();
        let hi = blocks
            .iter()
            .map(|b| u64::from(b.target_addr) + b.payload.len() as u64)
            .max()
            .unwrap();
        let total: usize = blocks.iter().map(|b| b.payload.len()).sum();
        println!("payload:      {} bytes, {:#x}..{:#x}", total, lo, hi);
    }

    if let Some(chip_path) = args.chip {
        info!("Loading chip descriptor: {:?}", chip_path);
        let chip = ChipDescriptor::from_file(&chip_path)?;
        let flash_base = chip.flash.base;
        let flash_end = flash_base + chip.flash.size_bytes()?;
        let outside = blocks
            .iter()
            .filter(|b| {
                let start = u64::from(b.target_addr);
                start < flash_base || start + b.payload.len() as u64 > flash_end
            })
            .count();
        println!(
            "chip:         {} ({} blocks outside flash range)",
            chip.name, outside
        );
        if outside > 0 {
            warn!(
                "{} blocks fall outside {:#x}..{:#x} and would be skipped by the loader",
                outside, flash_base, flash_end
            );
        }
    }

    Ok(())
}
