use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "2MiB"
}

impl MemoryRange {
    pub fn size_bytes(&self) -> Result<u64> {
        parse_size(&self.size)
    }
}

/// Description of the emulated chip: where flash lives and how fast the
/// system clock runs. The instruction-set core itself is external; this
/// only carries the parameters the loader and the execution loop need.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChipDescriptor {
    pub name: String,
    pub arch: String, // e.g. "cortex-m0plus"
    pub flash: MemoryRange,
    pub clock_hz: u64,
}

impl ChipDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open chip descriptor at {:?}", path.as_ref()))?;
        let chip: Self = serde_yaml::from_reader(f).context("Failed to parse Chip Descriptor")?;
        chip.validate()?;
        Ok(chip)
    }

    /// Default target: RP2040, flash mapped at 0x1000_0000, 125 MHz core.
    pub fn rp2040() -> Self {
        Self {
            name: "rp2040".to_string(),
            arch: "cortex-m0plus".to_string(),
            flash: MemoryRange {
                base: 0x1000_0000,
                size: "2MiB".to_string(),
            },
            clock_hz: 125_000_000,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.clock_hz == 0 {
            anyhow::bail!("Chip 'clock_hz' must be greater than zero");
        }
        let size = self.flash.size_bytes()?;
        if size == 0 {
            anyhow::bail!("Chip flash size must be greater than zero");
        }
        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
