//! UF2 firmware container parsing and flash programming.
//!
//! The container is a sequence of fixed 512-byte blocks, each carrying up
//! to 476 payload bytes plus a target address. The format is deliberately
//! permissive: non-firmware blocks (padding, metadata, other families) are
//! legal, so anything that does not check out is skipped rather than
//! treated as an error.

use plcsim_core::CpuCore;
use tracing::{debug, warn};

pub const UF2_MAGIC_START0: u32 = 0x0A32_4655;
pub const UF2_MAGIC_START1: u32 = 0x9E5D_5157;
pub const UF2_MAGIC_END: u32 = 0x0AB1_6F30;
pub const UF2_BLOCK_SIZE: usize = 512;
pub const UF2_MAX_PAYLOAD: usize = 476;

const TARGET_ADDR_OFFSET: usize = 12;
const PAYLOAD_LEN_OFFSET: usize = 16;
const PAYLOAD_OFFSET: usize = 32;

/// One well-formed block lifted out of a container.
#[derive(Debug, Clone, Copy)]
pub struct Uf2Block<'a> {
    pub target_addr: u32,
    pub payload: &'a [u8],
}

fn read_u32_le(block: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        block[offset],
        block[offset + 1],
        block[offset + 2],
        block[offset + 3],
    ])
}

/// Iterates over the well-formed blocks of a container.
///
/// The input is scanned in non-overlapping 512-byte strides; a trailing
/// partial stride is ignored. A block qualifies only if all three magic
/// words match and its payload length is within the 476-byte limit.
pub fn uf2_blocks(data: &[u8]) -> impl Iterator<Item = Uf2Block<'_>> {
    data.chunks_exact(UF2_BLOCK_SIZE).filter_map(|block| {
        if read_u32_le(block, 0) != UF2_MAGIC_START0
            || read_u32_le(block, 4) != UF2_MAGIC_START1
            || read_u32_le(block, UF2_BLOCK_SIZE - 4) != UF2_MAGIC_END
        {
            return None;
        }
        let payload_len = read_u32_le(block, PAYLOAD_LEN_OFFSET) as usize;
        if payload_len > UF2_MAX_PAYLOAD {
            return None;
        }
        Some(Uf2Block {
            target_addr: read_u32_le(block, TARGET_ADDR_OFFSET),
            payload: &block[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload_len],
        })
    })
}

/// Programs every usable block of `data` into the core's flash.
///
/// Blocks addressed below the flash base or overrunning the flash capacity
/// are dropped, like malformed ones. There is no error path: a garbled
/// container degrades to "nothing usable loaded", which the firmware then
/// exhibits by failing to run meaningfully.
pub fn load_uf2<C: CpuCore>(data: &[u8], core: &mut C) {
    let flash_base = core.flash_base();
    let flash_size = core.flash_size();
    let mut loaded = 0usize;

    for block in uf2_blocks(data) {
        if block.target_addr < flash_base {
            debug!(
                "Skipping UF2 block targeting {:#x} (below flash base {:#x})",
                block.target_addr, flash_base
            );
            continue;
        }
        let offset = (block.target_addr - flash_base) as usize;
        if offset + block.payload.len() > flash_size {
            warn!(
                "Skipping UF2 block at {:#x}: payload overruns flash capacity",
                block.target_addr
            );
            continue;
        }
        core.write_flash(block.payload, offset);
        loaded += 1;
    }

    if loaded == 0 {
        warn!("No usable UF2 blocks in {} byte container", data.len());
    } else {
        debug!("Programmed {} UF2 blocks into flash", loaded);
    }
}
