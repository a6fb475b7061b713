//! Splits large block transfers into chunks the DMA engine can move in one go.

use log::{debug, trace};

use crate::{
    common::commands::*,
    host::{SdhciError, SdhciResult},
    osa::Hal,
    regs::RegisterIo,
};

use super::W3kSdhci;

/// Chunk sizes, in blocks, for a transfer of `blocks` blocks when each
/// chunk holds `chunk_blocks`. The tail is merged into the last chunk so
/// no chunk is smaller than `chunk_blocks` unless the whole transfer is.
pub fn chunk_plan(blocks: u32, chunk_blocks: u32) -> impl Iterator<Item = u32> {
    let mut remaining = blocks;
    core::iter::from_fn(move || {
        if remaining == 0 || chunk_blocks == 0 {
            return None;
        }
        let chunk = if remaining <= chunk_blocks.saturating_mul(2) {
            remaining
        } else {
            chunk_blocks
        };
        remaining -= chunk;
        Some(chunk)
    })
}

impl<R: RegisterIo, H: Hal> W3kSdhci<R, H> {
    /// Entry point for the storage stack. Transfers larger than two chunk
    /// budgets are split into multi-block chunks, each closed with a stop
    /// command (and a status poll after writes). Chunk arguments follow the
    /// card's addressing mode, see [`W3kSdhci::set_high_capacity`].
    pub fn send_cmd(&mut self, cmd: &mut MmcCommand, data: Option<MmcData<'_>>) -> SdhciResult {
        let Some(mut data) = data else {
            return self.send_command(cmd, None);
        };

        if data.block_size == 0 {
            return Err(SdhciError::InvalidArgument);
        }
        let chunk_blocks = self.config.chunk_budget / data.block_size;
        if chunk_blocks == 0 {
            return Err(SdhciError::InvalidArgument);
        }

        // Small transfers, and those a merged tail would cover, go out as is.
        if data.blocks <= chunk_blocks.saturating_mul(2) {
            return self.send_command(cmd, Some(&mut data));
        }

        // Byte-addressed cards take the chunk offset in bytes.
        let unit = if self.high_capacity { 1 } else { data.block_size };
        // Every chunk starts at or before the last block.
        (data.blocks - 1)
            .checked_mul(unit)
            .and_then(|offset| cmd.arg.checked_add(offset))
            .ok_or(SdhciError::InvalidArgument)?;

        debug!(
            "CMD{}: {} blocks in chunks of {}",
            cmd.opcode, data.blocks, chunk_blocks
        );

        let opcode = if data.is_read() {
            MMC_READ_MULTIPLE_BLOCK
        } else {
            MMC_WRITE_MULTIPLE_BLOCK
        };
        let mut set_blocklen = MmcCommand::new(MMC_SET_BLOCKLEN, data.block_size, ResponseType::R1);
        let mut transfer = MmcCommand::new(opcode, cmd.arg, ResponseType::R1);

        self.send_command(&mut set_blocklen, None)?;

        let mut done = 0;
        for chunk in chunk_plan(data.blocks, chunk_blocks) {
            transfer.arg = cmd.arg + done * unit;
            trace!("chunk at {:#x}, {} blocks", transfer.arg, chunk);

            let mut part = data.slice(done, chunk);
            self.send_command(&mut transfer, Some(&mut part))?;
            done += chunk;

            if done == data.blocks {
                break;
            }

            let mut stop = MmcCommand::new(MMC_STOP_TRANSMISSION, 0, ResponseType::R1b);
            self.send_command(&mut stop, None)?;

            if !data.is_read() {
                let mut status =
                    MmcCommand::new(MMC_SEND_STATUS, (self.rca as u32) << 16, ResponseType::R1);
                self.send_command(&mut status, None)?;
            }

            self.send_command(&mut set_blocklen, None)?;
        }

        cmd.response = transfer.response;
        Ok(())
    }
}
