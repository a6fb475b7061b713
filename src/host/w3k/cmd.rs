//! Single-transfer engine: one command, optionally with one DMA data phase.

use core::mem::size_of_val;

use log::{debug, error, trace, warn};

use crate::{
    common::commands::{DataBuffer, MmcCommand, MmcData, ResponseType},
    common::config::Quirks,
    host::{SdhciError, SdhciResult},
    osa::Hal,
    regs::RegisterIo,
};

use super::{
    W3kSdhci,
    dma::{AdmaTable, DmaDirection, DmaProgrammer, dma_addressable},
    regs::*,
};

const SD_RESP_NONE: u32 = 0;
const SD_RESP_SHORT: u32 = 1;
const SD_RESP_LONG: u32 = 2;
const SD_RESP_R3: u32 = 3;
const SD_RESP_R4: u32 = 4;
const SD_RESP_BUSY: u32 = 7;

/// Controller response code for each response format.
const RESPONSE_CODES: [(ResponseType, u32); 9] = [
    (ResponseType::None, SD_RESP_NONE),
    (ResponseType::R1, SD_RESP_SHORT),
    (ResponseType::R5, SD_RESP_SHORT),
    (ResponseType::R6, SD_RESP_SHORT),
    (ResponseType::R7, SD_RESP_SHORT),
    (ResponseType::R1b, SD_RESP_BUSY),
    (ResponseType::R2, SD_RESP_LONG),
    (ResponseType::R3, SD_RESP_R3),
    (ResponseType::R4, SD_RESP_R4),
];

pub fn response_code(resp_type: ResponseType) -> u32 {
    RESPONSE_CODES
        .iter()
        .find(|(ty, _)| *ty == resp_type)
        .map_or(SD_RESP_NONE, |(_, code)| *code)
}

/// Data-phase shape of a command, as far as the command word cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataShape {
    pub block_size: u32,
    pub blocks: u32,
    pub write: bool,
}

/// Encode the command register value.
pub fn make_command_word(opcode: u8, resp_type: ResponseType, data: Option<DataShape>) -> u32 {
    let mut word = (opcode as u32 & W3K_CMD_INDEX_MASK)
        | ((response_code(resp_type) & W3K_CMD_RESP_MASK) << W3K_CMD_RESP_SHIFT);

    if let Some(data) = data {
        word |= (data.block_size & W3K_CMD_BLKSZ_MASK) << W3K_CMD_BLKSZ_SHIFT;
        let mut flags = if data.blocks > 1 {
            CommandFlags::MULTI_BLOCK
        } else {
            CommandFlags::SINGLE_BLOCK
        };
        if data.write {
            flags |= CommandFlags::WRITE;
        }
        word |= flags.bits();
    }

    if resp_type.has_crc() {
        word |= CommandFlags::CRC_CHECK.bits();
    }
    word
}

/// Where the engine moves data for one transfer. Keeps the descriptor
/// table alive until completion.
struct DmaSetup {
    staged: bool,
    /// Bus address the engine was programmed with.
    phys: usize,
    len: usize,
    _table: Option<AdmaTable>,
}

enum CommandOutcome {
    Done,
    /// R1b command under `BROKEN_R1B` that never raised any status bit.
    BusyAccepted,
}

impl<R: RegisterIo, H: Hal> W3kSdhci<R, H> {
    /// Run exactly one command with at most one DMA data phase.
    pub fn send_command(
        &mut self,
        cmd: &mut MmcCommand,
        mut data: Option<&mut MmcData<'_>>,
    ) -> SdhciResult {
        debug!("send_command(CMD{}, arg {:#x})", cmd.opcode, cmd.arg);

        if let Some(data) = data.as_deref() {
            check_data(data)?;
        }

        self.wait_not_busy()?;
        self.write(Reg::Argument, cmd.arg);

        let mut shape = None;
        let mut setup = None;
        if let Some(data) = data.as_deref_mut() {
            self.dma_flush();
            shape = Some(DataShape {
                block_size: data.block_size,
                blocks: data.blocks,
                write: !data.is_read(),
            });
            self.write(Reg::BlockCount, data.blocks);
            self.clear_dma_status();
            setup = Some(self.setup_dma(data)?);
        }

        let word = make_command_word(cmd.opcode, cmd.resp_type, shape);
        self.clear_int_status();
        trace!("command word {:#x}", word);
        self.write(Reg::Command, word);

        let mut result = self.wait_command(cmd).map(|outcome| {
            if matches!(outcome, CommandOutcome::Done) {
                self.read_response(cmd);
            }
        });

        if result.is_ok() && data.is_some() {
            result = self.wait_for_data();
        }

        if self.config.quirks.contains(Quirks::WAIT_SEND_CMD) {
            self.hal.delay_us(1000);
        }

        let stat = self.clear_int_status();
        self.clear_dma_status();

        if result.is_ok()
            && let (Some(data), Some(setup)) = (data.as_deref_mut(), setup.as_ref())
            && let DataBuffer::Read(buf) = &mut data.buffer
        {
            // Drop lines the CPU may have pulled in while DMA was running.
            if let Some(cache) = self.cache.as_ref() {
                cache.flush(setup.phys, setup.len);
            }
            if setup.staged {
                result = self.staging.unstage_in(buf);
            }
        }

        result?;

        if stat.contains(IntStatus::CMD_TIMEOUT) {
            return Err(SdhciError::CommandTimeout);
        }
        if stat.intersects(IntStatus::DATA_TIMEOUT | IntStatus::DATA_CRC) {
            return Err(if stat.contains(IntStatus::DATA_CRC) {
                SdhciError::DataCrcError
            } else {
                SdhciError::DataTimeout
            });
        }
        Ok(())
    }

    fn wait_not_busy(&self) -> SdhciResult {
        let poll = self.config.poll;
        for _ in 0..poll.busy_retries {
            if !self.card_busy() {
                return Ok(());
            }
            self.hal.delay_us(poll.busy_poll_us);
        }
        if self.card_busy() {
            warn!("controller still busy, command not issued");
            return Err(SdhciError::CommandTimeout);
        }
        Ok(())
    }

    fn r1b_silence_accepted(&self, cmd: &MmcCommand) -> bool {
        cmd.resp_type == ResponseType::R1b && self.config.quirks.contains(Quirks::BROKEN_R1B)
    }

    fn wait_command(&self, cmd: &MmcCommand) -> SdhciResult<CommandOutcome> {
        let poll = self.config.poll;
        let mut retry = poll.command_retries;
        let stat = loop {
            let stat = IntStatus::from_bits_retain(self.read(Reg::IntStatus));
            if stat.intersects(IntStatus::CMD_DONE | IntStatus::CMD_TIMEOUT | IntStatus::CMD_CRC)
            {
                break stat;
            }
            if retry == 0 {
                break stat;
            }
            retry -= 1;
            if poll.command_poll_us != 0 {
                self.hal.delay_us(poll.command_poll_us);
            }
        };

        if stat.contains(IntStatus::CMD_CRC) {
            error!("command CRC error, status {:#x}", stat.bits());
            return Err(SdhciError::CommandCrcError);
        }
        if stat.contains(IntStatus::CMD_DONE) && !stat.contains(IntStatus::CMD_TIMEOUT) {
            return Ok(CommandOutcome::Done);
        }
        // Only an exhausted budget with nothing raised counts as busy.
        if !stat.contains(IntStatus::CMD_TIMEOUT) && self.r1b_silence_accepted(cmd) {
            return Ok(CommandOutcome::BusyAccepted);
        }
        debug!("command timeout, status {:#x}", stat.bits());
        Err(SdhciError::CommandTimeout)
    }

    fn read_response(&self, cmd: &mut MmcCommand) {
        if cmd.resp_type.is_long() {
            for (i, word) in cmd.response.iter_mut().enumerate() {
                *word = self.read(Reg::response(3 - i));
            }
        } else if cmd.resp_type != ResponseType::None {
            cmd.response[0] = self.read(Reg::Response0);
        }
        trace!("response {:#x?}", cmd.response);
    }

    /// Wait for DMA completion and data-done, bailing out on data errors.
    pub(crate) fn wait_for_data(&self) -> SdhciResult {
        let poll = self.config.poll;
        let mut dma_done = false;
        let mut data_done = false;

        for _ in 0..poll.data_retries {
            let stat = IntStatus::from_bits_retain(self.read(Reg::IntStatus));
            if stat.contains(IntStatus::DATA_TIMEOUT) {
                self.disable_dma();
                error!("data timeout, status {:#x}", stat.bits());
                return Err(SdhciError::DataTimeout);
            }
            if stat.contains(IntStatus::DATA_CRC) {
                self.disable_dma();
                error!("data CRC error, status {:#x}", stat.bits());
                return Err(SdhciError::DataCrcError);
            }

            let dma = DmaStatus::from_bits_retain(self.read(Reg::DmaStatus));
            if dma.contains(DmaStatus::ERROR) {
                warn!("DMA error, status {:#x}", dma.bits());
            }
            if dma.is_done() {
                dma_done = true;
            }
            if dma.bits() & DmaStatus::EVENT_MASK != 0 {
                self.write(Reg::DmaStatus, dma.bits() & DmaStatus::EVENT_MASK);
            }
            if stat.contains(IntStatus::DATA_DONE) {
                data_done = true;
            }
            if !stat.is_empty() {
                self.write(Reg::IntStatus, stat.bits());
            }
            if dma_done && data_done {
                return Ok(());
            }
            self.hal.delay_us(poll.data_poll_us);
        }

        error!(
            "data transfer timed out, dma done: {}, data done: {}",
            dma_done, data_done
        );
        Err(SdhciError::DataTimeout)
    }

    fn setup_dma(&mut self, data: &MmcData<'_>) -> SdhciResult<DmaSetup> {
        let len = data.trans_bytes();
        if self.dma == DmaProgrammer::Simple && len > W3K_SDMA_LEN_MASK as usize {
            error!("{:#x} bytes exceed the SDMA length field", len);
            return Err(SdhciError::InvalidArgument);
        }
        let dir = if data.is_read() {
            DmaDirection::Read
        } else {
            DmaDirection::Write
        };

        let mut cpu_addr = data.buffer.addr();
        let mut phys = self.hal.virt_to_phys(cpu_addr);
        let staged = self.staging.required(phys, len);

        if staged {
            cpu_addr = match &data.buffer {
                DataBuffer::Write(buf) => self.staging.stage_out(buf)?,
                DataBuffer::Read(_) => self.staging.read_region(len)?,
            };
            phys = self.hal.virt_to_phys(cpu_addr);
            trace!("staging {:?} through {:#x}", dir, cpu_addr);
        }

        if !dma_addressable(phys, len) {
            error!(
                "buffer {:#x} (bus {:#x}) not addressable, staging configured: {}",
                cpu_addr,
                phys,
                self.staging.is_configured()
            );
            return Err(SdhciError::BufferNotAddressable);
        }

        if let Some(cache) = self.cache.as_ref() {
            cache.flush(phys, len);
        }

        let table = match self.dma {
            DmaProgrammer::Simple => {
                self.write(Reg::DmaCtl, dir.ctl_bits());
                self.write(Reg::SdmaAddr, phys as u32);
                self.write(Reg::SdmaLen, len as u32);
                None
            }
            DmaProgrammer::Descriptor => {
                let table = AdmaTable::build(phys, len)?;
                let table_len = size_of_val(table.descriptors());
                let table_phys = self.hal.virt_to_phys(table.addr());
                if !dma_addressable(table_phys, table_len) {
                    return Err(SdhciError::BufferNotAddressable);
                }
                if let Some(cache) = self.cache.as_ref() {
                    cache.flush(table_phys, table_len);
                }
                self.write(Reg::DmaCtl, dir.ctl_bits());
                self.write(Reg::AdmaAddr, table_phys as u32);
                Some(table)
            }
        };

        Ok(DmaSetup {
            staged,
            phys,
            len,
            _table: table,
        })
    }
}

fn check_data(data: &MmcData<'_>) -> SdhciResult {
    if data.block_size == 0
        || data.blocks == 0
        || data.block_size > W3K_CMD_BLKSZ_MASK
        || data.buffer.len() != data.trans_bytes()
    {
        return Err(SdhciError::InvalidArgument);
    }
    Ok(())
}
