//! Driver for the W3K SDHCI controller.

mod chunk;
pub mod clock;
pub mod cmd;
pub mod dma;
pub mod regs;
mod reset;

use alloc::boxed::Box;
use core::fmt::Display;

use log::{debug, info};

use crate::{
    cache::CacheMaintenance,
    common::{
        commands::{MmcCommand, MmcData},
        config::{BusWidth, DmaMode, HostConfig, Quirks},
    },
    host::{MmcHostOps, MmcIos, SdhciError, SdhciResult},
    osa::Hal,
    regs::RegisterIo,
};

use dma::{DmaProgrammer, Staging};
use regs::*;

pub struct W3kSdhci<R: RegisterIo, H: Hal> {
    regs: R,
    hal: H,
    config: HostConfig,
    /// Last bus clock programmed, 0 until the first `set_clock`.
    clock: u32,
    bus_width: BusWidth,
    dma: DmaProgrammer,
    staging: Staging,
    cache: Option<Box<dyn CacheMaintenance>>,
    rca: u16,
    /// Card takes block numbers as data addresses; byte offsets otherwise.
    high_capacity: bool,
}

impl<R: RegisterIo, H: Hal> Display for W3kSdhci<R, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "W3kSdhci(base_addr: {:#x}, max_clock: {}, clock: {}, bus_width: {:?}, quirks: {:?}, dma: {:?})",
            self.config.base_addr,
            self.config.max_clock,
            self.clock,
            self.bus_width,
            self.config.quirks,
            self.dma,
        )
    }
}

impl<R: RegisterIo, H: Hal> W3kSdhci<R, H> {
    /// Validate `config` and build the host without touching the hardware.
    pub fn new(regs: R, hal: H, config: HostConfig) -> SdhciResult<Self> {
        if config.base_addr == 0 || config.max_clock == 0 {
            info!("W3K SDHCI: missing base address or max clock");
            return Err(SdhciError::InvalidConfiguration);
        }
        if config.min_clock > config.max_clock || config.chunk_budget == 0 {
            return Err(SdhciError::InvalidConfiguration);
        }

        // A merged final chunk may span two budgets.
        let largest_transfer = (config.chunk_budget as usize).saturating_mul(2);
        if config.dma_mode == DmaMode::Simple
            && largest_transfer > W3K_SDMA_LEN_MASK as usize
        {
            info!(
                "W3K SDHCI: chunk budget {:#x} exceeds the SDMA length field",
                config.chunk_budget
            );
            return Err(SdhciError::InvalidConfiguration);
        }

        let staging = config.effective_staging();
        if let Some(staging) = staging {
            if staging.size < largest_transfer {
                info!(
                    "W3K SDHCI: staging size {:#x} below twice the chunk budget {:#x}",
                    staging.size, config.chunk_budget
                );
                return Err(SdhciError::InvalidConfiguration);
            }
        }

        Ok(Self {
            regs,
            hal,
            dma: DmaProgrammer::from_mode(config.dma_mode),
            staging: Staging::new(staging),
            clock: 0,
            bus_width: BusWidth::Bit1,
            cache: None,
            rca: 1,
            high_capacity: true,
            config,
        })
    }

    /// Build the host and bring the controller to a commandable state.
    pub fn probe(regs: R, hal: H, config: HostConfig) -> SdhciResult<Self> {
        let mut host = Self::new(regs, hal, config)?;
        host.init_host()?;
        Ok(host)
    }

    pub fn with_cache(mut self, cache: Box<dyn CacheMaintenance>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn init_host(&mut self) -> SdhciResult {
        info!("Init W3K SDHCI controller at {:#x}", self.config.base_addr);

        self.hw_reset();
        self.host_init()?;

        if self.config.quirks.contains(Quirks::DMA_32BIT_ADDR) {
            self.staging.ensure()?;
        }

        self.set_fck_divider(2)?;

        info!("W3K SDHCI ready: {}", self);
        Ok(())
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn clock(&self) -> u32 {
        self.clock
    }

    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    /// Relative card address used for the status poll between write chunks.
    pub fn set_rca(&mut self, rca: u16) {
        self.rca = rca;
    }

    pub fn rca(&self) -> u16 {
        self.rca
    }

    /// Addressing mode of the attached card, used to advance the argument
    /// of each chunk.
    pub fn set_high_capacity(&mut self, high_capacity: bool) {
        self.high_capacity = high_capacity;
    }

    pub fn is_high_capacity(&self) -> bool {
        self.high_capacity
    }

    pub fn card_busy(&self) -> bool {
        self.read(Reg::PresentState) & W3K_PRESENT_BUSY != 0
    }

    #[inline]
    pub(crate) fn read(&self, reg: Reg) -> u32 {
        self.regs.read_reg32(reg.offset())
    }

    #[inline]
    pub(crate) fn write(&self, reg: Reg, value: u32) {
        self.regs.write_reg32(reg.offset(), value);
    }

    #[inline]
    pub(crate) fn modify(&self, reg: Reg, clear: u32, set: u32) -> u32 {
        self.regs.modify_reg32(reg.offset(), clear, set)
    }

    /// Acknowledge pending interrupt status, returning what was pending.
    pub(crate) fn clear_int_status(&self) -> IntStatus {
        let stat = self.read(Reg::IntStatus);
        self.write(Reg::IntStatus, stat);
        debug!("write IntStatus: {:#x}", stat);
        IntStatus::from_bits_retain(stat)
    }

    /// Acknowledge pending DMA status, returning what was pending.
    pub(crate) fn clear_dma_status(&self) -> DmaStatus {
        let stat = self.read(Reg::DmaStatus) & DmaStatus::EVENT_MASK;
        self.write(Reg::DmaStatus, stat);
        DmaStatus::from_bits_retain(stat)
    }

    /// Poll until every bit of `mask` in `reg` reads back clear.
    pub(crate) fn wait_bits_clear(&self, reg: Reg, mask: u32, retries: u32) -> bool {
        for _ in 0..retries {
            if self.read(reg) & mask == 0 {
                return true;
            }
            core::hint::spin_loop();
        }
        self.read(reg) & mask == 0
    }
}

impl<R: RegisterIo, H: Hal> MmcHostOps for W3kSdhci<R, H> {
    fn init_host(&mut self) -> SdhciResult {
        self.init_host()
    }

    fn send_cmd(&mut self, cmd: &mut MmcCommand, data: Option<MmcData<'_>>) -> SdhciResult {
        self.send_cmd(cmd, data)
    }

    fn set_ios(&mut self, ios: &MmcIos) -> SdhciResult {
        self.set_ios(ios)
    }

    fn card_busy(&self) -> bool {
        self.card_busy()
    }

    fn max_block_count(&self) -> u32 {
        self.config.max_block_count
    }

    fn set_high_capacity(&mut self, high_capacity: bool) {
        self.set_high_capacity(high_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::StagingConfig;
    use crate::mock::MockController;

    #[test]
    fn new_rejects_missing_base_or_clock() {
        let mock = MockController::new();
        let err = W3kSdhci::new(mock.clone(), mock.clone(), HostConfig::new(0, 50_000_000))
            .err()
            .unwrap();
        assert_eq!(err, SdhciError::InvalidConfiguration);

        let err = W3kSdhci::new(mock.clone(), mock.clone(), HostConfig::new(0x1000, 0))
            .err()
            .unwrap();
        assert_eq!(err, SdhciError::InvalidConfiguration);
    }

    #[test]
    fn new_rejects_staging_smaller_than_two_chunks() {
        let mock = MockController::new();
        let config = HostConfig::new(0x1000, 50_000_000).with_staging(StagingConfig::heap(48 * 1024));
        let err = W3kSdhci::new(mock.clone(), mock, config).err().unwrap();
        assert_eq!(err, SdhciError::InvalidConfiguration);
    }

    #[test]
    fn new_rejects_budget_beyond_sdma_length() {
        let mock = MockController::new();
        let config = HostConfig::new(0x1000, 50_000_000).with_chunk_budget(0x8_0000);
        let err = W3kSdhci::new(mock.clone(), mock.clone(), config.clone())
            .err()
            .unwrap();
        assert_eq!(err, SdhciError::InvalidConfiguration);

        // Descriptor DMA has no single length field.
        let config = config.with_dma_mode(DmaMode::Descriptor);
        assert!(W3kSdhci::new(mock.clone(), mock, config).is_ok());
    }

    #[test]
    fn probe_programs_functional_divider_last() {
        let mock = MockController::new();
        let host = W3kSdhci::probe(mock.clone(), mock.clone(), HostConfig::new(0x1000, 50_000_000))
            .unwrap();
        // factor 2 -> divider field 0, no bypass
        let clk = mock.reg(Reg::ClockControl);
        assert_eq!(clk & W3K_CLK_DIVIDER_FIELD, 0);
        assert_eq!(host.clock(), 0);
        assert!(!host.card_busy());
    }

    #[test]
    fn probe_allocates_staging_for_32bit_dma() {
        let mock = MockController::new();
        let config = HostConfig::new(0x1000, 50_000_000).with_quirks(Quirks::DMA_32BIT_ADDR);
        let host = W3kSdhci::probe(mock.clone(), mock, config).unwrap();
        assert!(host.staging.is_allocated());
    }
}
