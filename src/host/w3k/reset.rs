use log::{debug, info, warn};

use crate::{
    host::{SdhciError, SdhciResult},
    osa::{Hal, spin_wait},
    regs::RegisterIo,
};

use super::{W3kSdhci, regs::*};

/// Functional clock divider programmed by `host_init`, before the final
/// divider is set at the end of probe.
const INIT_FCK_DIVIDER: u16 = 30;
const INIT_CD_DEBOUNCE: u32 = 3;
const INIT_DATA_TIMEOUT: u32 = 1;
const CHIP_RESET_SETTLE: u32 = 10_000;

/// Clock-control bits for functional clock divider `factor`. Factors
/// below 2 bypass the divider.
pub(crate) fn fck_divider_bits(factor: u16) -> u32 {
    if factor < 2 {
        W3K_CLK_DIV_BYPASS
    } else {
        ((factor as u32 & W3K_CLK_DIV_MASK) / 2 - 1) << W3K_CLK_DIVIDER_SHIFT
    }
}

impl<R: RegisterIo, H: Hal> W3kSdhci<R, H> {
    /// Full hardware reset: gate-cycle the clock, power-cycle the chip,
    /// reset the clock source, then flush DMA.
    pub fn hw_reset(&mut self) {
        debug!("W3K SDHCI hardware reset");
        self.clk_ctrl(false);
        self.clk_ctrl(true);
        self.chip_reset();
        self.ck_reset();
        self.dma_flush();
        self.clock = 0;
    }

    fn clk_ctrl(&self, enable: bool) {
        if enable {
            self.modify(Reg::GlobalControl, W3K_GC_CLK_GATE, 0);
        } else {
            self.modify(Reg::GlobalControl, 0, W3K_GC_CLK_GATE);
        }
    }

    fn chip_reset(&self) {
        self.write(Reg::Vddp, 0);
        spin_wait(CHIP_RESET_SETTLE);
        self.write(Reg::Vddp, W3K_VDDP_ON);
    }

    fn ck_reset(&self) {
        self.write(Reg::ClockControl, 0);
        self.write(Reg::ClockControl, W3K_CLK_SRC_RESET);
    }

    /// Controller defaults: clocks, pins, data timeout, mode select.
    pub fn host_init(&mut self) -> SdhciResult {
        let clk = W3K_CLK_AUTO_GATE
            | W3K_CLK_FCK_ENABLE
            | fck_divider_bits(INIT_FCK_DIVIDER)
            | W3K_CLK_DSP;
        self.write(Reg::ClockControl, clk);
        self.wait_clock_stable()?;

        self.write(
            Reg::Pin,
            W3K_PIN_INIT | W3K_PIN_CD_ENABLE | (INIT_CD_DEBOUNCE << W3K_PIN_CD_DEBOUNCE_SHIFT),
        );

        self.modify(
            Reg::HostControl,
            W3K_CTRL_DATA_TIMEOUT_MASK,
            INIT_DATA_TIMEOUT << W3K_CTRL_DATA_TIMEOUT_SHIFT,
        );

        self.clear_int_status();
        self.clear_dma_status();

        self.modify(
            Reg::HostControl,
            W3K_CTRL_MODE_SELECT_MASK,
            W3K_CTRL_MODE_SELECT_MASK,
        );

        info!("W3K SDHCI host init done, clock control {:#x}", clk);
        Ok(())
    }

    /// Set `mask` in the reset bits and wait for them to self-clear. The
    /// reset bits share a register with clock control, which is preserved.
    pub fn software_reset(&self, mask: u32) -> SdhciResult {
        self.modify(Reg::SOFTWARE_RESET, 0, mask);

        let retries = self.config.poll.reset_retries;
        for _ in 0..retries {
            if self.read(Reg::SOFTWARE_RESET) & mask == 0 {
                return Ok(());
            }
            self.hal.delay_us(1000);
        }
        if self.read(Reg::SOFTWARE_RESET) & mask == 0 {
            return Ok(());
        }
        warn!("software reset {:#x} never completed", mask);
        Err(SdhciError::CommandTimeout)
    }

    /// Flush the DMA engine; the flush bit self-clears.
    pub(crate) fn dma_flush(&self) {
        self.modify(Reg::DmaStatus, W3K_DMA_FLUSH, W3K_DMA_FLUSH);
        if !self.wait_bits_clear(
            Reg::DmaStatus,
            W3K_DMA_FLUSH,
            self.config.poll.self_clear_retries,
        ) {
            warn!("DMA flush bit stuck");
        }
    }

    /// Stop the DMA engine after a data error.
    pub(crate) fn disable_dma(&self) {
        self.write(Reg::DmaCtl, W3K_DMA_DISABLE);
        if !self.wait_bits_clear(
            Reg::DmaCtl,
            W3K_DMA_DISABLE,
            self.config.poll.self_clear_retries,
        ) {
            warn!("DMA disable bit stuck");
        }
    }

    /// Program the functional clock divider used once probe completes.
    pub fn set_fck_divider(&mut self, factor: u16) -> SdhciResult {
        self.modify(
            Reg::ClockControl,
            W3K_CLK_DIVIDER_FIELD,
            fck_divider_bits(factor),
        );
        self.wait_clock_stable()
    }

    pub(crate) fn wait_clock_stable(&self) -> SdhciResult {
        if self.wait_bits_clear(
            Reg::ClockControl,
            W3K_CLK_BUSY,
            self.config.poll.clock_retries,
        ) {
            Ok(())
        } else {
            warn!("clock never stabilised");
            Err(SdhciError::ClockNotStable)
        }
    }
}
