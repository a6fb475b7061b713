//! Bus clock, bus width and high-speed delay-line setup.

use log::{debug, info, warn};

use crate::{
    common::config::{BusWidth, HighSpeedMode, Quirks, SpecVersion},
    host::{MmcIos, SdhciError, SdhciResult},
    osa::Hal,
    regs::RegisterIo,
};

use super::{W3kSdhci, regs::*};

const V3_MAX_DIV: u32 = 2046;
const V2_MAX_DIV: u32 = 256;

/// Smallest divisor that brings `max_clock` down to at most `target`.
///
/// 3.00 controllers take any even divisor up to 2046, older ones a power
/// of two up to 256. A divisor of 1 means the bus runs at `max_clock`.
pub fn clock_divisor(max_clock: u32, target: u32, version: SpecVersion) -> u32 {
    if version >= SpecVersion::V300 {
        if max_clock <= target {
            return 1;
        }
        let mut div = 2;
        while div < V3_MAX_DIV {
            if max_clock / div <= target {
                break;
            }
            div += 2;
        }
        div
    } else {
        let mut div = 1;
        while div < V2_MAX_DIV {
            if max_clock / div <= target {
                break;
            }
            div *= 2;
        }
        div
    }
}

/// Clock-control divider bits for a full divisor from [`clock_divisor`].
pub fn divider_bits(divisor: u32) -> u32 {
    let half = divisor >> 1;
    if half == 0 {
        W3K_CLK_DIV_BYPASS
    } else {
        ((half - 1) & W3K_CLK_DIV_MASK) << W3K_CLK_DIVIDER_SHIFT
    }
}

impl<R: RegisterIo, H: Hal> W3kSdhci<R, H> {
    /// Program the divider for `clock` Hz and wait for it to settle.
    /// A request of 0 leaves the clock alone.
    pub fn set_clock(&mut self, clock: u32) -> SdhciResult {
        if clock == 0 {
            return Ok(());
        }

        let div = clock_divisor(self.config.max_clock, clock, self.config.version);
        let bits = divider_bits(div);
        debug!(
            "set_clock({}): divisor {}, field {:#x}",
            clock, div, bits
        );

        self.clk_gate(true);
        self.modify(Reg::ClockControl, W3K_CLK_DIVIDER_FIELD, bits);
        self.clk_gate(false);
        self.wait_clock_stable()?;

        self.clock = clock;
        info!(
            "W3K SDHCI clock {} Hz (actual {} Hz)",
            clock,
            self.config.max_clock / div
        );
        Ok(())
    }

    fn clk_gate(&self, gate: bool) {
        if gate {
            self.modify(Reg::GlobalControl, 0, W3K_GC_CLK_GATE);
        } else {
            self.modify(Reg::GlobalControl, W3K_GC_CLK_GATE, 0);
        }
    }

    pub fn set_ios(&mut self, ios: &MmcIos) -> SdhciResult {
        if ios.clock != self.clock {
            self.set_clock(ios.clock)?;
        }

        self.set_bus_width(ios.bus_width);

        if ios.clock >= W3K_HS_CLOCK_THRESHOLD {
            self.set_high_speed_timing()?;
        }
        Ok(())
    }

    fn set_bus_width(&mut self, mut width: BusWidth) {
        // Never wider than the board wires.
        if width as u8 > self.config.bus_width as u8 {
            warn!(
                "{:?} bus requested, board wires {:?}",
                width, self.config.bus_width
            );
            width = self.config.bus_width;
        }
        let wide8 = self.config.version >= SpecVersion::V300
            || self.config.quirks.contains(Quirks::USE_WIDE8);

        let bits = match width {
            BusWidth::Bit8 if wide8 => W3K_CTRL_8BITBUS,
            BusWidth::Bit8 => {
                warn!("8-bit bus not supported by this controller, using 1-bit");
                0
            }
            BusWidth::Bit4 => W3K_CTRL_4BITBUS,
            BusWidth::Bit1 => 0,
        };
        self.modify(Reg::HostControl, W3K_CTRL_BITBUS_MASK, bits);

        self.bus_width = match bits {
            W3K_CTRL_8BITBUS => BusWidth::Bit8,
            W3K_CTRL_4BITBUS => BusWidth::Bit4,
            _ => BusWidth::Bit1,
        };
        debug!("bus width {:?}", self.bus_width);
    }

    fn set_high_speed_timing(&mut self) -> SdhciResult {
        let mode = self.config.high_speed;
        let (odl, lat) = match mode {
            HighSpeedMode::Hs400 => (W3K_ODL_HS400, W3K_LAT_HS400),
            HighSpeedMode::Hs200 => (W3K_ODL_HS200, W3K_LAT_HS200),
        };

        self.modify(Reg::OutputDelay, W3K_ODL_MASK, odl);

        self.modify(
            Reg::InputDelay,
            W3K_KDL_MODE_MASK,
            W3K_KDL_MODE | W3K_KDL_LOAD,
        );
        if !self.wait_bits_clear(
            Reg::InputDelay,
            W3K_KDL_LOAD,
            self.config.poll.self_clear_retries,
        ) {
            warn!("input delay line never loaded");
            return Err(SdhciError::ClockNotStable);
        }

        self.modify(Reg::Pch1, W3K_PCH1_MASK, W3K_PCH1_NERC_NECS);
        self.modify(Reg::Latency, W3K_LAT_MASK, lat);

        if mode == HighSpeedMode::Hs400 {
            self.dll_lock()?;
        }
        debug!("{:?} timing applied", mode);
        Ok(())
    }

    fn dll_restart(&self) {
        self.modify(Reg::Dll, W3K_DLL_ENABLE, 0);
        self.hal.delay_us(1000);
        self.modify(Reg::Dll, 0, W3K_DLL_ENABLE);
    }

    /// Enable the DLL and wait for lock, resetting it whenever one attempt
    /// runs out of polls.
    fn dll_lock(&self) -> SdhciResult {
        let poll = self.config.poll;
        let mut resets = 0;
        let mut count = 0;

        self.dll_restart();
        while self.read(Reg::Dll) & W3K_DLL_LOCKED == 0 {
            count += 1;
            if count <= poll.dll_lock_retries {
                continue;
            }
            count = 0;
            if poll.dll_reset_limit.is_some_and(|limit| resets >= limit) {
                warn!("DLL never locked after {} resets", resets);
                return Err(SdhciError::DllLockFailure);
            }
            resets += 1;
            warn!("DLL lock timeout, reset {}", resets);
            self.dll_restart();
        }

        debug!("DLL locked after {} resets", resets);
        Ok(())
    }
}
