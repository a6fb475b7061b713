//! Composable L2 cache controller sitting between the CPU and the DMA
//! engine. Lines covering a DMA buffer are flushed before the transfer.

use core::sync::atomic::{Ordering, fence};

use log::{debug, trace};

use crate::regs::RegisterIo;

const CCACHE_CONFIG: u32 = 0x000;
const CCACHE_WAY_ENABLE: u32 = 0x008;
const CCACHE_FLUSH64: u32 = 0x200;

const CCACHE_CONFIG_WAYS_SHIFT: u32 = 8;
const CCACHE_CONFIG_WAYS_MASK: u32 = 0xFF;

pub const CCACHE_LINE_SIZE: usize = 64;

/// Cache maintenance the host performs around DMA.
pub trait CacheMaintenance: Send + Sync {
    /// Write back and invalidate every line overlapping `[addr, addr + len)`.
    /// `addr` is the bus address the DMA engine uses.
    fn flush(&self, addr: usize, len: usize);
}

pub struct ComposableCache<R: RegisterIo> {
    regs: R,
}

impl<R: RegisterIo> ComposableCache<R> {
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Number of ways the cache was built with.
    pub fn ways(&self) -> u32 {
        (self.regs.read_reg32(CCACHE_CONFIG) >> CCACHE_CONFIG_WAYS_SHIFT)
            & CCACHE_CONFIG_WAYS_MASK
    }

    /// Enable every way; returns the index of the highest enabled way.
    pub fn enable(&self) -> u32 {
        let ways = self.ways();
        let last = ways.saturating_sub(1);
        self.regs.write_reg32(CCACHE_WAY_ENABLE, last);
        debug!("composable cache: {} ways enabled", ways);
        last
    }
}

impl<R: RegisterIo> CacheMaintenance for ComposableCache<R> {
    fn flush(&self, addr: usize, len: usize) {
        let start = addr & !(CCACHE_LINE_SIZE - 1);
        let end = addr.saturating_add(len.max(1));
        trace!("flush cache lines {:#x}..{:#x}", start, end);

        fence(Ordering::SeqCst);
        for line in (start..end).step_by(CCACHE_LINE_SIZE) {
            self.regs.write_reg64(CCACHE_FLUSH64, line as u64);
            fence(Ordering::SeqCst);
        }
    }
}
