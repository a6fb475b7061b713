//! Platform services the driver borrows from its environment: delays,
//! address translation and aligned DMA memory.

pub mod pool_buffer;

use core::hint::spin_loop;

pub use pool_buffer::PoolBuffer;

/// Hooks supplied by the platform the controller lives on.
pub trait Hal: Send + Sync {
    /// Busy-wait for at least `us` microseconds.
    fn delay_us(&self, us: u32);

    /// Bus address the DMA engine must be given for CPU address `vaddr`.
    fn virt_to_phys(&self, vaddr: usize) -> usize {
        vaddr
    }
}

/// Calibrated spin delay for environments without a timer.
///
/// `loops_per_us` is the number of `spin_loop` iterations that take one
/// microsecond on the target; it makes every iteration-counted budget in
/// [`PollBudget`](crate::PollBudget) map to wall-clock time explicitly.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    loops_per_us: u32,
}

impl SpinDelay {
    pub const fn new(loops_per_us: u32) -> Self {
        Self { loops_per_us }
    }

    pub fn loops_per_us(&self) -> u32 {
        self.loops_per_us
    }
}

impl Hal for SpinDelay {
    fn delay_us(&self, us: u32) {
        let loops = us as u64 * self.loops_per_us as u64;
        for _ in 0..loops {
            spin_loop();
        }
    }
}

/// Spin `count` iterations without a time reference; used where the
/// controller only needs a short settle between two writes.
#[inline]
pub fn spin_wait(count: u32) {
    for _ in 0..count {
        spin_loop();
    }
}
