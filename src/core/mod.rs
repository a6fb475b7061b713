pub mod block;

use alloc::string::String;

use kspin::SpinRaw;
use log::{debug, info};

use crate::common::config::BusWidth;
use crate::common::commands::{MmcCommand, MmcData};
use crate::host::{MmcHostOps, MmcIos, SdhciResult};

/// Shared handle to one host controller. Every request runs to completion
/// under the lock, so concurrent callers never interleave on the bus.
pub struct MmcHost<T: MmcHostOps> {
    pub name: String,
    /// Cards addressed by block number; byte-addressed (standard capacity)
    /// cards need `block * 512`.
    high_capacity: bool,
    host_ops: SpinRaw<T>,
}

impl<T: MmcHostOps> MmcHost<T> {
    pub fn new(name: String, host_ops: T) -> Self {
        MmcHost {
            name,
            high_capacity: true,
            host_ops: SpinRaw::new(host_ops),
        }
    }

    pub fn with_high_capacity(mut self, high_capacity: bool) -> Self {
        self.high_capacity = high_capacity;
        self.host_ops.lock().set_high_capacity(high_capacity);
        self
    }

    pub fn is_high_capacity(&self) -> bool {
        self.high_capacity
    }

    /// Probe the controller and put the bus in identification mode.
    pub fn init(&self, min_clock: u32) -> SdhciResult {
        info!("{}: host initialization started", self.name);
        let mut ops = self.host_ops.lock();
        ops.init_host()?;
        ops.set_ios(&MmcIos::new(min_clock, BusWidth::Bit1))?;
        debug!("{}: bus at {} Hz, 1-bit", self.name, min_clock);
        Ok(())
    }

    pub fn send_cmd(&self, cmd: &mut MmcCommand, data: Option<MmcData<'_>>) -> SdhciResult {
        self.host_ops.lock().send_cmd(cmd, data)
    }

    pub fn set_ios(&self, ios: &MmcIos) -> SdhciResult {
        self.host_ops.lock().set_ios(ios)
    }

    pub fn card_busy(&self) -> bool {
        self.host_ops.lock().card_busy()
    }

    /// Run `f` with exclusive access to the controller.
    pub fn with_host<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&mut T) -> U,
    {
        let mut ops = self.host_ops.lock();
        f(&mut *ops)
    }
}
