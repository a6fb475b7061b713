pub mod w3k;

use core::fmt::Display;

use crate::common::commands::{MmcCommand, MmcData};
use crate::common::config::BusWidth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdhciError {
    /// No command-done, timeout or CRC signal within the retry budget, or
    /// the controller reported a command timeout.
    CommandTimeout,
    CommandCrcError,
    /// DMA-done and data-done not both seen within the retry budget, or the
    /// controller reported a data timeout.
    DataTimeout,
    DataCrcError,
    AllocationFailure,
    InvalidConfiguration,
    DllLockFailure,
    ClockNotStable,
    InvalidArgument,
    BufferNotAddressable,
}

impl Display for SdhciError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SdhciError::CommandTimeout => write!(f, "Command timed out"),
            SdhciError::CommandCrcError => write!(f, "Command response CRC error"),
            SdhciError::DataTimeout => write!(f, "Data transfer timed out"),
            SdhciError::DataCrcError => write!(f, "Data CRC error"),
            SdhciError::AllocationFailure => write!(f, "DMA buffer allocation failed"),
            SdhciError::InvalidConfiguration => write!(f, "Invalid host configuration"),
            SdhciError::DllLockFailure => write!(f, "Delay line never locked"),
            SdhciError::ClockNotStable => write!(f, "Clock never stabilised"),
            SdhciError::InvalidArgument => write!(f, "Invalid argument"),
            SdhciError::BufferNotAddressable => write!(f, "Buffer not reachable by DMA"),
        }
    }
}

impl core::error::Error for SdhciError {}

pub type SdhciResult<T = ()> = Result<T, SdhciError>;

/// Bus parameters requested by the storage stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmcIos {
    pub clock: u32,
    pub bus_width: BusWidth,
}

impl MmcIos {
    pub fn new(clock: u32, bus_width: BusWidth) -> Self {
        Self { clock, bus_width }
    }
}

/// Operations a storage stack needs from a host controller driver.
pub trait MmcHostOps: Send {
    fn init_host(&mut self) -> SdhciResult;

    fn send_cmd(&mut self, cmd: &mut MmcCommand, data: Option<MmcData<'_>>) -> SdhciResult;

    fn set_ios(&mut self, ios: &MmcIos) -> SdhciResult;

    fn card_busy(&self) -> bool;

    fn max_block_count(&self) -> u32;

    /// Tell the host whether the card is block addressed (`true`) or byte
    /// addressed.
    fn set_high_capacity(&mut self, high_capacity: bool);
}
