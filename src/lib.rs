//! Host-controller driver for the W3K SDHCI block found on W3K SoCs.
//!
//! The driver exposes the primitive every SD/MMC stack needs, "send this
//! command with this optional data phase", and handles the controller's
//! DMA limits underneath: large transfers are split into chunks, and
//! buffers the engine cannot reach are staged through bounce regions.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cache;
pub mod common;
pub mod core;
pub mod host;
pub mod osa;
pub mod regs;

#[cfg(test)]
mod mock;

pub use cache::{CacheMaintenance, ComposableCache};
pub use common::commands::{DataBuffer, MmcCommand, MmcData, ResponseType};
pub use common::config::{
    BusWidth, DmaMode, HighSpeedMode, HostConfig, PollBudget, Quirks, SpecVersion, StagingConfig,
    StagingLocation,
};
pub use crate::core::MmcHost;
pub use host::w3k::W3kSdhci;
pub use host::{MmcHostOps, MmcIos, SdhciError, SdhciResult};
pub use osa::{Hal, SpinDelay};
pub use regs::{MmioRegs, RegisterIo};
