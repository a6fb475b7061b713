//! W3K SDHCI register map and bit fields.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Reg {
    /// Clock control; also carries the software-reset bits.
    ClockControl = 0x000,
    Latency = 0x004,
    Pin = 0x008,
    IntStatus = 0x00C,
    /// Host control: bus width, data timeout, mode select.
    HostControl = 0x014,
    Command = 0x018,
    Argument = 0x01C,
    PresentState = 0x020,
    Response0 = 0x024,
    Response1 = 0x028,
    Response2 = 0x02C,
    Response3 = 0x030,
    BlockCount = 0x034,
    Pch1 = 0x05C,
    InputDelay = 0x074,
    Dll = 0x088,
    OutputDelay = 0x08C,
    Vddp = 0x0A0,
    SdmaAddr = 0x100,
    SdmaLen = 0x104,
    DmaCtl = 0x108,
    AdmaAddr = 0x10C,
    /// DMA status (write-1-to-clear) and the DMA flush control bit.
    DmaStatus = 0x110,
    GlobalControl = 0xFFC,
}

impl Reg {
    pub const SOFTWARE_RESET: Reg = Reg::ClockControl;

    pub const fn offset(self) -> u32 {
        self as u32
    }

    /// Response word `index` (0..=3).
    pub const fn response(index: usize) -> Reg {
        match index {
            0 => Reg::Response0,
            1 => Reg::Response1,
            2 => Reg::Response2,
            _ => Reg::Response3,
        }
    }
}

pub const W3K_SDHCI_RESET_ALL: u32 = 0x04;

// Clock control
pub const W3K_CLK_AUTO_GATE: u32 = 1 << 1;
pub const W3K_CLK_SRC_RESET: u32 = (1 << 2) | (1 << 3);
pub const W3K_CLK_FCK_ENABLE: u32 = 1 << 3;
pub const W3K_CLK_BUSY: u32 = 1 << 7;
pub const W3K_CLK_DIVIDER_SHIFT: u32 = 8;
pub const W3K_CLK_DIV_MASK: u32 = 0x1FFF;
pub const W3K_CLK_DIVIDER_FIELD: u32 = 0x003F_FF00;
pub const W3K_CLK_DIV_BYPASS: u32 = 1 << 21;
pub const W3K_CLK_DSP: u32 = 1 << 23;

pub const W3K_GC_CLK_GATE: u32 = 1 << 1;
pub const W3K_VDDP_ON: u32 = 1 << 1;

// Pin control
pub const W3K_PIN_CD_ENABLE: u32 = 1 << 0;
pub const W3K_PIN_INIT: u32 = (3 << 1) | (3 << 28);
pub const W3K_PIN_CD_DEBOUNCE_SHIFT: u32 = 8;

// Host control
pub const W3K_CTRL_4BITBUS: u32 = 0x0000_0002;
pub const W3K_CTRL_8BITBUS: u32 = 0x0000_0020;
pub const W3K_CTRL_BITBUS_MASK: u32 = 0x0003_0000 | W3K_CTRL_4BITBUS | W3K_CTRL_8BITBUS;
pub const W3K_CTRL_DATA_TIMEOUT_SHIFT: u32 = 24;
pub const W3K_CTRL_DATA_TIMEOUT_MASK: u32 = 0xFF << W3K_CTRL_DATA_TIMEOUT_SHIFT;
pub const W3K_CTRL_MODE_SELECT_SHIFT: u32 = 19;
pub const W3K_CTRL_MODE_SELECT_MASK: u32 = 0xF << W3K_CTRL_MODE_SELECT_SHIFT;

// Command word
pub const W3K_CMD_INDEX_MASK: u32 = 0x3F;
pub const W3K_CMD_RESP_SHIFT: u32 = 7;
pub const W3K_CMD_RESP_MASK: u32 = 0x7;
pub const W3K_CMD_BLKSZ_SHIFT: u32 = 16;
pub const W3K_CMD_BLKSZ_MASK: u32 = 0xFFF;

pub const W3K_SDMA_LEN_MASK: u32 = 0xF_FFFF;
pub const W3K_DMA_CTL_READ: u32 = 0x8000_0000;
pub const W3K_DMA_CTL_WRITE: u32 = 0x0000_0000;
pub const W3K_DMA_DISABLE: u32 = 1 << 17;
pub const W3K_DMA_FLUSH: u32 = 1 << 17;

pub const W3K_PRESENT_BUSY: u32 = 0x3;

// High-speed timing
pub const W3K_ODL_MASK: u32 = 0xFFFF;
pub const W3K_ODL_HS400: u32 = 0x1010;
pub const W3K_ODL_HS200: u32 = 0x1C1C;
pub const W3K_KDL_MODE_MASK: u32 = 0xF;
pub const W3K_KDL_MODE: u32 = 0x2;
pub const W3K_KDL_LOAD: u32 = 3 << 7;
pub const W3K_PCH1_MASK: u32 = 0xFF;
pub const W3K_PCH1_NERC_NECS: u32 = 0x55;
pub const W3K_LAT_MASK: u32 = 0x7F;
pub const W3K_LAT_HS400: u32 = 0x50;
pub const W3K_LAT_HS200: u32 = 0x00;
pub const W3K_DLL_ENABLE: u32 = 1 << 0;
pub const W3K_DLL_LOCKED: u32 = 0x6;

pub const W3K_HS_CLOCK_THRESHOLD: u32 = 100_000_000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntStatus: u32 {
        const CMD_DONE = 0x0000_0100;
        const CMD_TIMEOUT = 0x0000_0200;
        const CMD_CRC = 0x0000_0400;
        const DATA_DONE = 0x0000_1000;
        const DATA_TIMEOUT = 0x0000_4000;
        const DATA_CRC = 0x0000_8000;

        const _ = !0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaStatus: u32 {
        const TRANSFER_DONE = 1 << 1;
        const ERROR = 1 << 2;
        const CHAIN_DONE = 1 << 3;

        const _ = !0;
    }
}

impl DmaStatus {
    pub const EVENT_MASK: u32 = 0xF;

    pub fn is_done(self) -> bool {
        self.intersects(DmaStatus::TRANSFER_DONE | DmaStatus::CHAIN_DONE)
    }
}

bitflags! {
    /// Data-phase flags of the command word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u32 {
        const SINGLE_BLOCK = 0x0000_0800;
        const MULTI_BLOCK = 0x0000_1000;
        const WRITE = 0x0000_2000;
        const CRC_CHECK = 0x4000_0000;
    }
}

// ADMA descriptor attributes
pub const ADMA_DESC_ATTR_VALID: u8 = 1 << 0;
pub const ADMA_DESC_ATTR_END: u8 = 1 << 1;
pub const ADMA_DESC_TRANSFER_DATA: u8 = 1 << 5;
pub const ADMA_MAX_LEN: usize = 65532;
pub const ADMA_TABLE_ALIGN: usize = 64;
