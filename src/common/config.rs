use bitflags::bitflags;

pub const W3K_MMC_MIN_CLK: u32 = 400_000;

/// Largest byte span one primitive transfer moves before the dispatcher
/// splits a request.
pub const W3K_ONCE_TRAN_BYTES_LEN: u32 = 32 * 1024;
/// Block count the storage stack may put in a single request.
pub const W3K_MAX_BLOCK_COUNT: u32 = 512;

const DEFAULT_STAGING_SIZE: usize = 512 * 1024;

bitflags! {
    /// Controller errata workarounds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Quirks: u32 {
        /// DMA can only reach 32-bit addresses; staging is set up at probe.
        const DMA_32BIT_ADDR = 1 << 0;
        /// R1b commands may never report command-done; a timeout is a normal finish.
        const BROKEN_R1B = 1 << 2;
        /// Settle 1 ms after every command.
        const WAIT_SEND_CMD = 1 << 6;
        /// 8-bit bus allowed even on pre-3.00 controllers.
        const USE_WIDE8 = 1 << 8;
    }
}

/// SD host controller version; selects the divider scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpecVersion {
    V200,
    V300,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    Bit1 = 1,
    Bit4 = 4,
    Bit8 = 8,
}

/// Delay-line preset used once the bus runs at or above 100 MHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighSpeedMode {
    Hs200,
    Hs400,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaMode {
    /// One start address and length per transfer.
    Simple,
    /// Linked descriptor table.
    Descriptor,
}

/// Where the staging regions live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingLocation {
    /// On-chip SRAM windows at fixed CPU addresses.
    Sram { read_base: usize, write_base: usize },
    /// Aligned heap allocation made on first use.
    Heap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingConfig {
    pub location: StagingLocation,
    /// Capacity of each region in bytes.
    pub size: usize,
    /// Stage every transfer, not only those the DMA engine cannot address.
    pub always: bool,
}

impl StagingConfig {
    pub const fn sram(read_base: usize, write_base: usize, size: usize) -> Self {
        Self {
            location: StagingLocation::Sram {
                read_base,
                write_base,
            },
            size,
            always: true,
        }
    }

    pub const fn heap(size: usize) -> Self {
        Self {
            location: StagingLocation::Heap,
            size,
            always: false,
        }
    }

    pub const fn always(mut self, always: bool) -> Self {
        self.always = always;
        self
    }
}

/// Iteration budgets for every busy-poll in the driver, and the delay spent
/// per iteration. Worst-case wait = retries * poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Polls of present-state before a command is issued.
    pub busy_retries: u32,
    pub busy_poll_us: u32,
    /// Polls of interrupt status for command completion.
    pub command_retries: u32,
    pub command_poll_us: u32,
    /// Polls for DMA-done plus data-done.
    pub data_retries: u32,
    pub data_poll_us: u32,
    /// Polls of clock-busy after the divider changes.
    pub clock_retries: u32,
    /// Polls of the DLL lock bits per enable attempt.
    pub dll_lock_retries: u32,
    /// DLL resets tolerated before giving up; `None` waits forever.
    pub dll_reset_limit: Option<u32>,
    /// Polls (1 ms apart) of the software-reset bits.
    pub reset_retries: u32,
    /// Polls of self-clearing control bits (DMA flush/disable, delay load).
    pub self_clear_retries: u32,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            busy_retries: 1_000_000,
            busy_poll_us: 1,
            command_retries: 10_000,
            command_poll_us: 0,
            data_retries: 1_000_000,
            data_poll_us: 10,
            clock_retries: 1_000_000,
            dll_lock_retries: 10_000,
            dll_reset_limit: Some(8),
            reset_retries: 100,
            self_clear_retries: 1_000_000,
        }
    }
}

/// Controller description handed over by device discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub base_addr: usize,
    pub max_clock: u32,
    pub min_clock: u32,
    pub bus_width: BusWidth,
    pub quirks: Quirks,
    pub version: SpecVersion,
    pub dma_mode: DmaMode,
    pub high_speed: HighSpeedMode,
    pub staging: Option<StagingConfig>,
    pub chunk_budget: u32,
    pub max_block_count: u32,
    pub poll: PollBudget,
}

impl HostConfig {
    pub fn new(base_addr: usize, max_clock: u32) -> Self {
        Self {
            base_addr,
            max_clock,
            min_clock: W3K_MMC_MIN_CLK,
            bus_width: BusWidth::Bit8,
            quirks: Quirks::empty(),
            version: SpecVersion::V300,
            dma_mode: DmaMode::Simple,
            high_speed: HighSpeedMode::Hs400,
            staging: None,
            chunk_budget: W3K_ONCE_TRAN_BYTES_LEN,
            max_block_count: W3K_MAX_BLOCK_COUNT,
            poll: PollBudget::default(),
        }
    }

    /// Configuration of the W3K board: SDMA through the on-chip SRAM windows.
    pub fn w3k(base_addr: usize, max_clock: u32) -> Self {
        Self::new(base_addr, max_clock).with_staging(StagingConfig::sram(
            0x4005_0000,
            0x4002_0000,
            0x3_0000,
        ))
    }

    pub fn with_min_clock(mut self, min_clock: u32) -> Self {
        self.min_clock = min_clock;
        self
    }

    pub fn with_bus_width(mut self, bus_width: BusWidth) -> Self {
        self.bus_width = bus_width;
        self
    }

    pub fn with_quirks(mut self, quirks: Quirks) -> Self {
        self.quirks = quirks;
        self
    }

    pub fn with_version(mut self, version: SpecVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_dma_mode(mut self, dma_mode: DmaMode) -> Self {
        self.dma_mode = dma_mode;
        self
    }

    pub fn with_high_speed(mut self, high_speed: HighSpeedMode) -> Self {
        self.high_speed = high_speed;
        self
    }

    pub fn with_staging(mut self, staging: StagingConfig) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn with_chunk_budget(mut self, chunk_budget: u32) -> Self {
        self.chunk_budget = chunk_budget;
        self
    }

    pub fn with_poll_budget(mut self, poll: PollBudget) -> Self {
        self.poll = poll;
        self
    }

    /// Staging configuration in effect. Controllers limited to 32-bit DMA
    /// get a heap staging area when none was configured.
    pub fn effective_staging(&self) -> Option<StagingConfig> {
        match self.staging {
            Some(staging) => Some(staging),
            None if self.quirks.contains(Quirks::DMA_32BIT_ADDR) => {
                Some(StagingConfig::heap(DEFAULT_STAGING_SIZE))
            }
            None => None,
        }
    }
}
