//! DMA programming for the W3K controller: simple (SDMA) and descriptor
//! (ADMA) engines, plus the bounce regions used when the caller's buffer
//! cannot be handed to the engine directly.

use core::mem::size_of;

use log::{debug, trace};

use crate::{
    common::config::{DmaMode, StagingConfig, StagingLocation},
    host::{SdhciError, SdhciResult},
    osa::PoolBuffer,
};

use super::regs::*;

/// Highest address (exclusive) the 32-bit DMA registers can carry.
pub const DMA_ADDR_LIMIT: u64 = 1 << 32;

const STAGING_ALIGN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Card to memory.
    Read,
    /// Memory to card.
    Write,
}

impl DmaDirection {
    pub fn ctl_bits(self) -> u32 {
        match self {
            DmaDirection::Read => W3K_DMA_CTL_READ,
            DmaDirection::Write => W3K_DMA_CTL_WRITE,
        }
    }
}

/// Whether `[phys, phys + len)` is reachable through the 32-bit DMA registers.
pub fn dma_addressable(phys: usize, len: usize) -> bool {
    (phys as u64).saturating_add(len as u64) <= DMA_ADDR_LIMIT
}

/// One ADMA descriptor as the engine fetches it.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmaDescriptor {
    pub attr: u8,
    pub reserved: u8,
    pub len: u16,
    pub addr: u32,
}

impl AdmaDescriptor {
    fn transfer(addr: u32, len: u16, last: bool) -> Self {
        let mut attr = ADMA_DESC_ATTR_VALID | ADMA_DESC_TRANSFER_DATA;
        if last {
            attr |= ADMA_DESC_ATTR_END;
        }
        Self {
            attr,
            reserved: 0,
            len,
            addr,
        }
    }

    pub fn is_last(&self) -> bool {
        self.attr & ADMA_DESC_ATTR_END != 0
    }
}

/// Descriptor table covering one contiguous transfer. Must stay alive until
/// the engine reports completion.
pub struct AdmaTable {
    buffer: PoolBuffer,
    count: usize,
}

impl AdmaTable {
    /// Split `[phys, phys + len)` into descriptors of at most
    /// [`ADMA_MAX_LEN`] bytes; the final one carries the end marker.
    pub fn build(phys: usize, len: usize) -> SdhciResult<Self> {
        if len == 0 || !dma_addressable(phys, len) {
            return Err(SdhciError::InvalidArgument);
        }

        let count = len.div_ceil(ADMA_MAX_LEN);
        let buffer =
            PoolBuffer::alloc_aligned(count * size_of::<AdmaDescriptor>(), ADMA_TABLE_ALIGN)?;
        let table = buffer.addr() as *mut AdmaDescriptor;

        let mut offset = 0;
        for i in 0..count {
            let chunk = (len - offset).min(ADMA_MAX_LEN);
            let desc =
                AdmaDescriptor::transfer((phys + offset) as u32, chunk as u16, i + 1 == count);
            // SAFETY: `i < count` and the buffer holds `count` descriptors.
            unsafe { table.add(i).write_unaligned(desc) };
            offset += chunk;
        }

        trace!("ADMA table: {} descriptors for {:#x} bytes at {:#x}", count, len, phys);
        Ok(Self { buffer, count })
    }

    pub fn addr(&self) -> usize {
        self.buffer.addr()
    }

    pub fn descriptors(&self) -> &[AdmaDescriptor] {
        // SAFETY: the buffer was filled with `count` descriptors; the packed
        // layout has alignment 1.
        unsafe {
            core::slice::from_raw_parts(self.buffer.addr() as *const AdmaDescriptor, self.count)
        }
    }
}

/// Engine-specific programming of a transfer whose buffer address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaProgrammer {
    Simple,
    Descriptor,
}

impl DmaProgrammer {
    pub fn from_mode(mode: DmaMode) -> Self {
        match mode {
            DmaMode::Simple => DmaProgrammer::Simple,
            DmaMode::Descriptor => DmaProgrammer::Descriptor,
        }
    }
}

/// The two bounce regions, one per direction.
enum StagingBuffer {
    Sram {
        read_base: usize,
        write_base: usize,
        size: usize,
    },
    Heap {
        read: PoolBuffer,
        write: PoolBuffer,
    },
}

impl StagingBuffer {
    fn region(&self, dir: DmaDirection) -> usize {
        match (self, dir) {
            (StagingBuffer::Sram { read_base, .. }, DmaDirection::Read) => *read_base,
            (StagingBuffer::Sram { write_base, .. }, DmaDirection::Write) => *write_base,
            (StagingBuffer::Heap { read, .. }, DmaDirection::Read) => read.addr(),
            (StagingBuffer::Heap { write, .. }, DmaDirection::Write) => write.addr(),
        }
    }

    fn size(&self) -> usize {
        match self {
            StagingBuffer::Sram { size, .. } => *size,
            StagingBuffer::Heap { read, .. } => read.len(),
        }
    }
}

/// Staging state owned by the host: the configuration and, once first
/// needed, the regions themselves.
pub(crate) struct Staging {
    config: Option<StagingConfig>,
    buffer: Option<StagingBuffer>,
}

impl Staging {
    pub fn new(config: Option<StagingConfig>) -> Self {
        Self {
            config,
            buffer: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    #[allow(dead_code)]
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Whether a transfer at bus address `phys` must go through staging.
    pub fn required(&self, phys: usize, len: usize) -> bool {
        match self.config {
            Some(config) => config.always || !dma_addressable(phys, len),
            None => false,
        }
    }

    /// Set up the regions on first use.
    pub fn ensure(&mut self) -> SdhciResult {
        if self.buffer.is_some() {
            return Ok(());
        }
        let config = self.config.ok_or(SdhciError::InvalidConfiguration)?;
        let buffer = match config.location {
            StagingLocation::Sram {
                read_base,
                write_base,
            } => StagingBuffer::Sram {
                read_base,
                write_base,
                size: config.size,
            },
            StagingLocation::Heap => StagingBuffer::Heap {
                read: PoolBuffer::alloc_aligned(config.size, STAGING_ALIGN)?,
                write: PoolBuffer::alloc_aligned(config.size, STAGING_ALIGN)?,
            },
        };
        debug!(
            "staging ready: read {:#x}, write {:#x}, {:#x} bytes",
            buffer.region(DmaDirection::Read),
            buffer.region(DmaDirection::Write),
            buffer.size()
        );
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Copy outbound data into the write region; returns its CPU address.
    pub fn stage_out(&mut self, src: &[u8]) -> SdhciResult<usize> {
        self.ensure()?;
        let buffer = self.buffer.as_mut().ok_or(SdhciError::AllocationFailure)?;
        if src.len() > buffer.size() {
            return Err(SdhciError::InvalidArgument);
        }
        let dst = buffer.region(DmaDirection::Write);
        // SAFETY: the region is at least `size` bytes and owned by the driver
        // for the duration of the transfer.
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len()) };
        Ok(dst)
    }

    /// CPU address of the read region, sized for `len` bytes.
    pub fn read_region(&mut self, len: usize) -> SdhciResult<usize> {
        self.ensure()?;
        let buffer = self.buffer.as_ref().ok_or(SdhciError::AllocationFailure)?;
        if len > buffer.size() {
            return Err(SdhciError::InvalidArgument);
        }
        Ok(buffer.region(DmaDirection::Read))
    }

    /// Copy a completed inbound transfer out of the read region.
    pub fn unstage_in(&self, dst: &mut [u8]) -> SdhciResult {
        let buffer = self.buffer.as_ref().ok_or(SdhciError::AllocationFailure)?;
        if dst.len() > buffer.size() {
            return Err(SdhciError::InvalidArgument);
        }
        let src = buffer.region(DmaDirection::Read);
        // SAFETY: as in `stage_out`; the engine finished writing the region.
        unsafe { core::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
}
