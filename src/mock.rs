//! Register-level model of the W3K controller and an attached card, used by
//! the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::host::w3k::regs::*;
use crate::osa::Hal;
use crate::regs::RegisterIo;

const CARD_BLOCKS: usize = 2048;
const CARD_BLOCK_LEN: usize = 512;

/// Fake bus window handed out per distinct buffer.
const PHYS_WINDOW: usize = 0x0100_0000;
const PHYS_HEADROOM: usize = 0x0010_0000;
const HIGH_PHYS_BASE: usize = 0x1_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The opcode never reports anything.
    NoCompletion(u8),
    CommandTimeout(u8),
    CommandCrc(u8),
    /// Raise data CRC on the n-th interrupt status read after the command.
    DataCrcAfter(usize),
    DataTimeoutAfter(usize),
    /// Data phases never finish.
    NoDataCompletion,
    ClockBusy,
    ResetStuck,
    DllNeverLocks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCommand {
    pub opcode: u8,
    pub arg: u32,
    pub word: u32,
    /// 0 for commands without a data phase.
    pub blocks: u32,
    pub len: usize,
    pub write: bool,
    /// CPU address the DMA engine was pointed at.
    pub cpu_addr: usize,
}

#[derive(Debug, Clone, Copy)]
enum DmaKind {
    Simple,
    Descriptor,
}

struct MockState {
    regs: HashMap<u32, u32>,
    reads: HashMap<u32, usize>,
    writes: Vec<(u32, u32)>,
    card: Vec<u8>,
    commands: Vec<IssuedCommand>,
    faults: Vec<Fault>,
    responses: [u32; 4],
    busy_reads: usize,
    dma_kind: Option<DmaKind>,
    pending_data_error: Option<(IntStatus, usize)>,
    dll_lock_after: usize,
    dll_polls: usize,
    dll_restarts: usize,
    windows: Vec<usize>,
    high: Vec<usize>,
    /// Data addresses are byte offsets (standard-capacity card).
    byte_addressed: bool,
}

impl MockState {
    fn reg(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn set(&mut self, offset: u32, value: u32) {
        self.regs.insert(offset, value);
    }

    fn or(&mut self, reg: Reg, bits: u32) {
        let value = self.reg(reg.offset()) | bits;
        self.set(reg.offset(), value);
    }

    fn has(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn virt_to_phys(&mut self, vaddr: usize) -> usize {
        if let Some(base) = self
            .high
            .iter()
            .find(|&&base| vaddr >= base && vaddr - base < PHYS_HEADROOM)
        {
            return HIGH_PHYS_BASE + (vaddr - base);
        }
        let slot = match self
            .windows
            .iter()
            .position(|&base| vaddr >= base && vaddr - base < PHYS_WINDOW - PHYS_HEADROOM)
        {
            Some(slot) => slot,
            None => {
                self.windows.push(vaddr);
                self.windows.len() - 1
            }
        };
        PHYS_WINDOW * (slot + 1) + (vaddr - self.windows[slot])
    }

    fn phys_to_virt(&self, phys: u32) -> usize {
        let phys = phys as usize;
        let slot = phys / PHYS_WINDOW - 1;
        self.windows[slot] + phys % PHYS_WINDOW
    }

    /// Segments `(cpu address, length)` the engine was programmed with.
    fn dma_segments(&self) -> Vec<(usize, usize)> {
        match self.dma_kind {
            Some(DmaKind::Simple) => {
                let addr = self.phys_to_virt(self.reg(Reg::SdmaAddr.offset()));
                let len = self.reg(Reg::SdmaLen.offset()) as usize;
                vec![(addr, len)]
            }
            Some(DmaKind::Descriptor) => {
                let mut table = self.phys_to_virt(self.reg(Reg::AdmaAddr.offset())) as *const u8;
                let mut segments = Vec::new();
                loop {
                    let mut raw = [0u8; 8];
                    unsafe {
                        core::ptr::copy_nonoverlapping(table, raw.as_mut_ptr(), 8);
                        table = table.add(8);
                    }
                    let attr = raw[0];
                    let len = u16::from_le_bytes([raw[2], raw[3]]) as usize;
                    let addr = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
                    assert_ne!(attr & ADMA_DESC_ATTR_VALID, 0);
                    segments.push((self.phys_to_virt(addr), len));
                    if attr & ADMA_DESC_ATTR_END != 0 {
                        break;
                    }
                }
                segments
            }
            None => Vec::new(),
        }
    }

    fn issue(&mut self, word: u32) {
        let opcode = (word & W3K_CMD_INDEX_MASK) as u8;
        let arg = self.reg(Reg::Argument.offset());
        let flags = CommandFlags::from_bits_truncate(word);
        let has_data = flags.intersects(CommandFlags::SINGLE_BLOCK | CommandFlags::MULTI_BLOCK);
        let write = flags.contains(CommandFlags::WRITE);
        let block_size = ((word >> W3K_CMD_BLKSZ_SHIFT) & W3K_CMD_BLKSZ_MASK) as usize;
        let blocks = if has_data {
            self.reg(Reg::BlockCount.offset())
        } else {
            0
        };
        let segments = if has_data {
            self.dma_segments()
        } else {
            Vec::new()
        };

        self.commands.push(IssuedCommand {
            opcode,
            arg,
            word,
            blocks,
            len: segments.iter().map(|(_, len)| len).sum(),
            write,
            cpu_addr: segments.first().map_or(0, |(addr, _)| *addr),
        });

        if self.has(Fault::NoCompletion(opcode)) {
            return;
        }
        if self.has(Fault::CommandTimeout(opcode)) {
            self.or(Reg::IntStatus, IntStatus::CMD_TIMEOUT.bits());
            return;
        }
        if self.has(Fault::CommandCrc(opcode)) {
            self.or(Reg::IntStatus, IntStatus::CMD_CRC.bits());
            return;
        }

        for i in 0..4 {
            let value = self.responses[i];
            self.set(Reg::response(i).offset(), value);
        }
        self.or(Reg::IntStatus, IntStatus::CMD_DONE.bits());

        if !has_data || self.has(Fault::NoDataCompletion) {
            return;
        }

        let mut offset = if self.byte_addressed {
            arg as usize
        } else {
            arg as usize * block_size
        };
        for (addr, len) in segments {
            if offset + len > self.card.len() {
                self.or(Reg::IntStatus, IntStatus::DATA_TIMEOUT.bits());
                return;
            }
            unsafe {
                if write {
                    core::ptr::copy_nonoverlapping(
                        addr as *const u8,
                        self.card.as_mut_ptr().add(offset),
                        len,
                    );
                } else {
                    core::ptr::copy_nonoverlapping(
                        self.card.as_ptr().add(offset),
                        addr as *mut u8,
                        len,
                    );
                }
            }
            offset += len;
        }

        for fault in self.faults.clone() {
            match fault {
                Fault::DataCrcAfter(n) => {
                    self.pending_data_error = Some((IntStatus::DATA_CRC, n));
                    return;
                }
                Fault::DataTimeoutAfter(n) => {
                    self.pending_data_error = Some((IntStatus::DATA_TIMEOUT, n));
                    return;
                }
                _ => {}
            }
        }

        self.or(Reg::DmaStatus, DmaStatus::TRANSFER_DONE.bits());
        self.or(Reg::IntStatus, IntStatus::DATA_DONE.bits());
    }
}

/// One handle serves as both register block and platform hooks; clones
/// share the same state.
#[derive(Clone)]
pub struct MockController(Arc<Mutex<MockState>>);

impl MockController {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(MockState {
            regs: HashMap::new(),
            reads: HashMap::new(),
            writes: Vec::new(),
            card: vec![0; CARD_BLOCKS * CARD_BLOCK_LEN],
            commands: Vec::new(),
            faults: Vec::new(),
            responses: [0x900, 0, 0, 0],
            busy_reads: 0,
            dma_kind: None,
            pending_data_error: None,
            dll_lock_after: 0,
            dll_polls: 0,
            dll_restarts: 0,
            windows: Vec::new(),
            high: Vec::new(),
            byte_addressed: false,
        })))
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    /// Raw register contents, without read side effects.
    pub fn reg(&self, reg: Reg) -> u32 {
        self.state().reg(reg.offset())
    }

    pub fn poke(&self, offset: u32, value: u32) {
        self.state().set(offset, value);
    }

    /// Forget recorded accesses and commands; register contents stay.
    pub fn reset_log(&self) {
        let mut state = self.state();
        state.reads.clear();
        state.writes.clear();
        state.commands.clear();
        state.dll_restarts = 0;
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    pub fn set_responses(&self, responses: [u32; 4]) {
        self.state().responses = responses;
    }

    pub fn set_busy_reads(&self, reads: usize) {
        self.state().busy_reads = reads;
    }

    pub fn set_dll_lock_after(&self, polls: usize) {
        self.state().dll_lock_after = polls;
    }

    pub fn dll_restarts(&self) -> usize {
        self.state().dll_restarts
    }

    pub fn commands(&self) -> Vec<IssuedCommand> {
        self.state().commands.clone()
    }

    pub fn reg_reads(&self, reg: Reg) -> usize {
        self.state().reads.get(&reg.offset()).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.state().writes.clone()
    }

    pub fn raw_writes_to(&self, offset: u32) -> Vec<u32> {
        self.state()
            .writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn writes_to(&self, reg: Reg) -> Vec<u32> {
        self.raw_writes_to(reg.offset())
    }

    /// Fill the card: `f(block, byte_in_block)`.
    pub fn fill_card(&self, f: impl Fn(usize, usize) -> u8) {
        let mut state = self.state();
        for (i, byte) in state.card.iter_mut().enumerate() {
            *byte = f(i / CARD_BLOCK_LEN, i % CARD_BLOCK_LEN);
        }
    }

    pub fn card_block(&self, block: u32) -> Vec<u8> {
        let start = block as usize * CARD_BLOCK_LEN;
        self.state().card[start..start + CARD_BLOCK_LEN].to_vec()
    }

    pub fn set_byte_addressed(&self, byte_addressed: bool) {
        self.state().byte_addressed = byte_addressed;
    }

    /// Make the buffer at `vaddr` appear above the 32-bit DMA limit.
    pub fn map_high(&self, vaddr: usize) {
        self.state().high.push(vaddr);
    }
}

impl RegisterIo for MockController {
    fn read_reg32(&self, offset: u32) -> u32 {
        let mut state = self.state();
        *state.reads.entry(offset).or_default() += 1;
        let value = state.reg(offset);

        match offset {
            o if o == Reg::ClockControl.offset() => {
                let mut value = value & !W3K_CLK_BUSY;
                if !state.has(Fault::ResetStuck) {
                    value &= !W3K_SDHCI_RESET_ALL;
                }
                if state.has(Fault::ClockBusy) {
                    value |= W3K_CLK_BUSY;
                }
                value
            }
            o if o == Reg::IntStatus.offset() => {
                if let Some((bit, remaining)) = state.pending_data_error {
                    if remaining <= 1 {
                        state.pending_data_error = None;
                        state.or(Reg::IntStatus, bit.bits());
                        return value | bit.bits();
                    }
                    state.pending_data_error = Some((bit, remaining - 1));
                }
                value
            }
            o if o == Reg::PresentState.offset() => {
                if state.busy_reads > 0 {
                    state.busy_reads -= 1;
                    W3K_PRESENT_BUSY
                } else {
                    0
                }
            }
            o if o == Reg::Dll.offset() => {
                if value & W3K_DLL_ENABLE == 0 {
                    return value;
                }
                state.dll_polls += 1;
                if !state.has(Fault::DllNeverLocks) && state.dll_polls >= state.dll_lock_after {
                    value | 0x2
                } else {
                    value
                }
            }
            _ => value,
        }
    }

    fn write_reg32(&self, offset: u32, value: u32) {
        let mut state = self.state();
        state.writes.push((offset, value));

        match offset {
            o if o == Reg::IntStatus.offset() => {
                let pending = state.reg(o) & !value;
                state.set(o, pending);
            }
            o if o == Reg::DmaStatus.offset() => {
                // Write-1-to-clear events; the flush bit completes at once.
                let pending = state.reg(o) & !(value & DmaStatus::EVENT_MASK);
                state.set(o, pending);
            }
            o if o == Reg::DmaCtl.offset() => state.set(o, value & !W3K_DMA_DISABLE),
            o if o == Reg::InputDelay.offset() => state.set(o, value & !W3K_KDL_LOAD),
            o if o == Reg::Dll.offset() => {
                if value & W3K_DLL_ENABLE != 0 && state.reg(o) & W3K_DLL_ENABLE == 0 {
                    state.dll_restarts += 1;
                    state.dll_polls = 0;
                }
                state.set(o, value);
            }
            o if o == Reg::SdmaAddr.offset() => {
                state.dma_kind = Some(DmaKind::Simple);
                state.set(o, value);
            }
            o if o == Reg::AdmaAddr.offset() => {
                state.dma_kind = Some(DmaKind::Descriptor);
                state.set(o, value);
            }
            o if o == Reg::Command.offset() => {
                state.set(o, value);
                state.pending_data_error = None;
                state.issue(value);
            }
            _ => state.set(offset, value),
        }
    }
}

impl Hal for MockController {
    fn delay_us(&self, _us: u32) {}

    fn virt_to_phys(&self, vaddr: usize) -> usize {
        self.state().virt_to_phys(vaddr)
    }
}
