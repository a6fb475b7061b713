use bitflags::bitflags;

pub const MMC_GO_IDLE_STATE: u8 = 0;
pub const MMC_SEND_OP_COND: u8 = 1;
pub const MMC_SEND_CSD: u8 = 9;
pub const MMC_STOP_TRANSMISSION: u8 = 12;
pub const MMC_SEND_STATUS: u8 = 13;
pub const MMC_SET_BLOCKLEN: u8 = 16;
pub const MMC_READ_SINGLE_BLOCK: u8 = 17;
pub const MMC_READ_MULTIPLE_BLOCK: u8 = 18;
pub const MMC_WRITE_BLOCK: u8 = 24;
pub const MMC_WRITE_MULTIPLE_BLOCK: u8 = 25;

pub const MMC_MAX_BLOCK_LEN: u32 = 512;

bitflags! {
    /// Properties of a response format as the card protocol defines them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResponseFlags: u32 {
        const PRESENT = 1 << 0;
        const LONG = 1 << 1;
        const CRC = 1 << 2;
        const BUSY = 1 << 3;
        const OPCODE = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    None,
    R1,
    R1b,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
}

impl ResponseType {
    pub const fn flags(self) -> ResponseFlags {
        const R1: ResponseFlags = ResponseFlags::PRESENT
            .union(ResponseFlags::CRC)
            .union(ResponseFlags::OPCODE);
        match self {
            ResponseType::None => ResponseFlags::empty(),
            ResponseType::R1 | ResponseType::R5 | ResponseType::R6 | ResponseType::R7 => R1,
            ResponseType::R1b => R1.union(ResponseFlags::BUSY),
            ResponseType::R2 => ResponseFlags::PRESENT
                .union(ResponseFlags::LONG)
                .union(ResponseFlags::CRC),
            ResponseType::R3 | ResponseType::R4 => ResponseFlags::PRESENT,
        }
    }

    pub fn is_long(self) -> bool {
        self.flags().contains(ResponseFlags::LONG)
    }

    pub fn has_crc(self) -> bool {
        self.flags().contains(ResponseFlags::CRC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmcCommand {
    pub opcode: u8,
    pub arg: u32,
    pub resp_type: ResponseType,
    pub response: [u32; 4],
}

impl MmcCommand {
    pub fn new(opcode: u8, arg: u32, resp_type: ResponseType) -> Self {
        Self {
            opcode,
            arg,
            resp_type,
            response: [0; 4],
        }
    }

    pub fn as_r1(&self) -> u32 {
        self.response[0]
    }
}

pub enum DataBuffer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl DataBuffer<'_> {
    pub fn is_read(&self) -> bool {
        matches!(self, DataBuffer::Read(_))
    }

    pub fn len(&self) -> usize {
        match self {
            DataBuffer::Read(buf) => buf.len(),
            DataBuffer::Write(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addr(&self) -> usize {
        match self {
            DataBuffer::Read(buf) => buf.as_ptr() as usize,
            DataBuffer::Write(buf) => buf.as_ptr() as usize,
        }
    }
}

/// Data phase attached to a command. The direction follows the buffer.
pub struct MmcData<'a> {
    pub block_size: u32,
    pub blocks: u32,
    pub buffer: DataBuffer<'a>,
}

impl<'a> MmcData<'a> {
    pub fn read(block_size: u32, blocks: u32, buffer: &'a mut [u8]) -> Self {
        Self {
            block_size,
            blocks,
            buffer: DataBuffer::Read(buffer),
        }
    }

    pub fn write(block_size: u32, blocks: u32, buffer: &'a [u8]) -> Self {
        Self {
            block_size,
            blocks,
            buffer: DataBuffer::Write(buffer),
        }
    }

    pub fn is_read(&self) -> bool {
        self.buffer.is_read()
    }

    pub fn trans_bytes(&self) -> usize {
        self.block_size as usize * self.blocks as usize
    }

    /// Reborrow `blocks` blocks starting at block `first` as a new data phase.
    pub(crate) fn slice(&mut self, first: u32, blocks: u32) -> MmcData<'_> {
        let start = first as usize * self.block_size as usize;
        let end = start + blocks as usize * self.block_size as usize;
        let buffer = match &mut self.buffer {
            DataBuffer::Read(buf) => DataBuffer::Read(&mut buf[start..end]),
            DataBuffer::Write(buf) => DataBuffer::Write(&buf[start..end]),
        };
        MmcData {
            block_size: self.block_size,
            blocks,
            buffer,
        }
    }
}
