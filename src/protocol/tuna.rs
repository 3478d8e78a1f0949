//! Opcode table of the 8-bit bus bridge firmware (revision 2)
//!
//! Frame layout (little-endian, 8 bytes):
//! - byte 0: reserved, always 0
//! - byte 1: request opcode
//! - bytes 2-3: value (address or parameter)
//! - bytes 4-5: index (bus selector)
//! - bytes 6-7: length (payload size, response size, or register data)

use bincode::{Decode, Encode};

/// Firmware revision this table matches
pub const FIRMWARE_REVISION: u8 = 2;

/// Largest single transfer the bridge accepts
pub const PACKET_SIZE: usize = 0x400;

/// Size of an encoded request frame
pub const FRAME_SIZE: usize = 8;

/// Request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Request {
    Echo = 0,
    Phi2Init = 1,

    CpuRead6502 = 2,
    CpuRead = 3,
    CpuWrite6502 = 4,
    CpuWrite6502FiveBits = 5,

    PpuRead = 6,
    PpuWrite = 7,

    CpuWriteEep = 16,
    PpuWriteEep = 17,
    CpuWriteFlash = 18,

    RawRead = 32,
    RawReadLo = 33,
    RawWrite = 34,
    RawWriteLo = 35,
    RawWriteLoWoCs = 36,
    RawReadWoCs = 37,

    RawEraseFlash = 64,
    RawWriteFlash = 65,
}

/// Which way the bytes declared by `length` travel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// `length` carries register data; nothing follows, nothing comes back
    Register,
    /// `length` payload bytes follow the frame
    Out,
    /// `length` bytes are read back
    In,
    /// `length` bytes are sent and the same count is echoed back
    Echo,
}

impl Request {
    /// Decode an opcode byte
    pub fn from_u8(value: u8) -> Option<Self> {
        use Request::*;
        let request = match value {
            0 => Echo,
            1 => Phi2Init,
            2 => CpuRead6502,
            3 => CpuRead,
            4 => CpuWrite6502,
            5 => CpuWrite6502FiveBits,
            6 => PpuRead,
            7 => PpuWrite,
            16 => CpuWriteEep,
            17 => PpuWriteEep,
            18 => CpuWriteFlash,
            32 => RawRead,
            33 => RawReadLo,
            34 => RawWrite,
            35 => RawWriteLo,
            36 => RawWriteLoWoCs,
            37 => RawReadWoCs,
            64 => RawEraseFlash,
            65 => RawWriteFlash,
            _ => return None,
        };
        Some(request)
    }

    /// Direction of the bytes counted by the frame's `length`
    pub fn transfer(self) -> Transfer {
        use Request::*;
        match self {
            Echo => Transfer::Echo,
            CpuRead6502 | CpuRead | PpuRead | RawRead | RawReadLo | RawReadWoCs => Transfer::In,
            CpuWriteEep | PpuWriteEep | CpuWriteFlash | RawWrite | RawWriteLo
            | RawWriteLoWoCs | RawWriteFlash => Transfer::Out,
            Phi2Init | CpuWrite6502 | CpuWrite6502FiveBits | PpuWrite | RawEraseFlash => {
                Transfer::Register
            }
        }
    }
}

/// Bus the bridge drives for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Index {
    Implied = 0,
    Cpu = 1,
    Ppu = 2,
    Both = 3,
}

/// Request frame as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Frame {
    pub reserved: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl Frame {
    pub fn new(request: Request, value: u16, index: Index, length: u16) -> Self {
        Frame {
            reserved: 0,
            request: request as u8,
            value,
            index: index as u16,
            length,
        }
    }

    /// Opcode of this frame, if the firmware knows it
    pub fn request(&self) -> Option<Request> {
        Request::from_u8(self.request)
    }
}
