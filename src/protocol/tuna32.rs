//! Opcode table of the 32-bit bus bridge firmware
//!
//! Frame layout (little-endian, 16 bytes): request, value, length, reserved,
//! each a `u32`. `READ16` addresses 16-bit words, so `value` is the byte
//! address shifted right by one.
//!
//! The FC requests reach an NES cartridge: `CPU_READ` reads from $8000 up,
//! `PPU_READ` from the 8KB pattern space, and `CPU_WRITE` strobes one
//! register in $8000-$9FFF.

use bincode::{Decode, Encode};

/// Largest single transfer the bridge accepts
pub const PACKET_SIZE: usize = 0x10000;

/// Size of an encoded request frame
pub const FRAME_SIZE: usize = 16;

/// Request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Request {
    // GBA
    Read16 = 0,
    Write16 = 1,
    Write16Rnd = 2,
    Read8Cs2 = 3,
    Write8Cs2 = 4,
    Write8Cs2Rnd = 5,
    // FC
    CpuRead = 16,
    CpuWrite = 17,
    PpuRead = 18,
}

impl Request {
    /// Decode an opcode word
    pub fn from_u32(value: u32) -> Option<Self> {
        use Request::*;
        let request = match value {
            0 => Read16,
            1 => Write16,
            2 => Write16Rnd,
            3 => Read8Cs2,
            4 => Write8Cs2,
            5 => Write8Cs2Rnd,
            16 => CpuRead,
            17 => CpuWrite,
            18 => PpuRead,
            _ => return None,
        };
        Some(request)
    }

    /// Whether the bridge answers with `length` bytes
    ///
    /// `CPU_WRITE` carries its data byte in `length` and gets no reply.
    pub fn returns_data(self) -> bool {
        matches!(self, Request::Read16 | Request::Read8Cs2 | Request::CpuRead | Request::PpuRead)
    }
}

/// Request frame as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Frame {
    pub request: u32,
    pub value: u32,
    pub length: u32,
    pub reserved: u32,
}

impl Frame {
    pub fn new(request: Request, value: u32, length: u32) -> Self {
        Frame {
            request: request as u32,
            value,
            length,
            reserved: 0,
        }
    }
}
