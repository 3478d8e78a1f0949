//! Request framing over the serial link
//!
//! The bridge speaks a strict request/response protocol: a frame goes out,
//! then either a payload follows it, a response of exactly `length` bytes is
//! read back, or (for register writes) nothing at all. Nothing is pipelined.
//!
//! [`Bridge`] is the seam every cartridge driver talks through. [`Link`]
//! implements it over any byte stream. [`NesBus`] is the narrower CPU/PPU
//! view an NES dump needs, which [`WideLink`] also provides for the 32-bit
//! bus bridge.

use std::io::{self, Read, Write};
use log::trace;
use thiserror::Error;

use crate::protocol::{frame_config, tuna, tuna32};
use crate::protocol::tuna::{Frame, Index, Request, PACKET_SIZE};

/// Errors raised by the serial link
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Timed out after {received} of {expected} bytes")]
    Timeout { expected: usize, received: usize },

    #[error("Short read: stream ended after {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },

    #[error("Short write: the port accepted no more bytes")]
    ShortWrite,

    #[error("Transfer of {0} bytes exceeds the bridge packet size")]
    PacketTooLarge(usize),

    #[error("Register ${0:04X} is outside the bridge's write window")]
    OutsideWriteWindow(u16),

    #[error("Frame encoding error: {0}")]
    Frame(#[from] bincode::error::EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// CPU and PPU bus access to an NES cartridge
///
/// Both bridges implement this; reads may be as large as [`packet_size`].
///
/// [`packet_size`]: NesBus::packet_size
pub trait NesBus {
    /// Largest transfer one request may carry
    fn packet_size(&self) -> usize;

    /// Write a mapper register (data travels in `length`)
    fn write_register(&mut self, addr: u16, data: u8) -> Result<(), TransportError>;

    /// Read from the CPU bus starting at `addr`
    fn read_cpu(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Read from the PPU bus starting at `addr`
    fn read_ppu(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), TransportError>;

    /// The full 8-bit bridge request set, if this bus has it
    fn as_bridge(&mut self) -> Option<&mut dyn Bridge> {
        None
    }
}

/// Request/response access to the 8-bit bus bridge
pub trait Bridge: NesBus {
    /// Send one request frame
    fn send_request(&mut self, request: Request, value: u16, index: Index, length: u16)
        -> Result<(), TransportError>;

    /// Send the payload declared by the previous frame
    fn send_payload(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read exactly `buf.len()` response bytes
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Write an MMC1 register through its 5-bit serial shift port
    fn write_register_5bits(&mut self, addr: u16, data: u8) -> Result<(), TransportError> {
        self.send_request(Request::CpuWrite6502FiveBits, addr, Index::Implied, (data & 0x1F) as u16)
    }

    /// Send a write-type request followed by its payload
    fn write_block(&mut self, request: Request, value: u16, data: &[u8]) -> Result<(), TransportError> {
        check_packet(data.len())?;
        self.send_request(request, value, Index::Implied, data.len() as u16)?;
        self.send_payload(data)
    }

    /// Send a read-type request and collect its response
    fn request_in(&mut self, request: Request, value: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        check_packet(buf.len())?;
        self.send_request(request, value, Index::Implied, buf.len() as u16)?;
        self.read_payload(buf)
    }

    /// Raw bus read; `offset` is page-addressed (`value = offset >> 8`)
    fn read_raw(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        self.request_in(Request::RawRead, (offset >> 8) as u16, buf)
    }

    /// Raw bus write of a block, page-addressed
    fn write_raw(&mut self, addr: u16, data: &[u8]) -> Result<(), TransportError> {
        self.write_block(Request::RawWrite, addr >> 8, data)
    }

    /// Raw bus write of one byte, page-addressed (MBC registers)
    fn write_raw_byte(&mut self, addr: u16, data: u8) -> Result<(), TransportError> {
        self.write_raw(addr, &[data])
    }

    /// Read one byte at a full 16-bit address
    fn read_reg(&mut self, addr: u16) -> Result<u8, TransportError> {
        let mut buf = [0u8; 1];
        self.request_in(Request::RawReadLo, addr, &mut buf)?;
        Ok(buf[0])
    }

    /// Write one byte at a full 16-bit address
    fn write_reg(&mut self, addr: u16, data: u8) -> Result<(), TransportError> {
        self.write_block(Request::RawWriteLo, addr, &[data])
    }

    /// Write one byte at a full 16-bit address with chip select held high
    fn write_reg_unselected(&mut self, addr: u16, data: u8) -> Result<(), TransportError> {
        self.write_block(Request::RawWriteLoWoCs, addr, &[data])
    }

    /// Page-addressed read with chip select held high
    fn read_raw_unselected(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        self.request_in(Request::RawReadWoCs, (offset >> 8) as u16, buf)
    }
}

fn check_packet(len: usize) -> Result<(), TransportError> {
    if len > PACKET_SIZE {
        return Err(TransportError::PacketTooLarge(len));
    }
    Ok(())
}

fn write_all<S: Write>(stream: &mut S, data: &[u8]) -> Result<(), TransportError> {
    stream.write_all(data).map_err(|e| match e.kind() {
        io::ErrorKind::WriteZero => TransportError::ShortWrite,
        _ => TransportError::Io(e),
    })?;
    stream.flush()?;
    Ok(())
}

fn read_exact<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<(), TransportError> {
    let expected = buf.len();
    let mut received = 0;
    while received < expected {
        match stream.read(&mut buf[received..]) {
            Ok(0) => return Err(TransportError::ShortRead { expected, received }),
            Ok(n) => received += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                return Err(TransportError::Timeout { expected, received });
            }
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
    Ok(())
}

/// Framing over a byte stream connected to the 8-bit bus bridge
pub struct Link<S> {
    stream: S,
}

impl<S: Read + Write> Link<S> {
    /// Wrap an open stream
    pub fn new(stream: S) -> Self {
        Link { stream }
    }

    /// Borrow the underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Release the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> Bridge for Link<S> {
    fn send_request(&mut self, request: Request, value: u16, index: Index, length: u16)
        -> Result<(), TransportError>
    {
        let frame = Frame::new(request, value, index, length);
        let mut header = [0u8; tuna::FRAME_SIZE];
        bincode::encode_into_slice(frame, &mut header, frame_config())?;
        trace!("-> {:?} value=${:04X} index={:?} length={}", request, value, index, length);
        write_all(&mut self.stream, &header)
    }

    fn send_payload(&mut self, data: &[u8]) -> Result<(), TransportError> {
        write_all(&mut self.stream, data)
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        read_exact(&mut self.stream, buf)
    }
}

impl<S: Read + Write> NesBus for Link<S> {
    fn packet_size(&self) -> usize {
        PACKET_SIZE
    }

    fn write_register(&mut self, addr: u16, data: u8) -> Result<(), TransportError> {
        self.send_request(Request::CpuWrite6502, addr, Index::Implied, data as u16)
    }

    fn read_cpu(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        self.request_in(Request::CpuRead, addr, buf)
    }

    fn read_ppu(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        self.request_in(Request::PpuRead, addr, buf)
    }

    fn as_bridge(&mut self) -> Option<&mut dyn Bridge> {
        Some(self)
    }
}

/// Framing over a byte stream connected to the 32-bit bus bridge
pub struct WideLink<S> {
    stream: S,
}

impl<S: Read + Write> WideLink<S> {
    pub fn new(stream: S) -> Self {
        WideLink { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    fn send(&mut self, request: tuna32::Request, value: u32, length: u32) -> Result<(), TransportError> {
        let frame = tuna32::Frame::new(request, value, length);
        let mut header = [0u8; tuna32::FRAME_SIZE];
        bincode::encode_into_slice(frame, &mut header, frame_config())?;
        trace!("-> {:?} value=${:08X} length={}", request, value, length);
        write_all(&mut self.stream, &header)
    }

    /// Send a request and read `buf.len()` bytes back
    pub fn read(&mut self, request: tuna32::Request, value: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        if buf.len() > tuna32::PACKET_SIZE {
            return Err(TransportError::PacketTooLarge(buf.len()));
        }
        self.send(request, value, buf.len() as u32)?;
        read_exact(&mut self.stream, buf)
    }
}

/// Writes land on A0-A12 only, with A15 forced high
const WIDE_WRITE_WINDOW: std::ops::Range<u16> = 0x8000..0xA000;

impl<S: Read + Write> NesBus for WideLink<S> {
    fn packet_size(&self) -> usize {
        tuna32::PACKET_SIZE
    }

    fn write_register(&mut self, addr: u16, data: u8) -> Result<(), TransportError> {
        if !WIDE_WRITE_WINDOW.contains(&addr) {
            return Err(TransportError::OutsideWriteWindow(addr));
        }
        self.send(tuna32::Request::CpuWrite, addr as u32, data as u32)
    }

    fn read_cpu(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        self.read(tuna32::Request::CpuRead, addr as u32, buf)
    }

    fn read_ppu(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        self.read(tuna32::Request::PpuRead, addr as u32, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPort;

    #[test]
    fn frame_is_eight_little_endian_bytes() {
        let mut link = Link::new(MockPort::default());
        link.send_request(Request::CpuRead, 0x8400, Index::Ppu, 0x0400).unwrap();
        assert_eq!(link.get_ref().written, vec![0x00, 0x03, 0x00, 0x84, 0x02, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn register_write_carries_data_in_length() {
        let mut link = Link::new(MockPort::default());
        link.write_register(0x8001, 0x2A).unwrap();
        let frames = link.get_ref().frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame.request(), Some(Request::CpuWrite6502));
        assert_eq!(frames[0].frame.value, 0x8001);
        assert_eq!(frames[0].frame.length, 0x2A);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn raw_read_is_page_addressed() {
        let mut link = Link::new(MockPort::default());
        let mut buf = [0u8; 0x400];
        link.read_raw(0x4C00, &mut buf).unwrap();
        let frames = link.get_ref().frames();
        assert_eq!(frames[0].frame.request(), Some(Request::RawRead));
        assert_eq!(frames[0].frame.value, 0x4C);
        assert_eq!(frames[0].frame.length, 0x400);
    }

    #[test]
    fn oversize_transfer_is_rejected_before_sending() {
        let mut link = Link::new(MockPort::default());
        let mut buf = vec![0u8; PACKET_SIZE + 1];
        let err = link.read_cpu(0x8000, &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::PacketTooLarge(n) if n == PACKET_SIZE + 1));
        assert!(link.get_ref().written.is_empty());
    }

    #[test]
    fn truncated_response_is_short_read() {
        let mut port = MockPort::default();
        port.truncate_responses_to = Some(3);
        let mut link = Link::new(port);
        let mut buf = [0u8; 16];
        let err = link.read_ppu(0x0000, &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::ShortRead { expected: 16, received: 3 }));
    }

    #[test]
    fn stalled_response_is_timeout() {
        let mut port = MockPort::default();
        port.stall_responses = true;
        let mut link = Link::new(port);
        let err = link.read_reg(0x0120).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { expected: 1, received: 0 }));
    }

    #[test]
    fn wide_frame_layout() {
        let mut link = WideLink::new(crate::testing::WidePort::default());
        let mut buf = vec![0u8; 0x10000];
        link.read(tuna32::Request::Read16, 0x0001_0000 >> 1, &mut buf).unwrap();
        assert_eq!(
            &link.get_ref().written[..16],
            &[0, 0, 0, 0, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0, 0, 0, 0]
        );
    }

    #[test]
    fn wide_register_write_carries_data_in_length() {
        let mut link = WideLink::new(crate::testing::WidePort::default());
        link.write_register(0x8001, 0x2A).unwrap();
        assert_eq!(link.packet_size(), 0x10000);
        let frames = &link.get_ref().frames;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], tuna32::Frame::new(tuna32::Request::CpuWrite, 0x8001, 0x2A));
    }

    #[test]
    fn wide_register_write_outside_window_is_refused() {
        let mut link = WideLink::new(crate::testing::WidePort::default());
        let err = link.write_register(0xE000, 0x01).unwrap_err();
        assert!(matches!(err, TransportError::OutsideWriteWindow(0xE000)));
        assert!(link.get_ref().written.is_empty());
        assert!(link.as_bridge().is_none());
    }
}
