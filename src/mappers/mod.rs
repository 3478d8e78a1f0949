//! Bank-switching drivers for NES cartridge boards
//!
//! Each board family knows how to put its mapper into a known state, walk
//! every PRG/CHR bank through the CPU/PPU windows, and stream the bytes to or
//! from an image. The driver is picked once per operation by [`create_mapper`].
//!
//! Dumps go through [`NesBus`], so NROM, TxROM and AxROM run on either
//! bridge and use its full packet size. SxROM and bare flash need requests
//! only the 8-bit bridge has.

mod mapper000; // NROM
mod mapper001; // SxROM (MMC1)
mod mapper004; // TxROM (MMC3)
mod mapper007; // AxROM
mod raw;       // bare flash

pub use mapper000::Mapper000;
pub use mapper001::Mapper001;
pub use mapper004::Mapper004;
pub use mapper007::Mapper007;
pub use raw::RawFlash;

use std::io::{self, Read, Seek, Write};
use std::str::FromStr;
use thiserror::Error;

use crate::cartridge::HeaderError;
use crate::protocol::tuna::{Request, PACKET_SIZE};
use crate::request::{Bridge, NesBus, TransportError};

/// Errors raised while dumping or writing a cartridge
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Image I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("Unsupported mapper: {0}")]
    UnsupportedMapper(u8),

    #[error("{0} boards cannot be written")]
    WriteUnsupported(&'static str),

    #[error("{0} boards need the 8-bit bus bridge")]
    BridgeUnsupported(&'static str),
}

/// Image that can be read back with bank-aligned seeks
pub trait ImageSource: Read + Seek {}

impl<T: Read + Seek> ImageSource for T {}

/// Trait for NES board drivers
pub trait Mapper {
    /// Board family name
    fn name(&self) -> &'static str;

    /// Dump `banks` 16KB units of PRG ROM into `sink`
    fn dump_program(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>;

    /// Dump `banks` 8KB units of CHR ROM into `sink`
    fn dump_character(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>;

    /// Write `banks` 16KB units of PRG from `source`, positioned at the PRG data
    fn write_program(&mut self, _bridge: &mut dyn Bridge, _source: &mut dyn ImageSource, _banks: usize)
        -> Result<(), DumpError>
    {
        Err(DumpError::WriteUnsupported(self.name()))
    }

    /// Write `banks` 8KB units of CHR from `source`, positioned at the CHR data
    fn write_character(&mut self, _bridge: &mut dyn Bridge, _source: &mut dyn ImageSource, _banks: usize)
        -> Result<(), DumpError>
    {
        Err(DumpError::WriteUnsupported(self.name()))
    }

    /// Whether dumps of this board carry an iNES header
    fn has_header(&self) -> bool {
        true
    }
}

/// Board families this tool drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperKind {
    Nrom,
    Sxrom,
    Txrom,
    Axrom,
    Raw,
}

impl MapperKind {
    /// Board family for an iNES mapper number
    pub fn from_ines(mapper: u8) -> Result<Self, DumpError> {
        match mapper {
            0 => Ok(MapperKind::Nrom),
            1 => Ok(MapperKind::Sxrom),
            4 => Ok(MapperKind::Txrom),
            7 => Ok(MapperKind::Axrom),
            _ => Err(DumpError::UnsupportedMapper(mapper)),
        }
    }

    /// iNES mapper number written into headers
    pub fn ines_number(self) -> u8 {
        match self {
            MapperKind::Nrom | MapperKind::Raw => 0,
            MapperKind::Sxrom => 1,
            MapperKind::Txrom => 4,
            MapperKind::Axrom => 7,
        }
    }
}

impl FromStr for MapperKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nrom" => Ok(MapperKind::Nrom),
            "sxrom" | "mmc1" => Ok(MapperKind::Sxrom),
            "txrom" | "mmc3" => Ok(MapperKind::Txrom),
            "axrom" => Ok(MapperKind::Axrom),
            "raw" => Ok(MapperKind::Raw),
            other => other
                .parse::<u8>()
                .map_err(|_| format!("unknown mapper: {}", other))
                .and_then(|n| MapperKind::from_ines(n).map_err(|e| e.to_string())),
        }
    }
}

/// Create the driver for a board family
pub fn create_mapper(kind: MapperKind) -> Box<dyn Mapper> {
    match kind {
        MapperKind::Nrom => Box::new(Mapper000::new()),
        MapperKind::Sxrom => Box::new(Mapper001::new()),
        MapperKind::Txrom => Box::new(Mapper004::new()),
        MapperKind::Axrom => Box::new(Mapper007::new()),
        MapperKind::Raw => Box::new(RawFlash::new()),
    }
}

/// Bus a window is read through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bus {
    Cpu,
    Ppu,
}

/// Read `size` bytes of the window at `base` in transfers as large as the
/// bridge allows
pub(crate) fn dump_window<B>(bridge: &mut B, sink: &mut dyn Write, bus: Bus, base: u16, size: usize)
    -> Result<u64, DumpError>
where
    B: NesBus + ?Sized,
{
    let packet = bridge.packet_size();
    let mut buf = vec![0u8; packet.min(size)];
    for offset in (0..size).step_by(packet) {
        let chunk = &mut buf[..packet.min(size - offset)];
        let addr = base | offset as u16;
        match bus {
            Bus::Cpu => bridge.read_cpu(addr, chunk)?,
            Bus::Ppu => bridge.read_ppu(addr, chunk)?,
        }
        sink.write_all(chunk)?;
    }
    Ok(size as u64)
}

/// Stream `size` bytes from `source` with a write-type request per packet
pub(crate) fn write_window(bridge: &mut dyn Bridge, source: &mut dyn ImageSource, request: Request, base: u16, size: usize)
    -> Result<(), DumpError>
{
    let mut buf = vec![0u8; PACKET_SIZE.min(size)];
    for offset in (0..size).step_by(PACKET_SIZE) {
        source.read_exact(&mut buf)?;
        bridge.write_block(request, base | offset as u16, &buf)?;
    }
    Ok(())
}
