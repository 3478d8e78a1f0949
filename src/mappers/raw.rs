//! Bare flash chip on the raw bus
//!
//! No mapper at all: the bridge drives the flash address lines directly, one
//! 256-byte page per `value` step. Images carry no iNES header.

use std::io::Write;
use log::debug;

use crate::cartridge::PRG_ROM_BANK_SIZE;
use crate::protocol::tuna::{Request, PACKET_SIZE};
use crate::request::{Bridge, NesBus};
use super::{DumpError, ImageSource, Mapper};

pub struct RawFlash;

impl RawFlash {
    pub fn new() -> Self {
        RawFlash
    }
}

impl Mapper for RawFlash {
    fn name(&self) -> &'static str {
        "RAW"
    }

    fn dump_program(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        let bridge = bus.as_bridge().ok_or(DumpError::BridgeUnsupported("RAW"))?;
        let size = banks * PRG_ROM_BANK_SIZE;
        debug!("RAW: reading {}KB", size >> 10);
        let mut buf = vec![0u8; PACKET_SIZE.min(size)];
        for offset in (0..size).step_by(PACKET_SIZE) {
            bridge.read_raw(offset as u32, &mut buf)?;
            sink.write_all(&buf)?;
        }
        Ok(size as u64)
    }

    /// A bare chip has no PPU side
    fn dump_character(&mut self, _bus: &mut dyn NesBus, _sink: &mut dyn Write, _banks: usize)
        -> Result<u64, DumpError>
    {
        Ok(0)
    }

    /// Program the chip; the firmware erases sectors as it goes
    fn write_program(&mut self, bridge: &mut dyn Bridge, source: &mut dyn ImageSource, banks: usize)
        -> Result<(), DumpError>
    {
        let size = banks * PRG_ROM_BANK_SIZE;
        debug!("RAW: writing {}KB", size >> 10);
        let mut buf = vec![0u8; PACKET_SIZE.min(size)];
        for offset in (0..size).step_by(PACKET_SIZE) {
            source.read_exact(&mut buf)?;
            bridge.write_block(Request::RawWriteFlash, (offset >> 8) as u16, &buf)?;
        }
        Ok(())
    }

    fn has_header(&self) -> bool {
        false
    }
}
