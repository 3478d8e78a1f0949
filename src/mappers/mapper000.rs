//! Mapper 000 (NROM) driver
//!
//! No banking: PRG sits at $8000-$FFFF and CHR at PPU $0000-$1FFF, so a dump
//! is a straight walk of both windows.
//!
//! Boards built with EEPROMs in place of mask ROMs are written back through
//! the bridge's EEPROM requests.

use std::io::Write;
use log::debug;

use crate::cartridge::{CHR_BANK_SIZE, PRG_ROM_BANK_SIZE};
use crate::protocol::tuna::Request;
use crate::request::{Bridge, NesBus};
use super::{dump_window, write_window, Bus, DumpError, ImageSource, Mapper};

/// Base of the PRG window on the CPU bus
const PRG_BASE: u16 = 0x8000;

pub struct Mapper000;

impl Mapper000 {
    pub fn new() -> Self {
        Mapper000
    }
}

impl Mapper for Mapper000 {
    fn name(&self) -> &'static str {
        "NROM"
    }

    fn dump_program(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        debug!("NROM: PRG {}KB", banks * 16);
        dump_window(bus, sink, Bus::Cpu, PRG_BASE, banks * PRG_ROM_BANK_SIZE)
    }

    fn dump_character(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        debug!("NROM: CHR {}KB", banks * 8);
        dump_window(bus, sink, Bus::Ppu, 0x0000, banks * CHR_BANK_SIZE)
    }

    fn write_program(&mut self, bridge: &mut dyn Bridge, source: &mut dyn ImageSource, banks: usize)
        -> Result<(), DumpError>
    {
        debug!("NROM: writing PRG EEPROM {}KB", banks * 16);
        write_window(bridge, source, Request::CpuWriteEep, PRG_BASE, banks * PRG_ROM_BANK_SIZE)
    }

    fn write_character(&mut self, bridge: &mut dyn Bridge, source: &mut dyn ImageSource, banks: usize)
        -> Result<(), DumpError>
    {
        debug!("NROM: writing CHR EEPROM {}KB", banks * 8);
        write_window(bridge, source, Request::PpuWriteEep, 0x0000, banks * CHR_BANK_SIZE)
    }
}
