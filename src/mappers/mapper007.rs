//! Mapper 007 (AxROM) driver
//!
//! A single register anywhere in $8000-$FFFF selects a 32KB PRG bank (bits
//! 0-2) and the one-screen nametable (bit 4). Boards ship with CHR RAM; a
//! non-zero CHR count is still read straight through the PPU window.

use std::io::Write;
use log::debug;

use crate::cartridge::{CHR_BANK_SIZE, PRG_ROM_BANK_SIZE};
use crate::request::NesBus;
use super::{dump_window, Bus, DumpError, Mapper};

const REG_BANK: u16 = 0x8000;
const PRG_WINDOW: usize = 0x8000;

pub struct Mapper007;

impl Mapper007 {
    pub fn new() -> Self {
        Mapper007
    }
}

impl Mapper for Mapper007 {
    fn name(&self) -> &'static str {
        "AxROM"
    }

    fn dump_program(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        let mut written = 0;
        for bank in 0..(banks * PRG_ROM_BANK_SIZE) / PRG_WINDOW {
            debug!("AxROM: PRG bank {}", bank);
            bus.write_register(REG_BANK, bank as u8)?;
            written += dump_window(bus, sink, Bus::Cpu, 0x8000, PRG_WINDOW)?;
        }
        Ok(written)
    }

    fn dump_character(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        dump_window(bus, sink, Bus::Ppu, 0x0000, banks * CHR_BANK_SIZE)
    }
}
