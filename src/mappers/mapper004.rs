//! Mapper 004 (TxROM / MMC3) driver
//!
//! PRG is switched in 8KB units and CHR in 1KB units. Both go through the
//! same register pair: $8000 picks which bank register (R0-R7) the next
//! $8001 write lands in.
//!
//! Memory map used while dumping:
//! - R6 maps an 8KB PRG bank at $8000-$9FFF (PRG mode 0)
//! - R0 maps a 2KB CHR bank at PPU $0000-$07FF (CHR mode 0, low bit ignored)

use std::io::Write;
use log::debug;

use crate::cartridge::{CHR_BANK_SIZE, PRG_ROM_BANK_SIZE};
use crate::request::NesBus;
use super::{dump_window, Bus, DumpError, Mapper};

const REG_BANK_SELECT: u16 = 0x8000;
const REG_BANK_DATA: u16 = 0x8001;

/// Bank select value routing $8001 to R6 (PRG $8000)
const SELECT_PRG_8000: u8 = 0b110;

/// Bank select value routing $8001 to R0 (CHR $0000, 2KB)
const SELECT_CHR_0000: u8 = 0b000;

const PRG_WINDOW: usize = 0x2000;
const CHR_WINDOW: usize = 0x0800;

pub struct Mapper004 {
    /// Last value written to the bank select register
    bank_select: u8,
}

impl Mapper004 {
    pub fn new() -> Self {
        Mapper004 { bank_select: 0 }
    }

    fn select(&mut self, bus: &mut dyn NesBus, register: u8) -> Result<(), DumpError> {
        bus.write_register(REG_BANK_SELECT, register)?;
        self.bank_select = register;
        Ok(())
    }
}

impl Mapper for Mapper004 {
    fn name(&self) -> &'static str {
        "TxROM"
    }

    fn dump_program(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        self.select(bus, SELECT_PRG_8000)?;

        let mut written = 0;
        for bank in 0..(banks * PRG_ROM_BANK_SIZE) / PRG_WINDOW {
            debug!("TxROM: R{} <- PRG bank {:02}", self.bank_select, bank);
            bus.write_register(REG_BANK_DATA, bank as u8)?;
            written += dump_window(bus, sink, Bus::Cpu, 0x8000, PRG_WINDOW)?;
        }
        Ok(written)
    }

    fn dump_character(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        if banks == 0 {
            return Ok(0);
        }
        self.select(bus, SELECT_CHR_0000)?;

        let mut written = 0;
        // R0 counts 1KB banks; a 2KB window advances two at a time
        for bank in (0..(banks * CHR_BANK_SIZE) >> 10).step_by(2) {
            debug!("TxROM: R{} <- CHR bank {:03}", self.bank_select, bank);
            bus.write_register(REG_BANK_DATA, bank as u8)?;
            written += dump_window(bus, sink, Bus::Ppu, 0x0000, CHR_WINDOW)?;
        }
        Ok(written)
    }
}
