//! Mapper 001 (SxROM / MMC1) driver
//!
//! MMC1 registers are loaded one bit at a time through a 5-bit serial port;
//! the bridge shifts the whole word in with a single request. A write with
//! bit 7 set resets the shift register and forces PRG mode 3.
//!
//! Registers:
//! - $8000 control: mirroring (bits 0-1), PRG mode (bits 2-3), CHR mode (bit 4)
//! - $A000 CHR bank 0: on SUROM, bit 4 selects the 256KB PRG half
//! - $E000 PRG bank: 16KB bank within the current half
//!
//! Boards with more than 16 PRG banks (SUROM, 512KB) are walked one 256KB
//! half at a time.

use std::io::{Seek, SeekFrom, Write};
use log::debug;

use crate::cartridge::{CHR_BANK_SIZE, PRG_ROM_BANK_SIZE};
use crate::protocol::tuna::Request;
use crate::request::{Bridge, NesBus};
use super::{dump_window, write_window, Bus, DumpError, ImageSource, Mapper};

/// Value that resets the MMC1 shift register
const RESET: u8 = 0xFF;

/// Horizontal mirroring, PRG mode 3 ($8000 swappable), CHR 8KB mode
const CONTROL_SWAP_LOW: u8 = 0b01111;

/// Horizontal mirroring, PRG mode 2 ($C000 swappable), CHR 8KB mode
const CONTROL_SWAP_HIGH: u8 = 0b01011;

/// CHR bank 0 value selecting the first 256KB PRG half
const HALF_FIRST: u8 = 0b00000;

/// CHR bank 0 value selecting the second 256KB PRG half
const HALF_SECOND: u8 = 0b10000;

/// PRG banks per 256KB half
const BANKS_PER_HALF: usize = 16;

const REG_CONTROL: u16 = 0x8000;
const REG_CHR_BANK_0: u16 = 0xA000;
const REG_PRG_BANK: u16 = 0xE000;

pub struct Mapper001 {
    /// Last value loaded into the control register
    control: u8,

    /// Last value loaded into CHR bank 0
    chr_bank_0: u8,

    /// Last value loaded into the PRG bank register
    prg_bank: u8,
}

impl Mapper001 {
    pub fn new() -> Self {
        Mapper001 {
            control: 0x0C,
            chr_bank_0: 0,
            prg_bank: 0,
        }
    }

    fn reset(&mut self, bridge: &mut dyn Bridge) -> Result<(), DumpError> {
        bridge.write_register(REG_CONTROL, RESET)?;
        self.control |= 0x0C;
        Ok(())
    }

    fn write_control(&mut self, bridge: &mut dyn Bridge, value: u8) -> Result<(), DumpError> {
        bridge.write_register_5bits(REG_CONTROL, value)?;
        self.control = value;
        Ok(())
    }

    fn select_half(&mut self, bridge: &mut dyn Bridge, value: u8) -> Result<(), DumpError> {
        bridge.write_register_5bits(REG_CHR_BANK_0, value)?;
        self.chr_bank_0 = value;
        Ok(())
    }

    fn select_prg(&mut self, bridge: &mut dyn Bridge, bank: usize) -> Result<(), DumpError> {
        bridge.write_register_5bits(REG_PRG_BANK, bank as u8)?;
        self.prg_bank = bank as u8;
        Ok(())
    }

    /// Bank counts of the first and second 256KB halves
    fn halves(banks: usize) -> (usize, usize) {
        if banks <= BANKS_PER_HALF {
            (banks, 0)
        } else {
            (BANKS_PER_HALF, banks - BANKS_PER_HALF)
        }
    }

    /// Write every other bank of one half, starting at `first`
    fn write_half(
        &mut self,
        bridge: &mut dyn Bridge,
        source: &mut dyn ImageSource,
        image_base: u64,
        half: usize,
        banks: usize,
        first: usize,
        window: u16,
    ) -> Result<(), DumpError> {
        for bank in (first..banks).step_by(2) {
            self.select_prg(bridge, bank)?;
            let offset = image_base + ((half * BANKS_PER_HALF + bank) * PRG_ROM_BANK_SIZE) as u64;
            source.seek(SeekFrom::Start(offset))?;
            debug!("SxROM: flashing control=${:02X} chr0=${:02X} prg={:02} at window ${:04X}",
                   self.control, self.chr_bank_0, self.prg_bank, window);
            write_window(bridge, source, Request::CpuWriteFlash, window, PRG_ROM_BANK_SIZE)?;
        }
        Ok(())
    }
}

impl Mapper for Mapper001 {
    fn name(&self) -> &'static str {
        "SxROM"
    }

    fn dump_program(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        let bridge = bus.as_bridge().ok_or(DumpError::BridgeUnsupported("SxROM"))?;
        self.reset(bridge)?;
        self.write_control(bridge, CONTROL_SWAP_LOW)?;

        let (first, second) = Self::halves(banks);
        let mut written = 0;
        for (value, count) in [(HALF_FIRST, first), (HALF_SECOND, second)] {
            if count == 0 {
                break;
            }
            self.select_half(bridge, value)?;
            for bank in 0..count {
                self.select_prg(bridge, bank)?;
                debug!("SxROM: dumping control=${:02X} chr0=${:02X} prg={:02}",
                       self.control, self.chr_bank_0, self.prg_bank);
                written += dump_window(bridge, sink, Bus::Cpu, 0x8000, PRG_ROM_BANK_SIZE)?;
            }
        }
        Ok(written)
    }

    fn dump_character(&mut self, bus: &mut dyn NesBus, sink: &mut dyn Write, banks: usize)
        -> Result<u64, DumpError>
    {
        if banks == 0 {
            return Ok(0);
        }
        let bridge = bus.as_bridge().ok_or(DumpError::BridgeUnsupported("SxROM"))?;
        self.reset(bridge)?;
        self.write_control(bridge, CONTROL_SWAP_LOW)?;

        let mut written = 0;
        for bank in 0..banks {
            // 8KB mode ignores bit 0
            self.select_half(bridge, (bank << 1) as u8)?;
            debug!("SxROM: dumping CHR bank {:02} (chr0=${:02X})", bank, self.chr_bank_0);
            written += dump_window(bridge, sink, Bus::Ppu, 0x0000, CHR_BANK_SIZE)?;
        }
        Ok(written)
    }

    /// Flash PRG: even banks through $8000 first, then odd banks through $C000
    ///
    /// On failure the control register is left in whatever mode was last set.
    fn write_program(&mut self, bridge: &mut dyn Bridge, source: &mut dyn ImageSource, banks: usize)
        -> Result<(), DumpError>
    {
        let image_base = source.stream_position()?;
        self.reset(bridge)?;

        let (first, second) = Self::halves(banks);
        for (control, start, window) in [(CONTROL_SWAP_LOW, 0, 0x0000), (CONTROL_SWAP_HIGH, 1, 0x4000)] {
            self.write_control(bridge, control)?;

            self.select_half(bridge, HALF_FIRST)?;
            self.write_half(bridge, source, image_base, 0, first, start, window)?;

            if second > 0 {
                self.select_half(bridge, HALF_SECOND)?;
                self.write_half(bridge, source, image_base, 1, second, start, window)?;
            }
        }
        Ok(())
    }
}
