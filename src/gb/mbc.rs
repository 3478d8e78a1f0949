//! Game Boy memory bank controllers
//!
//! Register writes go out through the raw bus with the cartridge selected.
//! Only what a dumper needs is modelled: ROM bank select at $4000-$7FFF and
//! the save RAM window at $A000-$BFFF.

use log::debug;

use crate::cartridge::RamLayout;
use crate::request::{Bridge, TransportError};
use crate::util::format_addr;

/// Cartridge type codes that carry an MBC2 (512 x 4-bit RAM built in)
const MBC2_TYPES: [u8; 2] = [0x05, 0x06];

/// Size of the built-in MBC2 RAM as it reads back on the bus
const MBC2_RAM_SIZE: usize = 0x200;

const RAM_BANK_SIZE: usize = 0x2000;

/// Bank controller family, chosen once from the header's cartridge type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mbc {
    None,
    Mbc1,
    Mbc2,
    Mbc5,
    Mbc6,
}

impl Mbc {
    /// Map a cartridge type code ($0147) onto the controller that banks it
    ///
    /// MBC3 and anything unrecognised is driven as MBC5; the ROM bank register
    /// at $2100 is compatible, and MBC3 takes the $3000 write as a bank select
    /// that $2100 then overrides.
    pub fn from_cart_type(cart_type: u8) -> Self {
        match cart_type {
            0x00 => Mbc::None,
            0x01..=0x04 => Mbc::Mbc1,
            0x05 | 0x06 => Mbc::Mbc2,
            0x20 => Mbc::Mbc6,
            _ => Mbc::Mbc5,
        }
    }

    /// Map 16KB ROM bank `bank` into $4000-$7FFF
    pub fn select_rom_bank(self, bridge: &mut dyn Bridge, bank: usize) -> Result<(), TransportError> {
        match self {
            Mbc::None => Ok(()),
            Mbc::Mbc1 => {
                bridge.write_raw_byte(0x6000, 0)?;
                bridge.write_raw_byte(0x4000, (bank >> 5) as u8)?;
                bridge.write_raw_byte(0x2000, (bank & 0x1F) as u8)
            }
            Mbc::Mbc2 => bridge.write_raw_byte(0x2100, bank as u8),
            Mbc::Mbc5 => {
                // bit 8 first: on MBC3 $3000 hits the same register as $2100
                bridge.write_raw_byte(0x3000, (bank >> 8) as u8)?;
                bridge.write_raw_byte(0x2100, bank as u8)
            }
            Mbc::Mbc6 => {
                // two independent 8KB halves
                let half = (bank << 1) as u8;
                bridge.write_raw_byte(0x2000, half)?;
                bridge.write_raw_byte(0x2800, 0)?;
                bridge.write_raw_byte(0x3000, half.wrapping_add(1))?;
                bridge.write_raw_byte(0x3800, 0)
            }
        }
    }

    /// Open the save RAM window
    pub fn enable_ram(self, bridge: &mut dyn Bridge) -> Result<(), TransportError> {
        debug!("{:?}: RAM enable", self);
        bridge.write_raw_byte(0x0000, 0x0A)?;
        if self == Mbc::Mbc1 {
            // RAM banking mode
            bridge.write_raw_byte(0x6000, 1)?;
        }
        Ok(())
    }

    /// Map 8KB RAM bank `bank` into $A000-$BFFF
    pub fn select_ram_bank(self, bridge: &mut dyn Bridge, bank: usize) -> Result<(), TransportError> {
        match self {
            Mbc::None | Mbc::Mbc2 => Ok(()),
            Mbc::Mbc1 | Mbc::Mbc5 => {
                debug!("{:?}: RAM bank {} at {}", self, bank, format_addr(0x4000));
                bridge.write_raw_byte(0x4000, bank as u8)
            }
            Mbc::Mbc6 => {
                let half = (bank << 1) as u8;
                bridge.write_raw_byte(0x0400, half)?;
                bridge.write_raw_byte(0x0800, half.wrapping_add(1))
            }
        }
    }

    pub fn disable_ram(self, bridge: &mut dyn Bridge) -> Result<(), TransportError> {
        bridge.write_raw_byte(0x0000, 0x00)
    }
}

/// Save RAM layout for a cartridge type and RAM size code ($0149)
pub fn ram_layout(cart_type: u8, ram_size: u8) -> Option<RamLayout> {
    if MBC2_TYPES.contains(&cart_type) {
        return Some(RamLayout { banks: 1, bank_size: MBC2_RAM_SIZE });
    }
    let (banks, bank_size) = match ram_size {
        0x01 => (1, 0x800),
        0x02 => (1, RAM_BANK_SIZE),
        0x03 => (4, RAM_BANK_SIZE),
        0x04 => (16, RAM_BANK_SIZE),
        0x05 => (8, RAM_BANK_SIZE),
        _ => return None,
    };
    Some(RamLayout { banks, bank_size })
}
