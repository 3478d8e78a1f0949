//! Game Boy cartridges on the raw bus
//!
//! The bridge exposes the cartridge edge directly: `RAW_READ`/`RAW_WRITE`
//! address 256-byte pages of the 16-bit cartridge bus. Bank 0 is always at
//! $0000-$3FFF, the switchable ROM bank at $4000-$7FFF and save RAM at
//! $A000-$BFFF.
//!
//! [`GameBoy`] dumps and restores ordinary cartridges. Flash carts are
//! programmed through [`flash::FlashProgrammer`] and the GB Memory multi-cart
//! is driven by [`gbm::Gbm`].

pub mod flash;
pub mod gbm;
mod mbc;

pub use mbc::{ram_layout, Mbc};

use std::io::{Read, Write};
use log::{debug, info};

use crate::cartridge::{GbHeader, HeaderError, RamLayout, GB_MAX_ROM_SIZE};
use crate::image::{Checksum, GB_GLOBAL_CHECKSUM};
use crate::mappers::DumpError;
use crate::protocol::tuna::PACKET_SIZE;
use crate::request::Bridge;

/// Size of one switchable ROM bank
pub const ROM_BANK_SIZE: usize = 0x4000;

/// Base of the save RAM window
const RAM_BASE: u16 = 0xA000;

/// Result of a ROM dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomDump {
    /// Bytes written to the sink
    pub written: u64,
    /// Global checksum over the dumped image
    pub checksum: u16,
}

/// Read and validate the header in bank 0
pub fn read_header(bridge: &mut dyn Bridge) -> Result<GbHeader, DumpError> {
    let mut buf = vec![0u8; PACKET_SIZE];
    bridge.read_raw(0, &mut buf)?;
    Ok(GbHeader::parse(&buf)?)
}

/// Dumper for one cartridge, bound to its bank controller
pub struct GameBoy {
    mbc: Mbc,
}

impl GameBoy {
    pub fn new(mbc: Mbc) -> Self {
        GameBoy { mbc }
    }

    /// Driver for the cartridge type in a header
    pub fn for_header(header: &GbHeader) -> Self {
        GameBoy::new(Mbc::from_cart_type(header.cart_type))
    }

    pub fn mbc(&self) -> Mbc {
        self.mbc
    }

    /// Dump `2 << rom_size` banks of ROM
    ///
    /// The first pass reads banks 0 and 1 together through $0000-$7FFF; every
    /// later bank is switched into $4000-$7FFF.
    pub fn dump_rom(&self, bridge: &mut dyn Bridge, sink: &mut dyn Write, rom_size: u8)
        -> Result<RomDump, DumpError>
    {
        if rom_size > GB_MAX_ROM_SIZE {
            return Err(HeaderError::InvalidHeader(format!("ROM size code ${:02X}", rom_size)).into());
        }
        let banks = 2usize << rom_size;
        let mut checksum = Checksum::new(&GB_GLOBAL_CHECKSUM);
        let mut buf = vec![0u8; PACKET_SIZE];
        let mut offset = 0usize;

        info!("{:?}: dumping {} ROM banks", self.mbc, banks);
        for bank in 1..banks {
            self.mbc.select_rom_bank(bridge, bank)?;
            let start = if bank == 1 { 0x0000 } else { ROM_BANK_SIZE };
            debug!("{:?}: bank {:02X}", self.mbc, bank);

            for addr in (start..2 * ROM_BANK_SIZE).step_by(PACKET_SIZE) {
                bridge.read_raw(addr as u32, &mut buf)?;
                sink.write_all(&buf)?;
                checksum.update(offset, &buf);
                offset += buf.len();
            }
        }

        Ok(RomDump {
            written: offset as u64,
            checksum: (checksum.value() & 0xFFFF) as u16,
        })
    }

    /// Dump save RAM bank by bank
    pub fn dump_ram(&self, bridge: &mut dyn Bridge, sink: &mut dyn Write, layout: RamLayout)
        -> Result<u64, DumpError>
    {
        self.mbc.enable_ram(bridge)?;
        let mut buf = vec![0u8; PACKET_SIZE.min(layout.bank_size)];
        for bank in 0..layout.banks {
            self.mbc.select_ram_bank(bridge, bank)?;
            for offset in (0..layout.bank_size).step_by(buf.len()) {
                bridge.read_raw(RAM_BASE as u32 + offset as u32, &mut buf)?;
                sink.write_all(&buf)?;
            }
        }
        self.mbc.disable_ram(bridge)?;
        Ok(layout.size() as u64)
    }

    /// Restore save RAM from `source`
    pub fn write_ram(&self, bridge: &mut dyn Bridge, source: &mut dyn Read, layout: RamLayout)
        -> Result<u64, DumpError>
    {
        self.mbc.enable_ram(bridge)?;
        let mut buf = vec![0u8; PACKET_SIZE.min(layout.bank_size)];
        for bank in 0..layout.banks {
            self.mbc.select_ram_bank(bridge, bank)?;
            for offset in (0..layout.bank_size).step_by(buf.len()) {
                source.read_exact(&mut buf)?;
                bridge.write_raw(RAM_BASE + offset as u16, &buf)?;
            }
        }
        self.mbc.disable_ram(bridge)?;
        Ok(layout.size() as u64)
    }
}
