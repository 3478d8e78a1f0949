//! Cartridge descriptors
//!
//! This module handles the headers that describe a cartridge image: the iNES
//! header of NES dumps, the Game Boy header at $0100-$014F, and the GBA header
//! at $00A0-$00BF. A descriptor is read once at the start of an operation and
//! never changes afterwards.

use std::fmt;
use log::{debug, info};
use thiserror::Error;

use crate::image;
use crate::util;

/// Size of the iNES header
pub const INES_HEADER_SIZE: usize = 16;

/// Size of a PRG ROM unit in the iNES header (16KB)
pub const PRG_ROM_BANK_SIZE: usize = 16 * 1024;

/// Size of a CHR ROM unit in the iNES header (8KB)
pub const CHR_BANK_SIZE: usize = 8 * 1024;

/// iNES magic
pub const INES_MAGIC: [u8; 4] = [0x4E, 0x45, 0x53, 0x1A];

/// Start of the Game Boy cartridge header
const GB_TITLE: usize = 0x0134;

/// End (exclusive) of the Game Boy cartridge header
pub const GB_HEADER_END: usize = 0x0150;

/// Largest Game Boy ROM size code (8MB, 512 banks)
pub const GB_MAX_ROM_SIZE: u8 = 8;

/// Errors that can occur when parsing cartridge headers
#[derive(Error, Debug, PartialEq)]
pub enum HeaderError {
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// Nametable mirroring wired on an NES board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    /// Horizontal mirroring (vertical arrangement of nametables)
    Horizontal,

    /// Vertical mirroring (horizontal arrangement of nametables)
    Vertical,

    /// Four-screen mirroring (no mirroring)
    FourScreen,
}

/// NES cartridge as described by an iNES header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NesDescriptor {
    /// iNES mapper number
    pub mapper: u8,

    /// PRG ROM size in 16KB units
    pub prg_banks: u8,

    /// CHR ROM size in 8KB units (0 means the board uses CHR RAM)
    pub chr_banks: u8,

    /// Mirroring mode
    pub mirroring: Mirroring,

    /// Whether battery-backed PRG RAM is present
    pub has_battery: bool,
}

impl NesDescriptor {
    /// Build a descriptor from the operator's `mirror` code
    /// (bit 0: vertical, bit 1: battery-backed PRG RAM)
    pub fn from_mirror_code(mapper: u8, prg_banks: u8, chr_banks: u8, mirror: u8) -> Self {
        NesDescriptor {
            mapper,
            prg_banks,
            chr_banks,
            mirroring: if mirror & 0x01 != 0 { Mirroring::Vertical } else { Mirroring::Horizontal },
            has_battery: mirror & 0x02 != 0,
        }
    }

    /// Parse an iNES header
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < INES_HEADER_SIZE || data[0..4] != INES_MAGIC {
            return Err(HeaderError::InvalidHeader("missing iNES magic".into()));
        }

        let flags6 = data[6];
        let flags7 = data[7];

        let mirroring = if (flags6 & 0x08) != 0 {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        if (flags6 & 0x04) != 0 {
            return Err(HeaderError::InvalidHeader("trainer present".into()));
        }

        let descriptor = NesDescriptor {
            mapper: (flags7 & 0xF0) | (flags6 >> 4),
            prg_banks: data[4],
            chr_banks: data[5],
            mirroring,
            has_battery: (flags6 & 0x02) != 0,
        };
        debug!("iNES header: {:?}", descriptor);
        Ok(descriptor)
    }

    /// PRG ROM size in bytes
    pub fn prg_size(&self) -> usize {
        self.prg_banks as usize * PRG_ROM_BANK_SIZE
    }

    /// CHR ROM size in bytes
    pub fn chr_size(&self) -> usize {
        self.chr_banks as usize * CHR_BANK_SIZE
    }
}

impl fmt::Display for NesDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mapper: {}, PRG ROM: {}KB, CHR ROM: {}KB, Mirroring: {:?}{}",
            self.mapper,
            self.prg_size() / 1024,
            self.chr_size() / 1024,
            self.mirroring,
            if self.has_battery { " battery" } else { "" }
        )
    }
}

/// Save RAM layout of a Game Boy cartridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamLayout {
    pub banks: usize,
    pub bank_size: usize,
}

impl RamLayout {
    pub fn size(&self) -> usize {
        self.banks * self.bank_size
    }
}

/// Game Boy cartridge header ($0134-$014F)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GbHeader {
    pub title: String,
    pub cgb: u8,
    pub licensee: [u8; 2],
    pub sgb: u8,
    pub cart_type: u8,
    pub rom_size: u8,
    pub ram_size: u8,
    pub destination: u8,
    pub old_licensee: u8,
    pub version: u8,
    pub header_checksum: u8,
    pub global_checksum: u16,
}

impl GbHeader {
    /// Parse the header from the first bytes of bank 0
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < GB_HEADER_END {
            return Err(HeaderError::InvalidHeader(format!(
                "need {} bytes, got {}",
                GB_HEADER_END,
                data.len()
            )));
        }

        let computed = image::gb_header_checksum(data);
        if computed != data[0x014D] {
            return Err(HeaderError::InvalidHeader(format!(
                "header checksum ${:02X} does not match ${:02X}",
                data[0x014D], computed
            )));
        }

        let rom_size = data[0x0148];
        if rom_size > GB_MAX_ROM_SIZE {
            return Err(HeaderError::InvalidHeader(format!("ROM size code ${:02X}", rom_size)));
        }

        let mut title = &data[GB_TITLE..0x0143];
        if let Some(end) = title.iter().position(|&b| b == 0) {
            title = &title[..end];
        }
        let title = String::from_utf8_lossy(title).trim().to_string();

        let header = GbHeader {
            title,
            cgb: data[0x0143],
            licensee: [data[0x0144], data[0x0145]],
            sgb: data[0x0146],
            cart_type: data[0x0147],
            rom_size,
            ram_size: data[0x0149],
            destination: data[0x014A],
            old_licensee: data[0x014B],
            version: data[0x014C],
            header_checksum: data[0x014D],
            global_checksum: u16::from_be_bytes([data[0x014E], data[0x014F]]),
        };
        info!("{}", header);
        Ok(header)
    }

    /// Whether the cartridge only runs on a Game Boy Color
    pub fn is_cgb_only(&self) -> bool {
        self.cgb == 0xC0
    }

    /// Number of 16KB ROM banks
    pub fn rom_banks(&self) -> usize {
        2 << self.rom_size
    }

    /// File name stem for dumps of this cartridge
    pub fn file_stem(&self) -> String {
        util::file_stem(&self.title)
    }

    /// File extension for the ROM image
    pub fn rom_extension(&self) -> &'static str {
        if self.is_cgb_only() { "gbc" } else { "gb" }
    }
}

impl fmt::Display for GbHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "title: {}, CGB: ${:02X}, licensee: {:02X}{:02X}, SGB: ${:02X}, type: ${:02X}, \
             ROM size: ${:02X}, RAM size: ${:02X}, version: ${:02X}, checksum: ${:04X}",
            self.title, self.cgb, self.licensee[0], self.licensee[1], self.sgb,
            self.cart_type, self.rom_size, self.ram_size, self.version, self.global_checksum
        )
    }
}

/// GBA cartridge header ($00A0-$00BF)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GbaHeader {
    pub title: String,
    pub game_code: String,
    pub maker_code: String,
    pub complement: u8,
}

impl GbaHeader {
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < 0xC0 {
            return Err(HeaderError::InvalidHeader("GBA header truncated".into()));
        }
        let computed = data[0xA0..=0xBC]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_sub(b))
            .wrapping_sub(0x19);
        if computed != data[0xBD] {
            return Err(HeaderError::InvalidHeader(format!(
                "complement ${:02X} does not match ${:02X}",
                data[0xBD], computed
            )));
        }
        let text = |range: std::ops::Range<usize>| {
            let bytes = &data[range];
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).trim().to_string()
        };
        Ok(GbaHeader {
            title: text(0xA0..0xAC),
            game_code: text(0xAC..0xB0),
            maker_code: text(0xB0..0xB2),
            complement: data[0xBD],
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A bank 0 with a valid header for `title`
    pub(crate) fn gb_bank0(title: &str, cart_type: u8, rom_size: u8, ram_size: u8) -> Vec<u8> {
        let mut data = vec![0u8; 0x4000];
        data[GB_TITLE..GB_TITLE + title.len()].copy_from_slice(title.as_bytes());
        data[0x0147] = cart_type;
        data[0x0148] = rom_size;
        data[0x0149] = ram_size;
        data[0x014D] = image::gb_header_checksum(&data);
        data
    }

    #[test]
    fn ines_roundtrip_through_header_synthesis() {
        let descriptor = NesDescriptor::from_mirror_code(4, 32, 32, 1);
        let header = image::ines_header(&descriptor);
        assert_eq!(NesDescriptor::parse(&header).unwrap(), descriptor);
    }

    #[test]
    fn ines_rejects_bad_magic() {
        let header = [0u8; 16];
        assert!(NesDescriptor::parse(&header).is_err());
    }

    #[test]
    fn gb_header_fields() {
        let bank0 = gb_bank0("POKEMON RED", 0x13, 5, 3);
        let header = GbHeader::parse(&bank0).unwrap();
        assert_eq!(header.title, "POKEMON RED");
        assert_eq!(header.cart_type, 0x13);
        assert_eq!(header.rom_banks(), 64);
        assert_eq!(header.rom_extension(), "gb");
    }

    #[test]
    fn gb_title_stops_at_nul_and_keeps_gbm_menu_title() {
        let bank0 = gb_bank0("NP M-MENU  MENU", 0x1B, 5, 3);
        assert_eq!(GbHeader::parse(&bank0).unwrap().title, "NP M-MENU  MENU");

        let mut bank0 = gb_bank0("ZELDA", 0x03, 4, 2);
        bank0[0x0143] = 0xC0;
        bank0[0x014D] = image::gb_header_checksum(&bank0);
        let header = GbHeader::parse(&bank0).unwrap();
        assert_eq!(header.title, "ZELDA");
        assert_eq!(header.rom_extension(), "gbc");
    }

    #[test]
    fn gb_file_stem_is_a_plain_name() {
        let header = GbHeader::parse(&gb_bank0("../SAVE/X", 0x03, 1, 2)).unwrap();
        assert_eq!(header.title, "../SAVE/X");
        assert_eq!(header.file_stem(), "___SAVE_X");
        assert_eq!(GbHeader::parse(&gb_bank0("", 0x00, 0, 0)).unwrap().file_stem(), "cartridge");
    }

    #[test]
    fn gb_header_checksum_mismatch_is_invalid() {
        let mut bank0 = gb_bank0("TETRIS", 0x00, 0, 0);
        bank0[0x014D] ^= 0xFF;
        assert!(matches!(GbHeader::parse(&bank0), Err(HeaderError::InvalidHeader(_))));
    }

    #[test]
    fn gba_header_complement() {
        let mut data = vec![0u8; 0xC0];
        data[0xA0..0xA7].copy_from_slice(b"POKEMON");
        data[0xAC..0xB0].copy_from_slice(b"AXVE");
        data[0xB0..0xB2].copy_from_slice(b"01");
        let sum = data[0xA0..=0xBC].iter().fold(0u8, |acc, &b| acc.wrapping_sub(b));
        data[0xBD] = sum.wrapping_sub(0x19);
        let header = GbaHeader::parse(&data).unwrap();
        assert_eq!(header.title, "POKEMON");
        assert_eq!(header.game_code, "AXVE");
    }
}
