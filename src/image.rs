//! Image assembly
//!
//! Header synthesis and checksums over the byte stream the cartridge drivers
//! produce. Checksums are plain byte sums; the header fields that hold the
//! checksum itself are either skipped or replaced by fixed values first.

use crate::cartridge::{Mirroring, NesDescriptor, INES_HEADER_SIZE, INES_MAGIC};
use crate::util::combine_bytes;

/// How one header byte is treated while summing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// The byte at this offset is left out of the sum
    Skip(usize),
    /// The byte at this offset counts as the given value
    Substitute(usize, u8),
}

impl Exclusion {
    fn offset(&self) -> usize {
        match *self {
            Exclusion::Skip(offset) | Exclusion::Substitute(offset, _) => offset,
        }
    }
}

/// Game Boy global checksum field ($014E-$014F)
pub const GB_GLOBAL_CHECKSUM: [Exclusion; 2] = [Exclusion::Skip(0x014E), Exclusion::Skip(0x014F)];

/// Streaming byte sum that honours a set of exclusions
///
/// Offsets are absolute positions in the image, so chunks may arrive in any
/// size as long as each one is tagged with where it starts.
#[derive(Debug, Clone)]
pub struct Checksum<'a> {
    exclusions: &'a [Exclusion],
    sum: u32,
}

impl<'a> Checksum<'a> {
    pub fn new(exclusions: &'a [Exclusion]) -> Self {
        Checksum { exclusions, sum: 0 }
    }

    /// Add `chunk`, whose first byte sits at `offset` in the image
    pub fn update(&mut self, offset: usize, chunk: &[u8]) {
        self.sum = chunk
            .iter()
            .map(|&b| b as u32)
            .fold(self.sum, |acc, b| acc.wrapping_add(b));

        let end = offset + chunk.len();
        for exclusion in self.exclusions {
            let at = exclusion.offset();
            if at < offset || at >= end {
                continue;
            }
            self.sum = self.sum.wrapping_sub(chunk[at - offset] as u32);
            if let Exclusion::Substitute(_, value) = *exclusion {
                self.sum = self.sum.wrapping_add(value as u32);
            }
        }
    }

    pub fn value(&self) -> u32 {
        self.sum
    }
}

/// Sum of all bytes with the given exclusions applied
pub fn compute_checksum(bytes: &[u8], exclusions: &[Exclusion]) -> u32 {
    let mut checksum = Checksum::new(exclusions);
    checksum.update(0, bytes);
    checksum.value()
}

/// Game Boy global checksum (low 16 bits of the sum)
pub fn gb_global_checksum(bytes: &[u8]) -> u16 {
    (compute_checksum(bytes, &GB_GLOBAL_CHECKSUM) & 0xFFFF) as u16
}

/// Game Boy header checksum over $0134-$014C
pub fn gb_header_checksum(bytes: &[u8]) -> u8 {
    bytes[0x0134..=0x014C]
        .iter()
        .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
}

/// SNES checksum report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnesChecksum {
    pub sum: u16,
    pub complement: u16,
    pub stored_sum: u16,
    pub stored_complement: u16,
}

impl SnesChecksum {
    pub fn is_valid(&self) -> bool {
        self.sum == self.stored_sum && self.complement == self.stored_complement
    }
}

/// SNES checksum; the complement/checksum pair counts as FF FF 00 00
///
/// Returns `None` when the image is too short to hold the header.
pub fn snes_checksum(bytes: &[u8], hirom: bool) -> Option<SnesChecksum> {
    let addr = if hirom { 0xFFDC } else { 0x7FDC };
    if bytes.len() < addr + 4 {
        return None;
    }
    let exclusions = [
        Exclusion::Substitute(addr, 0xFF),
        Exclusion::Substitute(addr + 1, 0xFF),
        Exclusion::Substitute(addr + 2, 0x00),
        Exclusion::Substitute(addr + 3, 0x00),
    ];
    let sum = (compute_checksum(bytes, &exclusions) & 0xFFFF) as u16;
    Some(SnesChecksum {
        sum,
        complement: sum ^ 0xFFFF,
        stored_sum: combine_bytes(bytes[addr + 2], bytes[addr + 3]),
        stored_complement: combine_bytes(bytes[addr], bytes[addr + 1]),
    })
}

/// 16-byte iNES header for a dump
pub fn ines_header(descriptor: &NesDescriptor) -> [u8; INES_HEADER_SIZE] {
    let mut header = [0u8; INES_HEADER_SIZE];
    header[0..4].copy_from_slice(&INES_MAGIC);
    header[4] = descriptor.prg_banks;
    header[5] = descriptor.chr_banks;

    let mut flags6 = descriptor.mapper << 4;
    match descriptor.mirroring {
        Mirroring::Horizontal => {}
        Mirroring::Vertical => flags6 |= 0x01,
        Mirroring::FourScreen => flags6 |= 0x08,
    }
    if descriptor.has_battery {
        flags6 |= 0x02;
    }
    header[6] = flags6;
    header[7] = descriptor.mapper & 0xF0;
    header
}
