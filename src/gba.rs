//! GBA cartridges on the 32-bit bus bridge
//!
//! ROM is addressed in 16-bit words on the multiplexed AD bus, so the
//! request value is the byte address shifted right by one. Save SRAM sits
//! behind the second chip select and is read a byte at a time.

use std::io::{Read, Write};
use log::{debug, info};

use crate::cartridge::GbaHeader;
use crate::mappers::DumpError;
use crate::protocol::tuna32::{Request, PACKET_SIZE};
use crate::request::WideLink;

/// ROM size read when none is given (32Mbit)
pub const DEFAULT_ROM_SIZE: usize = 4 * 1024 * 1024;

/// SRAM size read when none is given
pub const DEFAULT_SRAM_SIZE: usize = 32 * 1024;

/// Bytes covering the cartridge header
const HEADER_SIZE: usize = 0xC0;

/// Read and validate the header at the start of ROM
pub fn read_header<S: Read + Write>(link: &mut WideLink<S>) -> Result<GbaHeader, DumpError> {
    let mut buf = [0u8; HEADER_SIZE];
    link.read(Request::Read16, 0, &mut buf)?;
    let header = GbaHeader::parse(&buf)?;
    info!("GBA: {} [{}] maker {}", header.title, header.game_code, header.maker_code);
    Ok(header)
}

/// Dump `size` bytes of ROM in packet-sized word reads
pub fn dump_rom<S: Read + Write>(link: &mut WideLink<S>, sink: &mut dyn Write, size: usize)
    -> Result<u64, DumpError>
{
    let mut buf = vec![0u8; PACKET_SIZE.min(size)];
    for addr in (0..size).step_by(PACKET_SIZE) {
        let chunk = &mut buf[..PACKET_SIZE.min(size - addr)];
        debug!("GBA: ROM ${:07X}", addr);
        link.read(Request::Read16, (addr >> 1) as u32, chunk)?;
        sink.write_all(chunk)?;
    }
    Ok(size as u64)
}

/// Dump `size` bytes of SRAM through the second chip select
pub fn dump_sram<S: Read + Write>(link: &mut WideLink<S>, sink: &mut dyn Write, size: usize)
    -> Result<u64, DumpError>
{
    let mut buf = vec![0u8; PACKET_SIZE.min(size)];
    for addr in (0..size).step_by(PACKET_SIZE) {
        let chunk = &mut buf[..PACKET_SIZE.min(size - addr)];
        link.read(Request::Read8Cs2, addr as u32, chunk)?;
        sink.write_all(chunk)?;
    }
    Ok(size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::WidePort;

    #[test]
    fn rom_reads_are_word_addressed() {
        let mut link = WideLink::new(WidePort::default());
        let mut sink = Vec::new();
        let n = dump_rom(&mut link, &mut sink, 0x40000).unwrap();
        assert_eq!(n, 0x40000);
        assert_eq!(sink.len(), 0x40000);

        let values: Vec<u32> = link.get_ref().frames.iter().map(|f| f.value).collect();
        assert_eq!(values, vec![0x00000, 0x08000, 0x10000, 0x18000]);
        assert!(link.get_ref().frames.iter().all(|f| f.request == Request::Read16 as u32 && f.length == 0x10000));
    }

    #[test]
    fn sram_uses_second_chip_select() {
        let mut link = WideLink::new(WidePort::with_fill(|frame| vec![0x5A; frame.length as usize]));
        let mut sink = Vec::new();
        dump_sram(&mut link, &mut sink, 0x8000).unwrap();
        let frames = &link.get_ref().frames;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request, Request::Read8Cs2 as u32);
        assert_eq!(frames[0].length, 0x8000);
        assert!(sink.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn header_from_rom() {
        let mut rom = vec![0u8; HEADER_SIZE];
        rom[0xA0..0xA7].copy_from_slice(b"POKEMON");
        rom[0xAC..0xB0].copy_from_slice(b"AXVE");
        rom[0xB0..0xB2].copy_from_slice(b"01");
        rom[0xB2] = 0x96;
        rom[0xBD] = rom[0xA0..=0xBC].iter().fold(0u8, |acc, &b| acc.wrapping_sub(b)).wrapping_sub(0x19);

        let mut link = WideLink::new(WidePort::with_fill(move |frame| rom[..frame.length as usize].to_vec()));
        let header = read_header(&mut link).unwrap();
        assert_eq!(header.game_code, "AXVE");
        assert_eq!(header.maker_code, "01");
    }
}
