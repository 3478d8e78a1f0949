//! JEDEC flash programming for Game Boy flash carts
//!
//! Commands are the usual unlock-cycle sequences (AA to the first command
//! address, 55 to the second, then the command byte). Completion is detected
//! by data polling: DQ7 reads back the complement of the programmed bit until
//! the operation finishes, and DQ5 rises when the chip's internal timer runs
//! out. A DQ5 report gets one more status read before it counts as a failure.
//!
//! Sectors are 64KB. Any write that starts on, or runs across, a 64KB
//! boundary erases the sector beginning there first. Offsets past the first
//! 16KB are reached through the switchable $4000-$7FFF window, so the bank
//! holding them has to be selected already; the erase command and its status
//! polls go through the same window as the sector's first byte.

use std::io::Read;
use log::{debug, info};
use thiserror::Error;

use crate::request::{Bridge, TransportError};
use super::mbc::Mbc;
use super::ROM_BANK_SIZE;

const SECTOR_SIZE: usize = 0x10000;

const CMD_RESET: u8 = 0xF0;
const CMD_AUTOSELECT: u8 = 0x90;
const CMD_ERASE_SETUP: u8 = 0x80;
const CMD_SECTOR_ERASE: u8 = 0x30;
const CMD_PROGRAM: u8 = 0xA0;

const STATUS_DONE: u8 = 0x80;
const STATUS_TIMEOUT: u8 = 0x20;

/// Errors raised while programming flash
#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unsupported flash device: manufacturer ${manufacturer:02X}, device ${device:02X}")]
    UnsupportedDevice { manufacturer: u8, device: u8 },

    #[error("Sector erase timed out at ${addr:06X}")]
    EraseTimeout { addr: usize },

    #[error("Byte program timed out at ${addr:06X}")]
    ProgramTimeout { addr: usize },

    #[error("Image I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Data bus width the flash chip is wired for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    /// x8 device
    Byte,
    /// x16 device running in byte mode
    Word,
}

/// Command addresses and autoselect codes of one flash family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashProfile {
    pub name: &'static str,
    pub manufacturer: u8,
    pub device: u8,
    pub command_addr1: u16,
    pub command_addr2: u16,
    pub bus_width: BusWidth,
}

/// Known devices, tried in order during detection
pub const FLASH_PROFILES: &[FlashProfile] = &[
    FlashProfile {
        name: "AMD-compatible x8",
        manufacturer: 0x01,
        device: 0xA4,
        command_addr1: 0x555,
        command_addr2: 0x2AA,
        bus_width: BusWidth::Byte,
    },
    FlashProfile {
        name: "Micron-compatible x16 (byte mode)",
        manufacturer: 0x20,
        device: 0xC4,
        command_addr1: 0xAAA,
        command_addr2: 0x555,
        bus_width: BusWidth::Word,
    },
];

impl FlashProfile {
    /// Address the autoselect device code is read from
    fn device_addr(&self) -> u16 {
        match self.bus_width {
            BusWidth::Byte => 0x0001,
            BusWidth::Word => 0x0002,
        }
    }
}

/// Cartridge bus address a flash byte is programmed through
fn bus_addr(pa: usize) -> u16 {
    let mut va = (pa & 0x3FFF) as u16;
    if pa >= ROM_BANK_SIZE {
        va |= 0x4000;
    }
    va
}

/// Programmer bound to a detected chip
pub struct FlashProgrammer<'a> {
    bridge: &'a mut dyn Bridge,
    profile: &'static FlashProfile,
}

impl<'a> FlashProgrammer<'a> {
    /// Identify the chip by trying each known profile's autoselect sequence
    pub fn detect(bridge: &'a mut dyn Bridge) -> Result<Self, FlashError> {
        let mut codes = (0, 0);
        for profile in FLASH_PROFILES {
            codes = autoselect(bridge, profile)?;
            debug!("flash: {} autoselect read ${:02X}/${:02X}", profile.name, codes.0, codes.1);
            if codes == (profile.manufacturer, profile.device) {
                info!("flash: {} (${:02X}/${:02X})", profile.name, codes.0, codes.1);
                return Ok(FlashProgrammer { bridge, profile });
            }
        }
        Err(FlashError::UnsupportedDevice { manufacturer: codes.0, device: codes.1 })
    }

    pub fn profile(&self) -> &'static FlashProfile {
        self.profile
    }

    /// Program `data` at flash offset `addr`, erasing every sector it starts
    ///
    /// The bank containing `addr` must already be mapped at $4000.
    pub fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), FlashError> {
        self.reset()?;

        let mut pa = addr;
        let mut rest = data;
        while !rest.is_empty() {
            if pa % SECTOR_SIZE == 0 {
                self.erase_sector(pa)?;
            }
            let run = rest.len().min(SECTOR_SIZE - pa % SECTOR_SIZE);
            let (chunk, tail) = rest.split_at(run);
            self.program(pa, chunk)?;
            pa += run;
            rest = tail;
        }

        self.reset()
    }

    /// Program a whole image, switching 16KB banks through the MBC5 register
    pub fn write_image(&mut self, source: &mut dyn Read, size: usize) -> Result<(), FlashError> {
        let mut buf = vec![0u8; ROM_BANK_SIZE];
        for bank in 0..size.div_ceil(ROM_BANK_SIZE) {
            if bank >= 1 {
                Mbc::Mbc5.select_rom_bank(self.bridge, bank)?;
            }
            let len = ROM_BANK_SIZE.min(size - bank * ROM_BANK_SIZE);
            source.read_exact(&mut buf[..len])?;
            info!("flash: bank {:02X}", bank);
            self.write(bank * ROM_BANK_SIZE, &buf[..len])?;
        }
        Ok(())
    }

    fn command(&mut self, cmd: u8) -> Result<(), TransportError> {
        unlock(self.bridge, self.profile)?;
        self.bridge.write_reg(self.profile.command_addr1, cmd)
    }

    fn reset(&mut self) -> Result<(), FlashError> {
        self.bridge.write_reg(self.profile.command_addr1, CMD_RESET)?;
        Ok(())
    }

    fn erase_sector(&mut self, pa: usize) -> Result<(), FlashError> {
        let va = bus_addr(pa);
        debug!("flash: erasing sector at ${:06X} (${:04X})", pa, va);
        self.command(CMD_ERASE_SETUP)?;
        unlock(self.bridge, self.profile)?;
        self.bridge.write_reg(va, CMD_SECTOR_ERASE)?;

        if self.poll(va, STATUS_DONE, STATUS_DONE)? {
            Ok(())
        } else {
            Err(FlashError::EraseTimeout { addr: pa })
        }
    }

    fn program(&mut self, start: usize, data: &[u8]) -> Result<(), FlashError> {
        for (i, &byte) in data.iter().enumerate() {
            // erased cells already read back as FF
            if byte == 0xFF {
                continue;
            }
            let pa = start + i;
            let va = bus_addr(pa);
            self.command(CMD_PROGRAM)?;
            self.bridge.write_reg(va, byte)?;

            if !self.poll(va, STATUS_DONE, byte & STATUS_DONE)? {
                return Err(FlashError::ProgramTimeout { addr: pa });
            }
        }
        Ok(())
    }

    /// Data-poll until `status & mask == expected`; false once DQ5 is reported twice
    fn poll(&mut self, addr: u16, mask: u8, expected: u8) -> Result<bool, TransportError> {
        loop {
            let status = self.bridge.read_reg(addr)?;
            if status & mask == expected {
                return Ok(true);
            }
            if status & STATUS_TIMEOUT != 0 {
                let status = self.bridge.read_reg(addr)?;
                return Ok(status & mask == expected);
            }
        }
    }
}

fn unlock(bridge: &mut dyn Bridge, profile: &FlashProfile) -> Result<(), TransportError> {
    bridge.write_reg(profile.command_addr1, 0xAA)?;
    bridge.write_reg(profile.command_addr2, 0x55)
}

/// Manufacturer and device codes as seen with `profile`'s command addresses
fn autoselect(bridge: &mut dyn Bridge, profile: &FlashProfile) -> Result<(u8, u8), TransportError> {
    bridge.write_reg(profile.command_addr1, CMD_RESET)?;
    unlock(bridge, profile)?;
    bridge.write_reg(profile.command_addr1, CMD_AUTOSELECT)?;

    let manufacturer = bridge.read_reg(0x0000)?;
    let device = bridge.read_reg(profile.device_addr())?;

    bridge.write_reg(profile.command_addr1, CMD_RESET)?;
    Ok((manufacturer, device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;
    use crate::protocol::tuna::{Frame, Request};
    use crate::request::Link;
    use crate::testing::{MockPort, Recorded};

    /// Chip that answers autoselect with `codes` and reports every status
    /// poll as complete
    fn chip(codes: (u8, u8), device_addr: u16) -> MockPort {
        MockPort::with_responder(move |frame: &Frame, history: &[Recorded]| {
            let last = history.iter().rev().find(|r| r.is(Request::RawWriteLo));
            if last.map(|r| r.data()) == Some(CMD_AUTOSELECT) {
                return match frame.value {
                    0x0000 => vec![codes.0],
                    v if v == device_addr => vec![codes.1],
                    _ => vec![0],
                };
            }
            // status: echo the last programmed byte, or DQ7 set after erase
            let data = last.map(|r| r.data()).unwrap_or(0xFF);
            if data == CMD_SECTOR_ERASE { vec![STATUS_DONE] } else { vec![data] }
        })
    }

    fn amd() -> MockPort {
        chip((0x01, 0xA4), 0x0001)
    }

    fn writes(port: &MockPort) -> Vec<(u16, u8)> {
        port.of(Request::RawWriteLo).iter().map(|r| (r.frame.value, r.data())).collect()
    }

    #[test]
    fn detects_amd_part() {
        let mut link = Link::new(amd());
        let flash = FlashProgrammer::detect(&mut link).unwrap();
        assert_eq!(flash.profile().manufacturer, 0x01);
        drop(flash);
        assert_eq!(
            writes(link.get_ref()),
            vec![(0x555, 0xF0), (0x555, 0xAA), (0x2AA, 0x55), (0x555, 0x90), (0x555, 0xF0)]
        );
        let reads: Vec<u16> = link.get_ref().of(Request::RawReadLo).iter().map(|r| r.frame.value).collect();
        assert_eq!(reads, vec![0x0000, 0x0001]);
    }

    #[test]
    fn detects_micron_part_on_second_attempt() {
        let mut link = Link::new(chip((0x20, 0xC4), 0x0002));
        let flash = FlashProgrammer::detect(&mut link).unwrap();
        assert_eq!(flash.profile().bus_width, BusWidth::Word);
        drop(flash);
        assert!(writes(link.get_ref()).contains(&(0xAAA, 0x90)));
    }

    #[test]
    fn unknown_part_is_rejected() {
        let mut link = Link::new(chip((0xC2, 0x11), 0x0001));
        let err = FlashProgrammer::detect(&mut link).err().unwrap();
        assert!(matches!(err, FlashError::UnsupportedDevice { manufacturer: 0xC2, .. }));
    }

    #[test]
    fn erased_bytes_are_skipped() {
        let mut link = Link::new(amd());
        let mut flash = FlashProgrammer::detect(&mut link).unwrap();
        flash.write(0x0100, &[0xFF, 0x12, 0xFF, 0xFF, 0x34]).unwrap();
        drop(flash);

        let all = writes(link.get_ref());
        let after_detect = &all[5..];
        // reset, two programmed bytes of four writes each, reset
        assert_eq!(after_detect.len(), 1 + 2 * 4 + 1);
        assert_eq!(&after_detect[1..5], &[(0x555, 0xAA), (0x2AA, 0x55), (0x555, 0xA0), (0x0101, 0x12)]);
        assert_eq!(after_detect[8], (0x0104, 0x34));
        assert_eq!(after_detect.last(), Some(&(0x555, 0xF0)));
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Read,
        Autoselect,
        Program,
        EraseSetup,
    }

    /// x8 AMD part behind an MBC5, modelled at the bus level
    struct FlashCart {
        rom: Vec<u8>,
        bank: usize,
        unlock: u8,
        mode: Mode,
        /// (bus address, selected bank, physical sector) of each erase
        erases: Vec<(u16, usize, usize)>,
    }

    impl FlashCart {
        fn new(size: usize) -> Self {
            FlashCart { rom: vec![0x00; size], bank: 1, unlock: 0, mode: Mode::Read, erases: Vec::new() }
        }

        fn physical(&self, addr: u16) -> usize {
            let addr = addr as usize;
            let pa = if addr < ROM_BANK_SIZE { addr } else { self.bank * ROM_BANK_SIZE + addr - ROM_BANK_SIZE };
            pa % self.rom.len()
        }

        fn observe(&mut self, record: &Recorded) {
            match record.frame.request() {
                Some(Request::RawWrite) => match record.frame.value {
                    0x21 => self.bank = (self.bank & !0xFF) | record.data() as usize,
                    0x30 => self.bank = (self.bank & 0xFF) | ((record.data() as usize & 1) << 8),
                    _ => {}
                },
                Some(Request::RawWriteLo) => self.bus_write(record.frame.value, record.data()),
                _ => {}
            }
        }

        fn bus_write(&mut self, addr: u16, data: u8) {
            if self.mode == Mode::Program {
                let pa = self.physical(addr);
                self.rom[pa] &= data;
                self.mode = Mode::Read;
                return;
            }
            if data == CMD_RESET {
                self.mode = Mode::Read;
                self.unlock = 0;
                return;
            }
            match (self.unlock, addr, data) {
                (0, 0x555, 0xAA) => self.unlock = 1,
                (1, 0x2AA, 0x55) => self.unlock = 2,
                (2, _, CMD_SECTOR_ERASE) if self.mode == Mode::EraseSetup => {
                    let sector = self.physical(addr) / SECTOR_SIZE;
                    self.rom[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE].fill(0xFF);
                    self.erases.push((addr, self.bank, sector));
                    self.unlock = 0;
                    self.mode = Mode::Read;
                }
                (2, 0x555, cmd) => {
                    self.unlock = 0;
                    self.mode = match cmd {
                        CMD_AUTOSELECT => Mode::Autoselect,
                        CMD_PROGRAM => Mode::Program,
                        CMD_ERASE_SETUP => Mode::EraseSetup,
                        _ => Mode::Read,
                    };
                }
                _ => self.unlock = 0,
            }
        }

        fn bus_read(&self, addr: u16) -> u8 {
            match (self.mode, addr) {
                (Mode::Autoselect, 0x0000) => 0x01,
                (Mode::Autoselect, 0x0001) => 0xA4,
                _ => self.rom[self.physical(addr)],
            }
        }
    }

    #[test]
    fn image_spanning_two_sectors_lands_intact() {
        let cart = Rc::new(RefCell::new(FlashCart::new(2 * SECTOR_SIZE)));
        let reader = Rc::clone(&cart);
        let writer = Rc::clone(&cart);
        let port = MockPort::with_responder(move |frame, _| vec![reader.borrow().bus_read(frame.value)])
            .with_observer(move |record| writer.borrow_mut().observe(record));

        let mut image = vec![0xFFu8; 2 * SECTOR_SIZE];
        for (i, byte) in image.iter_mut().enumerate().step_by(0x100) {
            *byte = (i >> 8) as u8 & 0x7F;
        }

        let mut link = Link::new(port);
        let mut flash = FlashProgrammer::detect(&mut link).unwrap();
        flash.write_image(&mut Cursor::new(image.clone()), image.len()).unwrap();

        let state = cart.borrow();
        // sector 1 is erased through the window, with bank 4 mapped
        assert_eq!(state.erases, vec![(0x0000, 1, 0), (0x4000, 4, 1)]);
        let mismatches = state.rom.iter().zip(&image).filter(|(a, b)| a != b).count();
        assert_eq!(mismatches, 0);
    }

    #[test]
    fn program_address_translation() {
        assert_eq!(bus_addr(0x0123), 0x0123);
        assert_eq!(bus_addr(0x4123), 0x4123);
        assert_eq!(bus_addr(0x1C123), 0x4123);
        // first byte of a sector past the first
        assert_eq!(bus_addr(0x30000), 0x4000);
    }

    #[test]
    fn dq5_gets_one_retry_then_fails() {
        let mut link = Link::new(MockPort::with_responder(|frame, history| {
            let autoselect = history.iter().rev().find(|r| r.is(Request::RawWriteLo)).map(|r| r.data()) == Some(0x90);
            match (autoselect, frame.value) {
                (true, 0x0000) => vec![0x01],
                (true, 0x0001) => vec![0xA4],
                // DQ7 never matches, DQ5 set
                _ => vec![0x20],
            }
        }));
        let mut flash = FlashProgrammer::detect(&mut link).unwrap();
        let err = flash.write(0x0010, &[0x80]).unwrap_err();
        assert!(matches!(err, FlashError::ProgramTimeout { addr: 0x0010 }));
        drop(flash);
        // two autoselect reads, then the poll and its retry
        assert_eq!(link.get_ref().of(Request::RawReadLo).len(), 2 + 2);
    }

    #[test]
    fn erase_timeout() {
        let mut link = Link::new(MockPort::with_responder(|frame, history| {
            let autoselect = history.iter().rev().find(|r| r.is(Request::RawWriteLo)).map(|r| r.data()) == Some(0x90);
            match (autoselect, frame.value) {
                (true, 0x0000) => vec![0x01],
                (true, 0x0001) => vec![0xA4],
                _ => vec![0x20],
            }
        }));
        let mut flash = FlashProgrammer::detect(&mut link).unwrap();
        let err = flash.write(0x10000, &[0x00]).unwrap_err();
        assert!(matches!(err, FlashError::EraseTimeout { addr: 0x10000 }));
        drop(flash);
        let erase = writes(link.get_ref()).into_iter().find(|&(_, d)| d == CMD_SECTOR_ERASE);
        assert_eq!(erase, Some((0x4000, CMD_SECTOR_ERASE)));
    }

    #[test]
    fn image_write_selects_banks() {
        let mut link = Link::new(amd());
        let mut flash = FlashProgrammer::detect(&mut link).unwrap();
        let image = vec![0xFFu8; 3 * ROM_BANK_SIZE];
        flash.write_image(&mut Cursor::new(image), 3 * ROM_BANK_SIZE).unwrap();
        drop(flash);
        let banks: Vec<(u16, u8)> = link
            .get_ref()
            .of(Request::RawWrite)
            .iter()
            .map(|r| (r.frame.value, r.data()))
            .collect();
        assert_eq!(banks, vec![(0x30, 0), (0x21, 1), (0x30, 0), (0x21, 2)]);
    }
}
