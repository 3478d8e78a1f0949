//! GB Memory (Nintendo Power) multi-game cartridge
//!
//! The cart holds a 1MB flash, 128KB of SRAM and a mapper that can expose
//! either the menu, a single game, or the whole flash. Its control registers
//! live at $0120-$013F and only answer with the cartridge chip select held
//! high, so every access here goes through the "unselected" raw requests.
//!
//! Register window:
//! - $0120 command
//! - $0121/$0122 wake-up handshake (AA, 55)
//! - $0125/$0126 write-enable data, or flash address high/low
//! - $0127 flash data
//! - $013F commit strobe (A5)
//!
//! The hidden mapping sector describes which flash region and save slice
//! each game occupies; [`MappingTable`] decodes it.

use std::fmt;
use std::thread;
use std::time::Duration;

use bincode::Decode;
use log::{debug, info, warn};
use thiserror::Error;

use crate::protocol::frame_config;
use crate::request::{Bridge, TransportError};

/// Title of the menu program in bank 0
pub const MENU_TITLE: &str = "NP M-MENU  MENU";

/// Cartridge type the whole-flash view is dumped as (MBC5 + RAM + battery)
pub const ENTIRE_CART_TYPE: u8 = 0x1B;

/// ROM size code of the whole-flash view (64 banks, 1MB)
pub const ENTIRE_ROM_SIZE: u8 = 5;

/// RAM size code of the whole-flash view (4 banks, 32KB)
pub const ENTIRE_RAM_SIZE: u8 = 3;

/// Size of the mapping table at the start of the hidden sector
pub const MAPPING_SIZE: usize = 128;

/// Attempts made waiting for the register window to answer
pub const DETECT_ATTEMPTS: usize = 1000;

const REG_COMMAND: u16 = 0x0120;
const REG_WAKE_1: u16 = 0x0121;
const REG_WAKE_2: u16 = 0x0122;
const REG_DATA_HIGH: u16 = 0x0125;
const REG_DATA_LOW: u16 = 0x0126;
const REG_FLASH_DATA: u16 = 0x0127;
const REG_COMMIT: u16 = 0x013F;

/// What $0120 reads back while the window is open
const WINDOW_ID: u8 = 0x21;

/// Errors raised while talking to the GB Memory mapper
#[derive(Error, Debug)]
pub enum GbmError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("GB Memory registers did not answer after {attempts} attempts")]
    Timeout { attempts: usize },

    #[error("Mapping table decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Mapper commands written to $0120
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Re-enable the register window
    Wake,
    WriteEnableStep1,
    WriteEnableStep2,
    /// Expose the whole flash as one MBC5 image
    MapEntireRom,
    MapMenu,
    /// Close the register window
    Disable,
    /// Pass one byte through to the flash command interface
    WriteToFlash { addr: u16, data: u8 },
    /// Map game `n` without resetting
    MapGame(u8),
}

impl Command {
    fn code(self) -> u8 {
        match self {
            Command::Wake => 0x09,
            Command::WriteEnableStep1 => 0x0A,
            Command::WriteEnableStep2 => 0x02,
            Command::MapEntireRom => 0x04,
            Command::MapMenu => 0x05,
            Command::Disable => 0x08,
            Command::WriteToFlash { .. } => 0x0F,
            Command::MapGame(n) => 0xC0 | (n & 0x3F),
        }
    }
}

/// Delays the mapper needs between steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GbmTiming {
    /// Wait between register window polls
    pub poll_interval: Duration,
    /// Wait after resetting the flash out of the hidden sector
    pub flash_reset_settle: Duration,
}

impl Default for GbmTiming {
    fn default() -> Self {
        GbmTiming {
            poll_interval: Duration::from_millis(1),
            flash_reset_settle: Duration::from_millis(100),
        }
    }
}

/// Decoded mapping sector
#[derive(Debug, Clone, PartialEq, Eq, Decode)]
pub struct MappingTable {
    /// Three-byte mapper setup per game slot
    pub mapper_params: [[u8; 3]; 8],
    pub flash_size: u16,
    pub save_size: u16,
    pub game_code: [u8; 12],
    pub title: [u8; 44],
    pub timestamp: [u8; 18],
    pub kiosk_id: [u8; 8],
    pub write_count: u16,
    pub cart_id: [u8; 8],
    pub padding: [u8; 6],
    pub unknown: u16,
}

impl MappingTable {
    /// Decode the first 128 bytes of the mapping sector
    pub fn decode(raw: &[u8]) -> Result<Self, GbmError> {
        let (table, _) = bincode::decode_from_slice(raw, frame_config())?;
        Ok(table)
    }

    /// Game slots with a mapper entry programmed
    pub fn games(&self) -> impl Iterator<Item = (usize, &[u8; 3])> {
        self.mapper_params
            .iter()
            .enumerate()
            .filter(|(_, params)| **params != [0xFF; 3])
    }
}

fn text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0 || b == 0xFF).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

impl fmt::Display for MappingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "game code: {}", text(&self.game_code))?;
        writeln!(f, "title:     {}", text(&self.title))?;
        writeln!(f, "timestamp: {}", text(&self.timestamp))?;
        writeln!(f, "kiosk:     {}", text(&self.kiosk_id))?;
        writeln!(f, "writes:    {}", self.write_count)?;
        write!(f, "games:     {}", self.games().count())
    }
}

/// Command interface of one GB Memory cartridge
pub struct Gbm<'a> {
    bridge: &'a mut dyn Bridge,
    timing: GbmTiming,
}

impl<'a> Gbm<'a> {
    pub fn new(bridge: &'a mut dyn Bridge) -> Self {
        Gbm::with_timing(bridge, GbmTiming::default())
    }

    pub fn with_timing(bridge: &'a mut dyn Bridge, timing: GbmTiming) -> Self {
        Gbm { bridge, timing }
    }

    fn write(&mut self, addr: u16, data: u8) -> Result<(), TransportError> {
        self.bridge.write_reg_unselected(addr, data)
    }

    /// Issue a mapper command followed by the commit strobe
    pub fn command(&mut self, command: Command) -> Result<(), TransportError> {
        self.write(REG_COMMAND, command.code())?;
        match command {
            Command::Wake => {
                self.write(REG_WAKE_1, 0xAA)?;
                self.write(REG_WAKE_2, 0x55)?;
            }
            Command::WriteEnableStep1 => {
                self.write(REG_DATA_HIGH, 0x62)?;
                self.write(REG_DATA_LOW, 0x04)?;
            }
            Command::WriteToFlash { addr, data } => {
                self.write(REG_DATA_HIGH, (addr >> 8) as u8)?;
                self.write(REG_DATA_LOW, addr as u8)?;
                self.write(REG_FLASH_DATA, data)?;
            }
            _ => {}
        }
        self.write(REG_COMMIT, 0xA5)
    }

    /// Direct write to the mapper's bank registers (no commit strobe)
    pub fn bank(&mut self, addr: u16, data: u8) -> Result<(), TransportError> {
        self.write(addr, data)
    }

    fn flash_sequence(&mut self, cmd: u8) -> Result<(), TransportError> {
        self.command(Command::WriteToFlash { addr: 0x5555, data: 0xAA })?;
        self.command(Command::WriteToFlash { addr: 0x2AAA, data: 0x55 })?;
        self.command(Command::WriteToFlash { addr: 0x5555, data: cmd })
    }

    /// Run `op`, closing the register window if it fails partway
    fn closing<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T, GbmError>) -> Result<T, GbmError> {
        let result = op(self);
        if result.is_err() {
            self.disable_after_error();
        }
        result
    }

    /// Check for the mapper's register window, waking it between polls
    pub fn detect(&mut self) -> Result<(), GbmError> {
        self.closing(Self::poll_window)
    }

    fn poll_window(&mut self) -> Result<(), GbmError> {
        for attempt in 0..DETECT_ATTEMPTS {
            if self.bridge.read_reg(REG_COMMAND)? == WINDOW_ID {
                debug!("GBM: register window answered after {} attempts", attempt + 1);
                self.command(Command::Disable)?;
                return Ok(());
            }
            self.command(Command::Wake)?;
            thread::sleep(self.timing.poll_interval);
        }
        Err(GbmError::Timeout { attempts: DETECT_ATTEMPTS })
    }

    /// Read the raw mapping table from the hidden flash sector
    pub fn read_mapping(&mut self) -> Result<[u8; MAPPING_SIZE], GbmError> {
        self.closing(Self::try_read_mapping)
    }

    fn try_read_mapping(&mut self) -> Result<[u8; MAPPING_SIZE], GbmError> {
        self.command(Command::Wake)?;
        self.command(Command::WriteEnableStep1)?;
        self.command(Command::WriteEnableStep2)?;

        // unlock the hidden sector
        self.bank(0x2100, 0x01)?;
        self.flash_sequence(0x77)?;
        self.flash_sequence(0x77)?;

        let mut sector = [0u8; 256];
        self.bridge.read_raw_unselected(0, &mut sector)?;

        self.reset_flash()?;

        let mut mapping = [0u8; MAPPING_SIZE];
        mapping.copy_from_slice(&sector[..MAPPING_SIZE]);
        Ok(mapping)
    }

    /// Return the flash to read mode and close the window
    fn reset_flash(&mut self) -> Result<(), TransportError> {
        self.command(Command::Wake)?;
        self.bank(0x2100, 0x01)?;
        self.flash_sequence(0xF0)?;
        thread::sleep(self.timing.flash_reset_settle);
        self.command(Command::Disable)
    }

    fn map(&mut self, command: Command) -> Result<(), GbmError> {
        info!("GBM: {:?}", command);
        self.closing(|gbm| {
            gbm.command(Command::Wake)?;
            gbm.command(command)?;
            gbm.command(Command::Disable)?;
            Ok(())
        })
    }

    /// Expose the whole flash as one MBC5 image
    pub fn map_entire_rom(&mut self) -> Result<(), GbmError> {
        self.map(Command::MapEntireRom)
    }

    pub fn map_menu(&mut self) -> Result<(), GbmError> {
        self.map(Command::MapMenu)
    }

    pub fn map_game(&mut self, game: u8) -> Result<(), GbmError> {
        self.map(Command::MapGame(game))
    }

    fn disable_after_error(&mut self) {
        if let Err(e) = self.command(Command::Disable) {
            warn!("GBM: failed to close register window: {}", e);
        }
    }
}
