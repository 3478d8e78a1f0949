//! tunaflash - cartridge dumper and flasher for the Tuna serial bridge
//!
//! The bridge firmware exposes a cartridge edge connector over a serial
//! link. This crate frames requests for it and drives the bank switching of
//! each supported board:
//!
//! - NES: NROM, SxROM (MMC1), TxROM (MMC3), AxROM and bare flash
//! - Game Boy: MBC1/2/5/6 carts, flash carts and the GB Memory multi-cart
//! - GBA through the 32-bit bus bridge

pub mod cartridge;
pub mod gb;
pub mod gba;
pub mod image;
pub mod mappers;
pub mod protocol;
pub mod request;
pub mod util;

#[cfg(test)]
mod testing;
