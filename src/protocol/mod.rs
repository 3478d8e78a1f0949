//! Bridge firmware protocol constants
//!
//! Each Tuna bridge firmware speaks its own opcode table and frame layout.
//! Every driver names the table it talks to explicitly, so two tools aimed at
//! the same adapter can never disagree on an opcode.
//!
//! - [`tuna`]: 8-bit bus bridge (NES / Game Boy), 8-byte frames, 1KB packets
//! - [`tuna32`]: 32-bit bus bridge (GBA), 16-byte frames, 64KB packets

pub mod tuna;
pub mod tuna32;

use bincode::config::{self, Config};

/// Wire configuration shared by every frame: little-endian, fixed-width ints
#[inline]
pub fn frame_config() -> impl Config {
    config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}
