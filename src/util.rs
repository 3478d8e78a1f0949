//! Formatting helpers for log output and file names

use std::fmt::Write;

/// Combine two 8-bit values into a 16-bit value (little-endian)
#[inline]
pub fn combine_bytes(low: u8, high: u8) -> u16 {
    u16::from_le_bytes([low, high])
}

/// Hexdump of a memory region, one 16-byte row per line
pub fn hexdump(data: &[u8], start_addr: u32) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let addr = start_addr + (i * 16) as u32;
        let _ = write!(out, "{:04X}: ", addr);

        for (j, byte) in chunk.iter().enumerate() {
            let _ = write!(out, "{:02X} ", byte);
            if j == 7 {
                out.push(' ');
            }
        }

        // Padding for incomplete lines
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        if chunk.len() <= 8 {
            out.push(' ');
        }

        out.push_str(" |");
        for &byte in chunk {
            out.push(if (0x20..0x7F).contains(&byte) { byte as char } else { '.' });
        }
        out.push_str("|\n");
    }
    out
}

/// Format a 16-bit address as a hex string
pub fn format_addr(addr: u16) -> String {
    format!("${:04X}", addr)
}

/// File name stem for a cartridge title
///
/// Anything that could act as a path separator or escape the working
/// directory becomes `_`; an empty result falls back to "cartridge".
pub fn file_stem(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_') { c } else { '_' })
        .collect();
    if stem.is_empty() { "cartridge".to_string() } else { stem }
}

/// Format a byte count the way the dump summaries print it
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{} bytes", bytes)
    }
}
