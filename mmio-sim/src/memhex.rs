//! memhex32 image loader.
//!
//! The format is line oriented:
//!
//! ```text
//! @20000000        // word address (byte address 0x8000_0000)
//! 00000297
//! 0000_0013        // '_' and ' ' are ignored inside numbers
//! ```
//!
//! Each data line stores one little-endian 32-bit word at the current
//! address and advances it by 4. Anything after the hex digits on a line is
//! ignored, as are lines that start with neither `@` nor a hex digit.

use crate::bus::Bus;
use crate::error::SimError;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Parses the leading hex number of `s`, skipping `_` and ' ' spacers.
fn parse_hex(s: &str) -> Result<u64, String> {
    let digits: String = s
        .chars()
        .take_while(|c| c.is_ascii_hexdigit() || *c == '_' || *c == ' ')
        .filter(char::is_ascii_hexdigit)
        .collect();
    if digits.is_empty() {
        return Err("missing hex number".into());
    }
    u64::from_str_radix(&digits, 16).map_err(|e| format!("bad hex number {digits:?}: {e}"))
}

/// Loads `text` into memory. Returns the number of words written.
pub fn load_memhex_str(bus: &mut Bus, text: &str, origin: &str) -> Result<usize, SimError> {
    let fail = |line: usize, reason: String| SimError::Memhex {
        path: origin.to_string(),
        line,
        reason,
    };
    let mem_base = bus.config.mem_base;
    let mem_end = mem_base + bus.config.mem_size;

    let mut addr: u64 = 0;
    let mut words = 0;

    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        if let Some(rest) = line.strip_prefix('@') {
            let word_addr = parse_hex(rest).map_err(|e| fail(line_num, e))?;
            addr = word_addr
                .checked_mul(4)
                .ok_or_else(|| fail(line_num, format!("address @{word_addr:x} overflows")))?;
            log::trace!("[MEMHEX] addr = {addr:#010x}");
        } else if line.starts_with(|c: char| c.is_ascii_hexdigit()) {
            let value = parse_hex(line).map_err(|e| fail(line_num, e))?;
            let word = u32::try_from(value)
                .map_err(|_| fail(line_num, format!("{value:#x} wider than 32 bits")))?;
            if addr < mem_base || addr.saturating_add(4) > mem_end {
                return Err(fail(
                    line_num,
                    format!(
                        "address {addr:#010x} outside memory {mem_base:#010x}..{mem_end:#010x}"
                    ),
                ));
            }
            bus.write_bytes(addr, &word.to_le_bytes())?;
            addr += 4;
            words += 1;
        }
    }
    Ok(words)
}

/// Loads the image at `path`. A missing file leaves memory zeroed.
pub fn load_memhex(bus: &mut Bus, path: &Path) -> Result<usize, SimError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!(
                "[MEMHEX] {} not found; memory is not initialized",
                path.display()
            );
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };
    log::info!("[MEMHEX] loading {}", path.display());
    let words = load_memhex_str(bus, &text, &path.display().to_string())?;
    log::info!("[MEMHEX] loaded {words} words");
    Ok(words)
}
