use crate::error::SimError;
use std::env;
use std::path::PathBuf;

pub const MEM_BASE: u64 = 0x8000_0000;
pub const MEM_SIZE: u64 = 0x1000_0000;
pub const UART_BASE: u64 = 0x6010_0000;
pub const UART_SIZE: u64 = 0x0000_1000;
pub const UART_STRIDE: u8 = 4;
pub const TEST_CTRL_BASE: u64 = 0x6FFF_0000;
pub const TEST_CTRL_SIZE: u64 = 0x0001_0000;
pub const TOHOST_OFFSET: u64 = 0x10;

/// Environment variable naming the memhex32 image.
pub const MEMHEX_ENV: &str = "MEMHEX32";
pub const DEFAULT_MEMHEX: &str = "test.memhex32";

/// Address map and device parameters for one simulation instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub mem_base: u64,
    pub mem_size: u64,
    pub uart_base: u64,
    pub uart_size: u64,
    /// Distance in bytes between UART registers (4 or 8).
    pub uart_stride: u8,
    pub test_ctrl_base: u64,
    pub test_ctrl_size: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mem_base: MEM_BASE,
            mem_size: MEM_SIZE,
            uart_base: UART_BASE,
            uart_size: UART_SIZE,
            uart_stride: UART_STRIDE,
            test_ctrl_base: TEST_CTRL_BASE,
            test_ctrl_size: TEST_CTRL_SIZE,
        }
    }
}

impl SimConfig {
    pub fn tohost_addr(&self) -> u64 {
        self.test_ctrl_base + TOHOST_OFFSET
    }

    /// Checks the invariants the router relies on: non-empty windows that
    /// do not wrap or overlap, and a supported UART stride.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.uart_stride != 4 && self.uart_stride != 8 {
            return Err(SimError::Config(format!(
                "UART stride must be 4 or 8, got {}",
                self.uart_stride
            )));
        }
        if TOHOST_OFFSET + 8 > self.test_ctrl_size {
            return Err(SimError::Config(
                "test-control window too small for tohost".into(),
            ));
        }
        let windows = [
            ("memory", self.mem_base, self.mem_size),
            ("uart", self.uart_base, self.uart_size),
            ("test-control", self.test_ctrl_base, self.test_ctrl_size),
        ];
        for (name, base, size) in windows {
            if size == 0 || base.checked_add(size).is_none() {
                return Err(SimError::Config(format!(
                    "{name} window {base:#x}+{size:#x} is empty or wraps"
                )));
            }
        }
        for (i, &(name_a, base_a, size_a)) in windows.iter().enumerate() {
            for &(name_b, base_b, size_b) in &windows[i + 1..] {
                if base_a < base_b + size_b && base_b < base_a + size_a {
                    return Err(SimError::Config(format!(
                        "{name_a} and {name_b} windows overlap"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Image path from `MEMHEX32`, or the fixed fallback.
pub fn memhex_path() -> PathBuf {
    env::var_os(MEMHEX_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEMHEX))
}
