//! Test-control window.
//!
//! Bare-metal test programs end a run by storing `(test_num << 1) | 1` to
//! `tohost`. Test number 0 is a pass; anything else names the failing test.

/// Verdict latched from a `tohost` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Pass,
    Fail(u64),
}

impl HostStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail(_) => 1,
        }
    }
}

pub struct ToHost {
    addr: u64,
    value: u64,
    status: Option<HostStatus>,
}

impl ToHost {
    pub fn new(addr: u64) -> Self {
        Self {
            addr,
            value: 0,
            status: None,
        }
    }

    pub fn status(&self) -> Option<HostStatus> {
        self.status
    }

    /// Loads anywhere in the window are side-effect free.
    pub fn load(&self, addr: u64) -> u64 {
        if addr == self.addr {
            self.value
        } else {
            0
        }
    }

    /// Non-speculative store. Only an odd value that differs from the last
    /// one written to `tohost` latches a verdict; the first verdict sticks.
    pub fn store(&mut self, addr: u64, value: u64) {
        if addr != self.addr {
            return;
        }
        let changed = value != self.value;
        self.value = value;

        if !changed || value & 1 == 0 || self.status.is_some() {
            return;
        }
        let test_num = value >> 1;
        let status = if test_num == 0 {
            log::info!("[TOHOST] PASS");
            HostStatus::Pass
        } else {
            log::error!("[TOHOST] FAIL on test {test_num}");
            HostStatus::Fail(test_num)
        };
        self.status = Some(status);
    }
}
