//! Store buffer with load forwarding.
//!
//! Writes to memory (STORE, successful SC, AMO results) are parked here until
//! the pipeline retires or squashes the instruction that produced them. Loads
//! see parked bytes as if they had already been written, so program order is
//! preserved even though memory itself only changes at commit.
//!
//! ## Ordering
//!
//! Entries are appended in `inum` order and resolved strictly from the head.
//! A completion for an `inum` older than the head is a no-op (the
//! instruction never produced a write); one newer than the head means the
//! pipeline skipped a write and is fatal.

use crate::dram::Dram;
use crate::error::SimError;

pub const STORE_BUF_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreBufEntry {
    pub inum: u64,
    /// Offset into the memory window.
    pub offset: u64,
    /// 1..=8
    pub size: usize,
    /// Little-endian payload; bytes past `size` are zero.
    pub data: [u8; 8],
}

impl StoreBufEntry {
    pub fn new(inum: u64, offset: u64, size: usize, value: u64) -> Self {
        let mut data = value.to_le_bytes();
        data[size.min(8)..].fill(0);
        Self {
            inum,
            offset,
            size: size.min(8),
            data,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Whether this entry writes any byte of `[offset, offset + size)`.
    pub fn overlaps(&self, offset: u64, size: usize) -> bool {
        overlap(offset, size, self.offset, self.size).is_some()
    }
}

/// Overlap of a load range `[x, x + x_size)` with a store range
/// `[s, s + s_size)`, as `(offset_in_load, offset_in_store, len)`.
fn overlap(x: u64, x_size: usize, s: u64, s_size: usize) -> Option<(usize, usize, usize)> {
    let (jx, js, n) = if x <= s {
        let jx = s - x;
        if jx >= x_size as u64 {
            return None;
        }
        let jx = jx as usize;
        (jx, 0, s_size.min(x_size - jx))
    } else {
        let js = x - s;
        if js >= s_size as u64 {
            return None;
        }
        let js = js as usize;
        (0, js, (s_size - js).min(x_size))
    };
    (n > 0).then_some((jx, js, n))
}

pub struct StoreBuffer {
    entries: [StoreBufEntry; STORE_BUF_CAPACITY],
    head: usize,
    len: usize,
}

impl StoreBuffer {
    pub fn new() -> Self {
        Self {
            entries: [StoreBufEntry::default(); STORE_BUF_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<&StoreBufEntry> {
        (self.len > 0).then(|| &self.entries[self.head])
    }

    /// Pending entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &StoreBufEntry> + '_ {
        (0..self.len).map(move |j| &self.entries[(self.head + j) % STORE_BUF_CAPACITY])
    }

    pub fn push(&mut self, entry: StoreBufEntry) -> Result<(), SimError> {
        if self.len >= STORE_BUF_CAPACITY {
            log::error!("[SB] overflow enqueuing I_{}\n{}", entry.inum, self.dump());
            return Err(SimError::StoreBufferOverflow {
                inum: entry.inum,
                capacity: STORE_BUF_CAPACITY,
            });
        }
        let ix = (self.head + self.len) % STORE_BUF_CAPACITY;
        self.entries[ix] = entry;
        self.len += 1;
        log::debug!(
            "[SB] enqueued I_{} at slot {ix}: {}B @{:#x} data {}",
            entry.inum,
            entry.size,
            entry.offset,
            hex::encode(entry.bytes())
        );
        Ok(())
    }

    /// Reads `size` bytes at `offset` from memory, overlaid with every
    /// pending write, oldest to newest.
    pub fn load(&self, mem: &Dram, offset: u64, size: usize) -> Result<u64, SimError> {
        let size = size.min(8);
        let mut bytes = [0u8; 8];
        mem.read_bytes(offset, &mut bytes[..size])?;

        for entry in self.iter() {
            if let Some((jx, js, n)) = overlap(offset, size, entry.offset, entry.size) {
                bytes[jx..jx + n].copy_from_slice(&entry.data[js..js + n]);
            }
        }
        Ok(u64::from_le_bytes(bytes))
    }

    /// Resolves the head entry for instruction `inum`: writes it to memory
    /// when `commit`, drops it otherwise.
    pub fn drain(&mut self, mem: &mut Dram, inum: u64, commit: bool) -> Result<(), SimError> {
        let Some(head) = self.head().copied() else {
            log::trace!("[SB] I_{inum} completes with empty buffer");
            return Ok(());
        };

        if inum < head.inum {
            log::trace!("[SB] I_{inum} has no pending write (head I_{})", head.inum);
            return Ok(());
        }
        if inum > head.inum {
            log::error!("[SB] tag mismatch for I_{inum}\n{}", self.dump());
            return Err(SimError::TagMismatch {
                inum,
                head: head.inum,
            });
        }

        if commit {
            mem.write_bytes(head.offset, head.bytes())?;
            log::debug!("[SB] committed I_{inum} from slot {}", self.head);
        } else {
            log::debug!("[SB] discarded I_{inum} from slot {}", self.head);
        }
        self.head = (self.head + 1) % STORE_BUF_CAPACITY;
        self.len -= 1;
        Ok(())
    }

    /// One line per pending entry, for fatal-error diagnostics.
    pub fn dump(&self) -> String {
        let mut out = format!("  store buffer: head {} len {}", self.head, self.len);
        for (j, entry) in self.iter().enumerate() {
            let ix = (self.head + j) % STORE_BUF_CAPACITY;
            out.push_str(&format!(
                "\n    [{ix}] I_{} {}B @{:#x} data {}",
                entry.inum,
                entry.size,
                entry.offset,
                hex::encode(entry.bytes())
            ));
        }
        out
    }
}

impl Default for StoreBuffer {
    fn default() -> Self {
        Self::new()
    }
}
