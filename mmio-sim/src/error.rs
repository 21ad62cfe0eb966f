use crate::dram::DramError;
use thiserror::Error;

/// Conditions that end the simulation.
///
/// Everything recoverable is reported to the pipeline through a response
/// status instead; a `SimError` means the model's own invariants were broken
/// (or its inputs were unusable) and the run cannot continue.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("bad request size code {code} (inum {inum})")]
    BadSizeCode { inum: u64, code: u8 },

    #[error("store buffer overflow: capacity {capacity} reached by inum {inum}")]
    StoreBufferOverflow { inum: u64, capacity: usize },

    #[error("store buffer tag mismatch: completing inum {inum}, head holds inum {head}")]
    TagMismatch { inum: u64, head: u64 },

    #[error("fence at inum {inum} with {pending} pending store(s)")]
    FenceWithPendingStores { inum: u64, pending: usize },

    #[error("backing memory access out of bounds: {0}")]
    OutOfBounds(#[from] DramError),

    #[error("memhex {path}:{line}: {reason}")]
    Memhex {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("trace line {line}: {reason}")]
    Trace { line: usize, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
