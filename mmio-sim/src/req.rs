//! Request/response vocabulary shared by the pipeline and the memory model.
//!
//! The wire codes here must stay in step with the pipeline's request
//! encoding: op codes reuse the AMO `funct5` values, with three spare codes
//! for FENCE, LOAD and STORE.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes in an encoded response: 4 status bytes then 8 data bytes.
pub const RSP_BYTES: usize = 12;

/// Bytes of write payload carried on the wire.
pub const WDATA_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemOp {
    Fence,
    Load,
    Store,
    Lr,
    Sc,
    AmoSwap,
    AmoAdd,
    AmoXor,
    AmoAnd,
    AmoOr,
    AmoMin,
    AmoMax,
    AmoMinu,
    AmoMaxu,
}

impl MemOp {
    pub fn from_code(code: u8) -> Option<Self> {
        let op = match code {
            0x1D => Self::Fence,
            0x1E => Self::Load,
            0x1F => Self::Store,
            0x02 => Self::Lr,
            0x03 => Self::Sc,
            0x01 => Self::AmoSwap,
            0x00 => Self::AmoAdd,
            0x04 => Self::AmoXor,
            0x0C => Self::AmoAnd,
            0x08 => Self::AmoOr,
            0x10 => Self::AmoMin,
            0x14 => Self::AmoMax,
            0x18 => Self::AmoMinu,
            0x1C => Self::AmoMaxu,
            _ => return None,
        };
        Some(op)
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Fence => 0x1D,
            Self::Load => 0x1E,
            Self::Store => 0x1F,
            Self::Lr => 0x02,
            Self::Sc => 0x03,
            Self::AmoSwap => 0x01,
            Self::AmoAdd => 0x00,
            Self::AmoXor => 0x04,
            Self::AmoAnd => 0x0C,
            Self::AmoOr => 0x08,
            Self::AmoMin => 0x10,
            Self::AmoMax => 0x14,
            Self::AmoMinu => 0x18,
            Self::AmoMaxu => 0x1C,
        }
    }

    pub fn is_amo(self) -> bool {
        matches!(
            self,
            Self::AmoSwap
                | Self::AmoAdd
                | Self::AmoXor
                | Self::AmoAnd
                | Self::AmoOr
                | Self::AmoMin
                | Self::AmoMax
                | Self::AmoMinu
                | Self::AmoMaxu
        )
    }

    /// LR, SC and AMOs: the ops that require natural alignment.
    pub fn is_atomic(self) -> bool {
        matches!(self, Self::Lr | Self::Sc) || self.is_amo()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fence => "FENCE",
            Self::Load => "LOAD",
            Self::Store => "STORE",
            Self::Lr => "LR",
            Self::Sc => "SC",
            Self::AmoSwap => "AMOSWAP",
            Self::AmoAdd => "AMOADD",
            Self::AmoXor => "AMOXOR",
            Self::AmoAnd => "AMOAND",
            Self::AmoOr => "AMOOR",
            Self::AmoMin => "AMOMIN",
            Self::AmoMax => "AMOMAX",
            Self::AmoMinu => "AMOMINU",
            Self::AmoMaxu => "AMOMAXU",
        }
    }
}

/// Maps a request size code (0..=3) to a byte count.
pub fn size_from_code(code: u8) -> Option<usize> {
    match code {
        0 => Some(1),
        1 => Some(2),
        2 => Some(4),
        3 => Some(8),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Client {
    /// Instruction fetch.
    IFetch,
    /// Data path; requests may be speculative.
    Data,
    /// Issued at retirement, never speculative.
    MmioRetired,
}

impl Client {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::IFetch),
            1 => Some(Self::Data),
            2 => Some(Self::MmioRetired),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::IFetch => 0,
            Self::Data => 1,
            Self::MmioRetired => 2,
        }
    }

    pub fn is_speculative(self) -> bool {
        self == Self::Data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RspStatus {
    Ok,
    Misaligned,
    Error,
    Deferred,
}

impl RspStatus {
    pub fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Misaligned => 1,
            Self::Error => 2,
            Self::Deferred => 3,
        }
    }
}

/// A decoded bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRequest {
    pub inum: u64,
    pub op: MemOp,
    pub size: usize,
    pub addr: u64,
    pub client: Client,
    /// Write payload, little-endian; only the low `size` bytes are meaningful.
    pub wdata: u64,
}

impl MemRequest {
    /// `wdata` truncated to the request width.
    pub fn wdata_sized(&self) -> u64 {
        self.wdata & size_mask(self.size)
    }
}

impl fmt::Display for MemRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "I_{} {} {}B addr:{:08x} client:{:?}",
            self.inum,
            self.op.name(),
            self.size,
            self.addr,
            self.client
        )?;
        if !matches!(self.op, MemOp::Fence | MemOp::Load | MemOp::Lr) {
            write!(f, " wdata:{:#010x}", self.wdata_sized())?;
        }
        Ok(())
    }
}

/// All-ones mask covering `size` bytes.
pub fn size_mask(size: usize) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemResponse {
    pub status: RspStatus,
    /// Read data, zero-extended.
    pub data: u64,
}

impl MemResponse {
    pub fn ok(data: u64) -> Self {
        Self {
            status: RspStatus::Ok,
            data,
        }
    }

    pub fn error() -> Self {
        Self {
            status: RspStatus::Error,
            data: 0,
        }
    }

    pub fn misaligned() -> Self {
        Self {
            status: RspStatus::Misaligned,
            data: 0,
        }
    }

    pub fn deferred(echo: u64) -> Self {
        Self {
            status: RspStatus::Deferred,
            data: echo,
        }
    }

    pub fn to_bytes(&self) -> [u8; RSP_BYTES] {
        let mut out = [0u8; RSP_BYTES];
        out[..4].copy_from_slice(&self.status.code().to_le_bytes());
        out[4..].copy_from_slice(&self.data.to_le_bytes());
        out
    }
}

/// A request exactly as the pipeline hands it over, before any decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRequest {
    pub inum: u64,
    pub op: u8,
    pub size_code: u8,
    pub addr: u64,
    pub client: u8,
    pub wdata: [u8; WDATA_BYTES],
}

impl RawRequest {
    pub fn new(inum: u64, op: u8, size_code: u8, addr: u64, client: u8, wdata: u64) -> Self {
        let mut bytes = [0u8; WDATA_BYTES];
        bytes[..8].copy_from_slice(&wdata.to_le_bytes());
        Self {
            inum,
            op,
            size_code,
            addr,
            client,
            wdata: bytes,
        }
    }

    /// Low 8 bytes of the payload as a little-endian word.
    pub fn wdata_u64(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.wdata[..8]);
        u64::from_le_bytes(word)
    }
}
