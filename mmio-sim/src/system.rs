//! The pipeline-facing entry points.
//!
//! A pipeline model drives one [`MemSystem`] with three calls per cycle at
//! most: [`MemSystem::req_rsp`] for each memory request it issues,
//! [`MemSystem::store_complete`] for each instruction it retires or squashes,
//! and [`MemSystem::tick`].

use crate::bus::Bus;
use crate::config::SimConfig;
use crate::error::SimError;
use crate::memhex;
use crate::req::{size_from_code, Client, MemOp, MemRequest, MemResponse, RawRequest, RSP_BYTES};
use crate::tohost::HostStatus;
use crate::uart::CharSource;
use std::io::Write;
use std::path::Path;

pub struct MemSystem {
    pub bus: Bus,
}

impl MemSystem {
    pub fn new(
        config: SimConfig,
        input: Box<dyn CharSource>,
        output: Box<dyn Write>,
    ) -> Result<Self, SimError> {
        Ok(Self {
            bus: Bus::new(config, input, output)?,
        })
    }

    pub fn load_memhex(&mut self, path: &Path) -> Result<usize, SimError> {
        memhex::load_memhex(&mut self.bus, path)
    }

    /// Decodes a wire request. A bad size code is fatal; an unknown op or
    /// client yields `Ok(None)` and is answered with `ERROR`.
    pub fn decode(raw: &RawRequest) -> Result<Option<MemRequest>, SimError> {
        let size = size_from_code(raw.size_code).ok_or(SimError::BadSizeCode {
            inum: raw.inum,
            code: raw.size_code,
        })?;
        let (Some(op), Some(client)) = (MemOp::from_code(raw.op), Client::from_code(raw.client))
        else {
            log::warn!(
                "[MMIO] I_{} unknown op {:#04x} or client {} at {:#010x}",
                raw.inum,
                raw.op,
                raw.client,
                raw.addr
            );
            return Ok(None);
        };
        Ok(Some(MemRequest {
            inum: raw.inum,
            op,
            size,
            addr: raw.addr,
            client,
            wdata: raw.wdata_u64(),
        }))
    }

    pub fn request(&mut self, raw: &RawRequest) -> Result<MemResponse, SimError> {
        match Self::decode(raw)? {
            Some(req) => self.bus.handle(&req),
            None => Ok(MemResponse::error()),
        }
    }

    /// Services one request and returns the encoded response: a 4-byte
    /// status followed by 8 bytes of read data.
    pub fn req_rsp(&mut self, raw: &RawRequest) -> Result<[u8; RSP_BYTES], SimError> {
        Ok(self.request(raw)?.to_bytes())
    }

    /// Retires (`commit == true`) or squashes instruction `inum`.
    pub fn store_complete(&mut self, inum: u64, commit: bool) -> Result<(), SimError> {
        self.bus.store_complete(inum, commit)
    }

    pub fn tick(&mut self, tick_num: u64) {
        self.bus.uart.tick(tick_num);
    }

    /// Rising edge of the UART interrupt.
    pub fn uart_irq(&mut self) -> bool {
        self.bus.uart.irq()
    }

    /// Pass/fail verdict, once a test program has written one to `tohost`.
    pub fn halt(&self) -> Option<HostStatus> {
        self.bus.tohost.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::NoInput;

    fn make_system() -> MemSystem {
        let config = SimConfig {
            mem_size: 0x4000,
            ..SimConfig::default()
        };
        MemSystem::new(config, Box::new(NoInput), Box::new(std::io::sink())).unwrap()
    }

    #[test]
    fn test_bad_size_code_is_fatal() {
        let mut sys = make_system();
        let raw = RawRequest::new(1, MemOp::Load.code(), 4, 0x8000_0000, 1, 0);
        assert!(matches!(
            sys.req_rsp(&raw),
            Err(SimError::BadSizeCode { inum: 1, code: 4 })
        ));
    }

    #[test]
    fn test_unknown_op_and_client_are_errors() {
        let mut sys = make_system();
        let bad_op = RawRequest::new(1, 0x1B, 2, 0x8000_0000, 1, 0);
        assert_eq!(&sys.req_rsp(&bad_op).unwrap()[..4], &[2, 0, 0, 0]);
        let bad_client = RawRequest::new(1, MemOp::Load.code(), 2, 0x8000_0000, 3, 0);
        assert_eq!(&sys.req_rsp(&bad_client).unwrap()[..4], &[2, 0, 0, 0]);
    }

    #[test]
    fn test_wire_round_trip() {
        let mut sys = make_system();
        let wdata = 0x0102_0304_0506_0708;
        let store = RawRequest::new(1, MemOp::Store.code(), 3, 0x8000_0008, 1, wdata);
        assert_eq!(sys.req_rsp(&store).unwrap(), [0; RSP_BYTES]);

        let load = RawRequest::new(2, MemOp::Load.code(), 1, 0x8000_000A, 1, 0);
        let rsp = sys.req_rsp(&load).unwrap();
        assert_eq!(&rsp[..4], &[0, 0, 0, 0]);
        assert_eq!(&rsp[4..], &[0x06, 0x05, 0, 0, 0, 0, 0, 0]);

        sys.store_complete(1, true).unwrap();
        assert_eq!(sys.bus.dram.load(8, 8).unwrap(), 0x0102_0304_0506_0708);
    }
}
