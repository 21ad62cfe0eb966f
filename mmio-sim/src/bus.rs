use crate::config::SimConfig;
use crate::dram::Dram;
use crate::error::SimError;
use crate::req::{size_mask, MemOp, MemRequest, MemResponse};
use crate::store_buffer::{StoreBufEntry, StoreBuffer};
use crate::tohost::ToHost;
use crate::uart::{CharSource, Uart16550};
use std::io::Write;

/// Which unit services an address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Mem,
    Uart,
    TestCtrl,
    /// Not fully inside any single window.
    Wild,
}

/// Address range held by an outstanding LR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    /// The LR that took it.
    inum: u64,
    offset: u64,
    size: usize,
}

/// Address-space router. Owns every piece of simulated state: memory, the
/// store buffer in front of it, and the devices.
pub struct Bus {
    pub config: SimConfig,
    pub dram: Dram,
    pub store_buf: StoreBuffer,
    pub uart: Uart16550,
    pub tohost: ToHost,
    reservation: Option<Reservation>,
}

impl Bus {
    pub fn new(
        config: SimConfig,
        input: Box<dyn CharSource>,
        output: Box<dyn Write>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let mem_size = usize::try_from(config.mem_size).map_err(|_| {
            SimError::Config(format!("memory size {:#x} too large", config.mem_size))
        })?;

        log::info!(
            "[MMIO] memory {:#010x}..{:#010x}, uart {:#010x}..{:#010x} (stride {})",
            config.mem_base,
            config.mem_base + config.mem_size,
            config.uart_base,
            config.uart_base + config.uart_size,
            config.uart_stride
        );
        log::info!("[MMIO] tohost {:#010x}", config.tohost_addr());

        Ok(Self {
            dram: Dram::new(mem_size),
            store_buf: StoreBuffer::new(),
            uart: Uart16550::new(config.uart_base, config.uart_stride, input, output)?,
            tohost: ToHost::new(config.tohost_addr()),
            reservation: None,
            config,
        })
    }

    pub fn classify(&self, addr: u64, size: usize) -> Window {
        let Some(end) = addr.checked_add(size as u64) else {
            return Window::Wild;
        };
        let inside = |base: u64, len: u64| addr >= base && end <= base + len;

        if inside(self.config.mem_base, self.config.mem_size) {
            Window::Mem
        } else if inside(self.config.uart_base, self.config.uart_size) {
            Window::Uart
        } else if inside(self.config.test_ctrl_base, self.config.test_ctrl_size) {
            Window::TestCtrl
        } else {
            Window::Wild
        }
    }

    pub fn handle(&mut self, req: &MemRequest) -> Result<MemResponse, SimError> {
        if req.op == MemOp::Fence {
            return self.fence(req);
        }

        match self.classify(req.addr, req.size) {
            Window::Mem => self.access_mem(req),
            window @ (Window::Uart | Window::TestCtrl) => {
                if !matches!(req.op, MemOp::Load | MemOp::Store) {
                    log::warn!("[MMIO] {} not allowed on a device", req);
                    return Ok(MemResponse::error());
                }
                if req.client.is_speculative() {
                    log::debug!("[MMIO] deferring {req}");
                    return Ok(MemResponse::deferred(req.wdata_sized()));
                }
                if window == Window::Uart {
                    Ok(self.access_uart(req))
                } else {
                    Ok(self.access_test_ctrl(req))
                }
            }
            Window::Wild => {
                if req.client.is_speculative() {
                    log::debug!("[MMIO] wild address, deferring {req}");
                    Ok(MemResponse::deferred(0))
                } else {
                    log::warn!("[MMIO] wild address {req}");
                    Ok(MemResponse::error())
                }
            }
        }
    }

    /// Retirement (`commit`) or squash of instruction `inum`'s write.
    /// Squashing an LR also drops its reservation.
    pub fn store_complete(&mut self, inum: u64, commit: bool) -> Result<(), SimError> {
        if !commit && self.reservation.is_some_and(|r| r.inum == inum) {
            log::debug!("[MMIO] LR I_{inum} squashed, reservation dropped");
            self.reservation = None;
        }
        self.store_buf.drain(&mut self.dram, inum, commit)
    }

    /// Current memory contents at `addr` as the pipeline would see them,
    /// pending writes included.
    pub fn peek(&self, addr: u64, size: usize) -> Result<u64, SimError> {
        let offset = addr.wrapping_sub(self.config.mem_base);
        self.store_buf.load(&self.dram, offset, size)
    }

    /// Initializes memory directly, bypassing the store buffer.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), SimError> {
        let offset = addr.wrapping_sub(self.config.mem_base);
        Ok(self.dram.write_bytes(offset, data)?)
    }

    fn fence(&mut self, req: &MemRequest) -> Result<MemResponse, SimError> {
        if req.client.is_speculative() && !self.store_buf.is_empty() {
            log::error!("[SB] fence I_{} with pending stores\n{}", req.inum, self.store_buf.dump());
            return Err(SimError::FenceWithPendingStores {
                inum: req.inum,
                pending: self.store_buf.len(),
            });
        }
        Ok(MemResponse::ok(0))
    }

    fn access_mem(&mut self, req: &MemRequest) -> Result<MemResponse, SimError> {
        let offset = req.addr - self.config.mem_base;
        let size = req.size;

        if req.op.is_atomic() && req.addr % size as u64 != 0 {
            log::debug!("[MMIO] misaligned {req}");
            return Ok(MemResponse::misaligned());
        }

        let rsp = match req.op {
            MemOp::Fence => MemResponse::ok(0),
            MemOp::Load => MemResponse::ok(self.store_buf.load(&self.dram, offset, size)?),
            MemOp::Lr => {
                let value = self.store_buf.load(&self.dram, offset, size)?;
                self.reservation = Some(Reservation {
                    inum: req.inum,
                    offset,
                    size,
                });
                MemResponse::ok(value)
            }
            MemOp::Store => {
                self.write_mem(req, offset, req.wdata_sized())?;
                MemResponse::ok(0)
            }
            MemOp::Sc => {
                let held = self.reservation.take();
                if held.is_some_and(|r| r.offset == offset && r.size == size) {
                    self.write_mem(req, offset, req.wdata_sized())?;
                    MemResponse::ok(0)
                } else {
                    log::debug!("[MMIO] SC failed, no reservation: {req}");
                    MemResponse::ok(1)
                }
            }
            op => {
                let old = self.store_buf.load(&self.dram, offset, size)?;
                let new = amo_apply(op, old, req.wdata, size);
                self.write_mem(req, offset, new)?;
                MemResponse::ok(old)
            }
        };
        log::trace!("[MMIO] {req} -> {rsp:?}");
        Ok(rsp)
    }

    /// Speculative writes park in the store buffer. Non-speculative ones are
    /// already in program order with everything older retired, so they go
    /// straight to memory.
    fn write_mem(&mut self, req: &MemRequest, offset: u64, value: u64) -> Result<(), SimError> {
        let entry = StoreBufEntry::new(req.inum, offset, req.size, value);
        if let Some(r) = self.reservation {
            if entry.overlaps(r.offset, r.size) {
                self.reservation = None;
            }
        }
        if req.client.is_speculative() {
            self.store_buf.push(entry)
        } else {
            self.dram.write_bytes(offset, entry.bytes())?;
            Ok(())
        }
    }

    fn access_uart(&mut self, req: &MemRequest) -> MemResponse {
        let is_read = req.op == MemOp::Load;
        match self.uart.try_access(is_read, req.addr, req.size, req.wdata as u8) {
            Ok(rdata) => MemResponse::ok(u64::from(rdata)),
            Err(e) => {
                log::warn!("[UART] {e}: {req}");
                MemResponse::error()
            }
        }
    }

    fn access_test_ctrl(&mut self, req: &MemRequest) -> MemResponse {
        if req.op == MemOp::Store {
            self.tohost.store(req.addr, req.wdata_sized());
            MemResponse::ok(0)
        } else {
            MemResponse::ok(self.tohost.load(req.addr) & size_mask(req.size))
        }
    }
}

/// AMO result at the request width; MIN/MAX compare as signed values of
/// that width.
pub fn amo_apply(op: MemOp, old: u64, operand: u64, size: usize) -> u64 {
    let mask = size_mask(size);
    let (old, operand) = (old & mask, operand & mask);
    let shift = 64 - (size.min(8) as u32) * 8;
    let signed = |v: u64| ((v << shift) as i64) >> shift;

    let result = match op {
        MemOp::AmoSwap => operand,
        MemOp::AmoAdd => old.wrapping_add(operand),
        MemOp::AmoXor => old ^ operand,
        MemOp::AmoAnd => old & operand,
        MemOp::AmoOr => old | operand,
        MemOp::AmoMin => {
            if signed(old) <= signed(operand) {
                old
            } else {
                operand
            }
        }
        MemOp::AmoMax => {
            if signed(old) >= signed(operand) {
                old
            } else {
                operand
            }
        }
        MemOp::AmoMinu => old.min(operand),
        MemOp::AmoMaxu => old.max(operand),
        MemOp::Fence | MemOp::Load | MemOp::Store | MemOp::Lr | MemOp::Sc => old,
    };
    result & mask
}
