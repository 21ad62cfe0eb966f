//! 16550-style UART.
//!
//! Registers are one byte wide but sit `stride` bytes apart (4 or 8). Slots
//! 0 and 1 are aliased by LCR.DLAB: RBR/THR and IER normally, the divisor
//! latch DLL/DLM when DLAB is set. IIR is computed on read.
//!
//! The host side is injected: a [`CharSource`] supplies keyboard lines and a
//! `Write` sink receives transmitted characters. Both are serviced from
//! [`Uart16550::tick`], so the model stays single-threaded.

use crate::error::SimError;
use std::io::Write;
use thiserror::Error;

// IER bits
pub const IER_ERBFI: u8 = 0x01;
pub const IER_ETBEI: u8 = 0x02;

// IIR values, highest priority first
pub const IIR_NONE: u8 = 0x01;
pub const IIR_RDA: u8 = 0x04;
pub const IIR_THRE: u8 = 0x02;

pub const LCR_DLAB: u8 = 0x80;

// LSR bits
pub const LSR_TEMT: u8 = 0x40;
pub const LSR_THRE: u8 = 0x20;
pub const LSR_OE: u8 = 0x02;
pub const LSR_DR: u8 = 0x01;
pub const LSR_RESET: u8 = LSR_TEMT | LSR_THRE;

/// Input is polled when `tick_num & INPUT_POLL_MASK == 0`. Guests are
/// sensitive to this: too frequent and they miss characters, too rare and
/// typing lags.
pub const INPUT_POLL_MASK: u64 = 0x3FFFF;

/// Ticks a partial output line may wait before it is flushed anyway.
pub const OUTPUT_AGE_FLUSH: u64 = 100;

/// Host input is read at most `IN_LINEBUF_SIZE - 1` bytes at a time.
pub const IN_LINEBUF_SIZE: usize = 128;
pub const OUT_LINEBUF_SIZE: usize = 128;

/// Result of polling the host for keyboard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineInput {
    Line(Vec<u8>),
    /// Nothing available right now.
    Pending,
    /// The source is exhausted and will never produce more.
    Closed,
}

/// Non-blocking line source feeding the receiver.
pub trait CharSource {
    fn poll_line(&mut self) -> LineInput;
}

/// Source that never has input.
pub struct NoInput;

impl CharSource for NoInput {
    fn poll_line(&mut self) -> LineInput {
        LineInput::Pending
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UartError {
    #[error("unsupported access size {size} for stride {stride}")]
    BadSize { size: usize, stride: u8 },
    #[error("address {addr:#x} not aligned to stride {stride}")]
    Misaligned { addr: u64, stride: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reg {
    Rbr,
    Thr,
    Dll,
    Ier,
    Dlm,
    Iir,
    Fcr,
    Lcr,
    Mcr,
    Lsr,
    Msr,
    Scr,
}

impl Reg {
    /// `slot` is already reduced to 0..=7.
    fn resolve(slot: u64, dlab: bool, is_read: bool) -> Self {
        match (slot, dlab, is_read) {
            (0, false, true) => Self::Rbr,
            (0, false, false) => Self::Thr,
            (0, true, _) => Self::Dll,
            (1, false, _) => Self::Ier,
            (1, true, _) => Self::Dlm,
            (2, _, true) => Self::Iir,
            (2, _, false) => Self::Fcr,
            (3, _, _) => Self::Lcr,
            (4, _, _) => Self::Mcr,
            (5, _, _) => Self::Lsr,
            (6, _, _) => Self::Msr,
            _ => Self::Scr,
        }
    }
}

/// Architectural register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartRegs {
    pub rbr: u8,
    pub thr: u8,
    pub dll: u8,
    pub ier: u8,
    pub dlm: u8,
    pub fcr: u8,
    pub lcr: u8,
    pub mcr: u8,
    pub lsr: u8,
    pub msr: u8,
    pub scr: u8,
}

impl Default for UartRegs {
    fn default() -> Self {
        Self {
            rbr: 0,
            thr: 0,
            dll: 0,
            ier: 0,
            dlm: 0,
            fcr: 0,
            lcr: 0,
            mcr: 0,
            lsr: LSR_RESET,
            msr: 0,
            scr: 0,
        }
    }
}

pub struct Uart16550 {
    regs: UartRegs,
    base: u64,
    stride: u8,
    last_irq: bool,

    input: Box<dyn CharSource>,
    input_closed: bool,
    in_line: Vec<u8>,
    in_next: usize,

    output: Box<dyn Write>,
    out_line: Vec<u8>,
    out_updated: u64,
    now: u64,
}

impl Uart16550 {
    pub fn new(
        base: u64,
        stride: u8,
        input: Box<dyn CharSource>,
        output: Box<dyn Write>,
    ) -> Result<Self, SimError> {
        if stride != 4 && stride != 8 {
            return Err(SimError::Config(format!(
                "UART stride must be 4 or 8, got {stride}"
            )));
        }
        let mut uart = Self {
            regs: UartRegs::default(),
            base,
            stride,
            last_irq: false,
            input,
            input_closed: false,
            in_line: Vec::with_capacity(IN_LINEBUF_SIZE),
            in_next: 0,
            output,
            out_line: Vec::with_capacity(OUT_LINEBUF_SIZE),
            out_updated: 0,
            now: 0,
        };
        uart.assert_reset();
        Ok(uart)
    }

    pub fn assert_reset(&mut self) {
        log::debug!("[UART] reset");
        self.regs = UartRegs::default();
        self.in_line.clear();
        self.in_next = 0;
        self.out_line.clear();
        self.out_updated = 0;
        self.last_irq = false;
    }

    pub fn regs(&self) -> &UartRegs {
        &self.regs
    }

    /// Characters written to THR but not yet flushed to the host.
    pub fn pending_output(&self) -> &[u8] {
        &self.out_line
    }

    /// Virtual Interrupt Identification Register.
    pub fn iir(&self) -> u8 {
        if self.regs.ier & IER_ERBFI != 0 && self.regs.lsr & LSR_DR != 0 {
            IIR_RDA
        } else if self.regs.ier & IER_ETBEI != 0 {
            IIR_THRE
        } else {
            IIR_NONE
        }
    }

    /// True only on the cycle the interrupt line rises.
    pub fn irq(&mut self) -> bool {
        let irq = self.iir() & IIR_NONE == 0;
        let rising = irq && !self.last_irq;
        if rising {
            log::debug!("[UART] irq 0->1 (iir {:#04x})", self.iir());
        }
        self.last_irq = irq;
        rising
    }

    /// Deposits a character from the serial line into RBR. Returns `false`
    /// (and drops the character) if the previous one has not been read yet.
    pub fn receive_char(&mut self, ch: u8) -> bool {
        if self.regs.lsr & LSR_DR != 0 {
            log::warn!("[UART] overrun: RBR still full, dropping {}", printable(ch));
            self.regs.lsr |= LSR_OE;
            return false;
        }
        self.regs.rbr = ch;
        self.regs.lsr |= LSR_DR;
        true
    }

    /// Called once per simulated cycle.
    pub fn tick(&mut self, tick_num: u64) {
        self.now = tick_num;

        let age = tick_num.saturating_sub(self.out_updated);
        if !self.out_line.is_empty() && age > OUTPUT_AGE_FLUSH {
            self.flush_output();
        }

        if tick_num & INPUT_POLL_MASK != 0 {
            return;
        }

        if self.in_next >= self.in_line.len() && !self.input_closed {
            match self.input.poll_line() {
                LineInput::Line(line) => {
                    self.in_line = line;
                    self.in_next = 0;
                }
                LineInput::Pending => {}
                LineInput::Closed => {
                    log::info!("[UART] input source closed");
                    self.input_closed = true;
                }
            }
        }

        if self.in_next < self.in_line.len() && self.regs.lsr & LSR_DR == 0 {
            let ch = self.in_line[self.in_next];
            if self.receive_char(ch) {
                self.in_next += 1;
            }
        }
    }

    /// Register access from the bus. Only the low byte of `wdata` is used;
    /// reads return the register in the low byte.
    pub fn try_access(
        &mut self,
        is_read: bool,
        addr: u64,
        size: usize,
        wdata: u8,
    ) -> Result<u8, UartError> {
        let size_ok = matches!(size, 1 | 2 | 4) || (size == 8 && self.stride == 8);
        if !size_ok {
            return Err(UartError::BadSize {
                size,
                stride: self.stride,
            });
        }
        let offset = addr.wrapping_sub(self.base);
        if offset % u64::from(self.stride) != 0 {
            return Err(UartError::Misaligned {
                addr,
                stride: self.stride,
            });
        }
        // The eight registers repeat across the whole window.
        let slot = (offset / u64::from(self.stride)) & 0x7;
        let dlab = self.regs.lcr & LCR_DLAB != 0;
        let reg = Reg::resolve(slot, dlab, is_read);

        if is_read {
            let rdata = self.read_reg(reg);
            log::trace!("[UART] read {reg:?} -> {rdata:#04x}");
            Ok(rdata)
        } else {
            log::trace!("[UART] write {reg:?} <- {wdata:#04x}");
            self.write_reg(reg, wdata);
            Ok(0)
        }
    }

    fn read_reg(&mut self, reg: Reg) -> u8 {
        match reg {
            Reg::Rbr => {
                self.regs.lsr &= !LSR_DR;
                self.regs.rbr
            }
            Reg::Dll => self.regs.dll,
            Reg::Ier => self.regs.ier,
            Reg::Dlm => self.regs.dlm,
            Reg::Iir => self.iir(),
            Reg::Lcr => self.regs.lcr,
            Reg::Mcr => self.regs.mcr,
            Reg::Lsr => {
                let lsr = self.regs.lsr;
                self.regs.lsr &= !LSR_OE;
                lsr
            }
            Reg::Msr => self.regs.msr,
            Reg::Scr => self.regs.scr,
            // Write-only registers never resolve on a read.
            Reg::Thr | Reg::Fcr => 0,
        }
    }

    fn write_reg(&mut self, reg: Reg, wdata: u8) {
        match reg {
            Reg::Thr => {
                self.regs.thr = wdata;
                self.transmit(wdata);
            }
            Reg::Dll => self.regs.dll = wdata,
            Reg::Ier => self.regs.ier = wdata,
            Reg::Dlm => self.regs.dlm = wdata,
            Reg::Fcr => self.regs.fcr = wdata,
            Reg::Lcr => self.regs.lcr = wdata,
            Reg::Mcr => self.regs.mcr = wdata,
            Reg::Scr => self.regs.scr = wdata,
            // Read-only: writes are ignored.
            Reg::Lsr | Reg::Msr => {}
            Reg::Rbr | Reg::Iir => {}
        }
    }

    fn transmit(&mut self, ch: u8) {
        self.out_line.push(ch);
        self.out_updated = self.now;
        if ch == b'\n' || self.out_line.len() + 1 >= OUT_LINEBUF_SIZE {
            self.flush_output();
        }
    }

    fn flush_output(&mut self) {
        let written = self.output.write_all(&self.out_line);
        if let Err(e) = written.and_then(|()| self.output.flush()) {
            log::warn!("[UART] console write failed: {e}");
        }
        self.out_line.clear();
        self.out_updated = self.now;
    }
}

fn printable(ch: u8) -> String {
    if ch.is_ascii_graphic() {
        format!("'{}'", ch as char)
    } else {
        format!("{ch:#04x}")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const BASE: u64 = 0x6010_0000;

    /// Output sink the test keeps a handle to.
    #[derive(Clone, Default)]
    pub(crate) struct SharedOut(pub Rc<RefCell<Vec<u8>>>);

    impl Write for SharedOut {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) struct ScriptedInput(pub VecDeque<LineInput>);

    impl CharSource for ScriptedInput {
        fn poll_line(&mut self) -> LineInput {
            self.0.pop_front().unwrap_or(LineInput::Pending)
        }
    }

    fn make_uart(stride: u8) -> (Uart16550, SharedOut) {
        let out = SharedOut::default();
        let uart = Uart16550::new(BASE, stride, Box::new(NoInput), Box::new(out.clone())).unwrap();
        (uart, out)
    }

    fn reg(n: u64) -> u64 {
        BASE + n * 4
    }

    #[test]
    fn test_reset_values() {
        let (uart, _) = make_uart(4);
        assert_eq!(uart.regs().lsr, LSR_RESET);
        assert_eq!(uart.iir(), IIR_NONE);
    }

    #[test]
    fn test_bad_stride() {
        let out = Box::new(SharedOut::default());
        assert!(Uart16550::new(BASE, 2, Box::new(NoInput), out).is_err());
    }

    #[test]
    fn test_dlab_aliasing() {
        let (mut uart, _) = make_uart(4);
        uart.try_access(false, reg(1), 1, 0x03).unwrap(); // IER
        uart.try_access(false, reg(3), 1, LCR_DLAB).unwrap();
        uart.try_access(false, reg(0), 1, 0x12).unwrap(); // DLL
        uart.try_access(false, reg(1), 1, 0x34).unwrap(); // DLM
        assert_eq!(uart.try_access(true, reg(0), 1, 0).unwrap(), 0x12);
        assert_eq!(uart.try_access(true, reg(1), 1, 0).unwrap(), 0x34);

        uart.try_access(false, reg(3), 1, 0x03).unwrap();
        assert_eq!(uart.try_access(true, reg(1), 1, 0).unwrap(), 0x03);
        assert_eq!(uart.regs().dll, 0x12);
        assert!(uart.pending_output().is_empty());
    }

    #[test]
    fn test_read_only_writes_ignored() {
        let (mut uart, _) = make_uart(4);
        uart.try_access(false, reg(5), 1, 0xFF).unwrap();
        uart.try_access(false, reg(6), 1, 0xFF).unwrap();
        assert_eq!(uart.regs().lsr, LSR_RESET);
        assert_eq!(uart.regs().msr, 0);
    }

    #[test]
    fn test_access_validation() {
        let (mut uart, _) = make_uart(4);
        assert_eq!(
            uart.try_access(true, reg(0), 8, 0),
            Err(UartError::BadSize { size: 8, stride: 4 })
        );
        assert!(matches!(
            uart.try_access(true, BASE + 2, 1, 0),
            Err(UartError::Misaligned { .. })
        ));
        let (mut wide, _) = make_uart(8);
        wide.try_access(false, BASE + 7 * 8, 8, 0x5A).unwrap();
        assert_eq!(wide.regs().scr, 0x5A);
        assert!(wide.try_access(true, BASE + 4, 1, 0).is_err());
    }

    #[test]
    fn test_registers_repeat_across_window() {
        let (mut uart, _) = make_uart(4);
        // Slot 13 is LSR, slot 15 is SCR.
        assert_eq!(uart.try_access(true, reg(13), 1, 0).unwrap(), LSR_RESET);
        uart.try_access(false, reg(15), 1, 0x77).unwrap();
        assert_eq!(uart.regs().scr, 0x77);
        assert_eq!(uart.try_access(true, BASE + 0xFFC, 1, 0).unwrap(), 0x77);

        let (mut wide, _) = make_uart(8);
        wide.try_access(false, BASE + 9 * 8, 1, 0x05).unwrap();
        assert_eq!(wide.regs().ier, 0x05);
    }

    #[test]
    fn test_output_line_flushing() {
        let (mut uart, out) = make_uart(4);
        for &ch in b"hi" {
            uart.try_access(false, reg(0), 1, ch).unwrap();
        }
        assert!(out.0.borrow().is_empty());
        uart.try_access(false, reg(0), 1, b'\n').unwrap();
        assert_eq!(out.0.borrow().as_slice(), b"hi\n");

        uart.tick(10);
        uart.try_access(false, reg(0), 1, b'>').unwrap();
        uart.tick(10 + OUTPUT_AGE_FLUSH);
        assert_eq!(out.0.borrow().as_slice(), b"hi\n");
        uart.tick(11 + OUTPUT_AGE_FLUSH);
        assert_eq!(out.0.borrow().as_slice(), b"hi\n>");
    }

    #[test]
    fn test_output_flushes_when_full() {
        let (mut uart, out) = make_uart(4);
        for _ in 0..OUT_LINEBUF_SIZE - 1 {
            uart.try_access(false, reg(0), 1, b'x').unwrap();
        }
        assert_eq!(out.0.borrow().len(), OUT_LINEBUF_SIZE - 1);
        assert!(uart.pending_output().is_empty());
    }

    #[test]
    fn test_input_polling_and_rbr() {
        let out = SharedOut::default();
        let input = ScriptedInput(VecDeque::from([LineInput::Line(b"ab".to_vec())]));
        let mut uart = Uart16550::new(BASE, 4, Box::new(input), Box::new(out)).unwrap();

        uart.tick(1);
        assert_eq!(uart.regs().lsr & LSR_DR, 0);

        uart.tick(0);
        assert_ne!(uart.regs().lsr & LSR_DR, 0);

        // 'b' waits until 'a' has been read.
        uart.tick(INPUT_POLL_MASK + 1);
        assert_eq!(uart.try_access(true, reg(0), 1, 0).unwrap(), b'a');
        assert_eq!(uart.regs().lsr & LSR_DR, 0);
        assert_eq!(uart.regs().lsr & LSR_OE, 0);

        uart.tick(2 * (INPUT_POLL_MASK + 1));
        assert_eq!(uart.try_access(true, reg(0), 1, 0).unwrap(), b'b');
    }

    #[test]
    fn test_long_line_delivered_whole() {
        let line: Vec<u8> = (0..200u32).map(|i| b'a' + (i % 26) as u8).collect();
        let input = ScriptedInput(VecDeque::from([LineInput::Line(line.clone())]));
        let mut uart =
            Uart16550::new(BASE, 4, Box::new(input), Box::new(SharedOut::default())).unwrap();

        let mut received = Vec::new();
        for k in 0..250u64 {
            uart.tick(k * (INPUT_POLL_MASK + 1));
            if uart.regs().lsr & LSR_DR != 0 {
                received.push(uart.try_access(true, reg(0), 1, 0).unwrap());
            }
        }
        assert_eq!(received, line);
    }

    #[test]
    fn test_overrun_drops_char() {
        let (mut uart, _) = make_uart(4);
        assert!(uart.receive_char(b'x'));
        assert!(!uart.receive_char(b'y'));
        assert_ne!(uart.regs().lsr & LSR_OE, 0);

        // LSR read reports and clears the overrun.
        let lsr = uart.try_access(true, reg(5), 1, 0).unwrap();
        assert_ne!(lsr & LSR_OE, 0);
        assert_eq!(uart.regs().lsr & LSR_OE, 0);
        assert_eq!(uart.try_access(true, reg(0), 1, 0).unwrap(), b'x');
    }

    #[test]
    fn test_irq_edge() {
        let (mut uart, _) = make_uart(4);
        uart.try_access(false, reg(1), 1, IER_ERBFI).unwrap();
        assert!(!uart.irq());

        uart.receive_char(b'q');
        assert_eq!(uart.iir(), IIR_RDA);
        assert!(uart.irq());
        assert!(!uart.irq());
        assert!(!uart.irq());

        uart.try_access(true, reg(0), 1, 0).unwrap();
        assert!(!uart.irq());
        uart.receive_char(b'r');
        assert!(uart.irq());
    }

    #[test]
    fn test_iir_priority() {
        let (mut uart, _) = make_uart(4);
        uart.try_access(false, reg(1), 1, IER_ERBFI | IER_ETBEI).unwrap();
        assert_eq!(uart.try_access(true, reg(2), 1, 0).unwrap(), IIR_THRE);
        uart.receive_char(b'z');
        assert_eq!(uart.try_access(true, reg(2), 1, 0).unwrap(), IIR_RDA);
    }

    #[test]
    fn test_closed_input_stops_polling() {
        let input = ScriptedInput(VecDeque::from([
            LineInput::Closed,
            LineInput::Line(b"late".to_vec()),
        ]));
        let mut uart =
            Uart16550::new(BASE, 4, Box::new(input), Box::new(SharedOut::default())).unwrap();
        uart.tick(0);
        uart.tick(INPUT_POLL_MASK + 1);
        assert_eq!(uart.regs().lsr & LSR_DR, 0);
    }
}
