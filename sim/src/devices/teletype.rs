//! The transmitter side of a console terminal.
//!
//! Registers (relative to the base address):
//!
//! | offset | register | bits |
//! | ------ | -------- | ---- |
//! | 0      | XCSR     | 7: ready, 6: interrupt enable |
//! | 2      | XBUF     | 0-7: character to print (write only) |
//!
//! Writing XBUF clears "ready"; the character takes a fixed number
//! of simulated ticks to print, after which "ready" is set again
//! (and an interrupt requested, if enabled).
//!
//! Printed characters reach the host through a real-time timer, so
//! that the rate at which the operator sees output depends on the
//! wall clock and not on how fast the simulation runs.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;

use tracing::{event, Level};

use base::prelude::*;

use super::{CSR_INTERRUPT_ENABLE, CSR_READY};
use crate::bus::{BusDevice, WindowSpec};
use crate::context::DeviceContext;
use crate::error::BusFault;
use crate::event::TimeBase;

/// The conventional address of the console transmitter on an
/// 18-bit bus.  The offsets below are relative to wherever its
/// window is placed.
pub const BASE_ADDRESS: BusAddress = BusAddress::new(0o777_564);

/// The transmit buffer register, at the conventional 18-bit address.
pub const XBUF_ADDRESS: BusAddress = BusAddress::new(0o777_566);

pub const VECTOR: VectorAddress = VectorAddress::new(0o064);

const XCSR_OFFSET: u32 = 0;
const XBUF_OFFSET: u32 = 2;

/// A `Write` implementation which collects output in memory and can
/// be shared (for example between a device and a test).
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    #[must_use]
    pub fn new() -> SharedOutput {
        SharedOutput::default()
    }

    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Teletype {
    char_ticks: u64,
    flush_interval: u64,
    csr: u16,
    printing: Option<u8>,
    unflushed: VecDeque<u8>,
    print_timer: Option<TimerId>,
    flush_timer: Option<TimerId>,
    sink: Box<dyn Write>,
}

impl Teletype {
    /// `char_ticks` is the number of simulated ticks taken to print
    /// each character.  Output is passed to `sink` every
    /// `flush_interval` wall-clock ticks.
    #[must_use]
    pub fn new(sink: Box<dyn Write>, char_ticks: u64, flush_interval: u64) -> Teletype {
        Teletype {
            char_ticks,
            flush_interval: flush_interval.max(1),
            csr: CSR_READY,
            printing: None,
            unflushed: VecDeque::new(),
            print_timer: None,
            flush_timer: None,
            sink,
        }
    }

    /// The window a console transmitter normally occupies.
    #[must_use]
    pub fn window_spec() -> WindowSpec {
        WindowSpec::registers(BASE_ADDRESS, 2).with_vectors(Ipl::Br4, VECTOR, 1)
    }

    fn update_interrupt(&self, ctx: &mut DeviceContext<'_>) {
        let result = if self.csr & CSR_INTERRUPT_ENABLE != 0 && self.csr & CSR_READY != 0 {
            ctx.send_interrupt(0)
        } else {
            ctx.cancel_interrupt(0)
        };
        if let Err(e) = result {
            event!(Level::ERROR, "teletype has no interrupt vector: {}", e);
        }
    }

    fn start_printing(&mut self, ctx: &mut DeviceContext<'_>, ch: u8) {
        if self.printing.is_some() {
            // Writing XBUF while busy loses the character being
            // printed, just as it would on the real hardware.
            event!(Level::WARN, "teletype overrun; character {:03o} lost", ch);
            return;
        }
        let Some(timer) = self.print_timer else {
            event!(Level::ERROR, "teletype was never attached");
            return;
        };
        let interval = i64::try_from(self.char_ticks).unwrap_or(i64::MAX);
        match ctx.arm(timer, interval) {
            Ok(()) => {
                self.printing = Some(ch);
                self.csr &= !CSR_READY;
                self.update_interrupt(ctx);
            }
            Err(e) => {
                event!(Level::ERROR, "teletype could not start printing: {}", e);
            }
        }
    }

    fn flush_output(&mut self) {
        if self.unflushed.is_empty() {
            return;
        }
        let (a, b) = self.unflushed.as_slices();
        let result = self
            .sink
            .write_all(a)
            .and_then(|()| self.sink.write_all(b))
            .and_then(|()| self.sink.flush());
        if let Err(e) = result {
            event!(Level::WARN, "failed to write teletype output: {}", e);
        }
        self.unflushed.clear();
    }
}

impl BusDevice for Teletype {
    fn name(&self) -> String {
        "teletype".to_string()
    }

    fn on_attach(&mut self, ctx: &mut DeviceContext<'_>) {
        self.print_timer = Some(ctx.create_timer(TimeBase::Simulated));
        let flush = ctx.create_timer(TimeBase::RealTime);
        let interval = i64::try_from(self.flush_interval).unwrap_or(i64::MAX);
        if let Err(e) = ctx
            .set_periodic(flush, Some(self.flush_interval))
            .and_then(|()| ctx.arm(flush, interval))
        {
            event!(Level::ERROR, "teletype could not start its output timer: {}", e);
        }
        self.flush_timer = Some(flush);
    }

    fn read(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        address: BusAddress,
        width: Width,
    ) -> Result<u16, BusFault> {
        match ctx.register_offset(address) {
            Some(XCSR_OFFSET) => Ok(self.csr),
            Some(1) => Ok(self.csr >> 8),
            // XBUF is write-only and reads as zero.
            Some(2 | 3) => Ok(0),
            _ => Err(BusFault::NonExistentMemory { address, width }),
        }
    }

    fn write(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        address: BusAddress,
        width: Width,
        value: u16,
    ) -> Result<(), BusFault> {
        match ctx.register_offset(address) {
            Some(XCSR_OFFSET) => {
                self.csr = (self.csr & CSR_READY) | (value & CSR_INTERRUPT_ENABLE);
                self.update_interrupt(ctx);
                Ok(())
            }
            Some(XBUF_OFFSET) => {
                self.start_printing(ctx, (value & 0o377) as u8);
                Ok(())
            }
            Some(1 | 3) => Ok(()),
            _ => Err(BusFault::NonExistentMemory { address, width }),
        }
    }

    fn on_timer(&mut self, ctx: &mut DeviceContext<'_>, timer: TimerId) {
        if Some(timer) == self.flush_timer {
            self.flush_output();
        } else if Some(timer) == self.print_timer {
            if let Some(ch) = self.printing.take() {
                self.unflushed.push_back(ch);
            }
            self.csr |= CSR_READY;
            self.update_interrupt(ctx);
        } else {
            event!(Level::ERROR, "teletype received unexpected {}", timer);
        }
    }

    fn describe(&self) -> String {
        format!(
            "csr={:06o} busy={} unflushed={}",
            self.csr,
            self.printing.is_some(),
            self.unflushed.len()
        )
    }
}
