//! The view of the simulator which a device gets when it is called.
//!
//! A device never holds references to the bus or the scheduler.
//! Instead every call into a device passes a [`DeviceContext`]
//! which lets it see the current simulated time, manage its own
//! timers and raise or withdraw interrupt requests on its own
//! window's vectors.
use tracing::{event, Level};

use base::prelude::*;

use crate::bus::{AddressRange, AllocatedVector, InterruptLines};
use crate::error::{BusMisuse, TimerMisuse};
use crate::event::{Scheduler, TimeBase};

pub struct DeviceContext<'a> {
    owner: DeviceRef,
    registers: AddressRange,
    scheduler: &'a mut Scheduler,
    lines: InterruptLines<'a>,
}

impl<'a> DeviceContext<'a> {
    pub(crate) fn new(
        owner: DeviceRef,
        registers: AddressRange,
        scheduler: &'a mut Scheduler,
        lines: InterruptLines<'a>,
    ) -> DeviceContext<'a> {
        DeviceContext {
            owner,
            registers,
            scheduler,
            lines,
        }
    }

    /// The identity of the device being called.
    #[must_use]
    pub fn owner(&self) -> DeviceRef {
        self.owner
    }

    /// The addresses of this device's registers as the bus sees
    /// them, that is, normalised to the bus's addressing mode.  The
    /// range is empty for a window which has only vectors.
    #[must_use]
    pub fn registers(&self) -> AddressRange {
        self.registers
    }

    /// The offset of `address` from the first of this device's
    /// registers, if it lies within them.
    #[must_use]
    pub fn register_offset(&self, address: BusAddress) -> Option<u32> {
        if self.registers.contains(address) {
            address.offset_from(self.registers.base())
        } else {
            None
        }
    }

    /// The current simulated time, in ticks.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.scheduler.global_time()
    }

    /// The interrupt vectors assigned to this device's window, in
    /// the order they were requested.
    #[must_use]
    pub fn vectors(&self) -> &[AllocatedVector] {
        self.lines.vectors()
    }

    pub fn create_timer(&mut self, base: TimeBase) -> TimerId {
        self.scheduler.create_timer(self.owner, base)
    }

    fn check_owner(&mut self, timer: TimerId) -> Result<(), TimerMisuse> {
        match self.scheduler.owner_of(timer) {
            Some(owner) if owner == self.owner => Ok(()),
            Some(_) => Err(self.scheduler.report(TimerMisuse::NotOwner {
                timer,
                caller: self.owner,
            })),
            None => Err(self.scheduler.report(TimerMisuse::UnknownTimer(timer))),
        }
    }

    pub fn destroy_timer(&mut self, timer: TimerId) -> Result<(), TimerMisuse> {
        self.check_owner(timer)?;
        self.scheduler.destroy_timer(timer)
    }

    pub fn set_periodic(&mut self, timer: TimerId, interval: Option<u64>) -> Result<(), TimerMisuse> {
        self.check_owner(timer)?;
        self.scheduler.set_periodic(timer, interval)
    }

    pub fn set_enabled(&mut self, timer: TimerId, enabled: bool) -> Result<(), TimerMisuse> {
        self.check_owner(timer)?;
        self.scheduler.set_enabled(timer, enabled)
    }

    /// Arm one of this device's timers.  See [`Scheduler::arm`].
    pub fn arm(&mut self, timer: TimerId, interval: i64) -> Result<(), TimerMisuse> {
        self.check_owner(timer)?;
        self.scheduler.arm(timer, interval)
    }

    pub fn cancel(&mut self, timer: TimerId) -> Result<(), TimerMisuse> {
        self.check_owner(timer)?;
        self.scheduler.cancel(timer)
    }

    #[must_use]
    pub fn is_pending(&self, timer: TimerId) -> bool {
        self.scheduler.owner_of(timer) == Some(self.owner) && self.scheduler.is_pending(timer)
    }

    /// Request an interrupt on the `sub_index`th vector of this
    /// device's window.  Requesting again while a request is
    /// outstanding has no further effect.
    pub fn send_interrupt(&mut self, sub_index: usize) -> Result<(), BusMisuse> {
        event!(
            Level::TRACE,
            "{} sends interrupt {} at tick {}",
            self.owner,
            sub_index,
            self.scheduler.global_time()
        );
        self.lines.send(sub_index)
    }

    pub fn cancel_interrupt(&mut self, sub_index: usize) -> Result<(), BusMisuse> {
        self.lines.cancel(sub_index)
    }

    #[must_use]
    pub fn interrupt_requested(&self, sub_index: usize) -> bool {
        self.lines.is_requesting(sub_index)
    }
}
