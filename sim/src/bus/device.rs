//! The interface between a bus and the devices attached to it.
use std::fmt::{self, Debug, Formatter};

use base::prelude::*;

use super::map::AddressRange;
use super::AllocatedVector;
use crate::context::DeviceContext;
use crate::error::BusFault;

/// A peripheral which can be attached to a bus.
///
/// `read` and `write` are given the full (normalised) bus address;
/// devices usually subtract their base address to find out which
/// register is meant.  A device may answer with
/// [`BusFault::NonExistentMemory`] for an address inside its window
/// which it does not implement.
pub trait BusDevice {
    fn name(&self) -> String;

    /// Called once, just after the device is attached.  This is
    /// where a device usually creates its timers.
    fn on_attach(&mut self, _ctx: &mut DeviceContext<'_>) {}

    fn read(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        address: BusAddress,
        width: Width,
    ) -> Result<u16, BusFault>;

    fn write(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        address: BusAddress,
        width: Width,
        value: u16,
    ) -> Result<(), BusFault>;

    /// Called when one of the device's timers expires.
    fn on_timer(&mut self, _ctx: &mut DeviceContext<'_>, _timer: TimerId) {}

    /// A short human-readable description of the device's state, for
    /// diagnostics.
    fn describe(&self) -> String {
        String::new()
    }
}

/// A device together with the bus resources it has been given.
pub(crate) struct WindowEntry {
    pub(crate) device: Box<dyn BusDevice>,
    pub(crate) registers: AddressRange,
    pub(crate) relative_priority: u32,
    pub(crate) vectors: Vec<AllocatedVector>,
}

impl WindowEntry {
    pub(crate) fn name(&self) -> String {
        self.device.name()
    }
}

impl Debug for WindowEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("WindowEntry")
            .field("device", &format_args!("<device: {}>", self.name()))
            .field("registers", &self.registers)
            .field("relative_priority", &self.relative_priority)
            .field("vectors", &self.vectors)
            .finish()
    }
}
