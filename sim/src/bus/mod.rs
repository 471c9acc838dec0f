//! The bus interconnect.
//!
//! A [`Bus`] owns an address space and an interrupt vector space.
//! Devices are attached to it by giving it a [`WindowSpec`] (which
//! registers and interrupt vectors they need) and a boxed
//! [`BusDevice`].  The bus then
//!
//! - routes reads and writes to the device whose registers contain
//!   the address (or reports non-existent memory), and
//! - arbitrates the interrupt requests of its devices by priority.
//!
//! A bus does not own a scheduler, because all the buses of a
//! system share one.  Operations which may call into a device take
//! the scheduler as a parameter, so that the device can arm timers.
use serde::{Deserialize, Serialize};
use tracing::{event, span, Level};

use base::prelude::*;

use crate::context::DeviceContext;
use crate::error::{AttachError, BusFault, BusMisuse};
use crate::event::{FiredTimer, Scheduler, TimerHandler};

mod device;
mod interrupt;
mod map;

#[cfg(test)]
mod tests;

pub use device::BusDevice;
pub use interrupt::{AllocatedVector, LevelStatus, PendingInterrupt, SlotState};
pub use map::AddressRange;

use device::WindowEntry;
pub(crate) use interrupt::InterruptLines;
use interrupt::InterruptController;
use map::{AddressMap, MapEntry};

/// Width of a device register, in bytes.
pub const REGISTER_BYTES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub name: String,
    pub addressing: AddressingMode,
}

impl Default for BusConfig {
    fn default() -> BusConfig {
        BusConfig {
            name: "unibus".to_string(),
            addressing: AddressingMode::Bits18,
        }
    }
}

/// A block of consecutive device registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBlock {
    pub base: BusAddress,
    pub count: u32,
}

/// A request for `count` consecutive interrupt vectors at one
/// priority level.  The vectors are `base`, `base + 4`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorRequest {
    pub level: Ipl,
    pub base: VectorAddress,
    pub count: u8,
}

/// Describes the resources a device wants from a bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    /// A device with no registers takes part only in interrupt
    /// arbitration.
    pub registers: Option<RegisterBlock>,
    pub vectors: Vec<VectorRequest>,
    /// Orders windows which start at the same address (lower
    /// first).
    pub relative_priority: u32,
}

impl WindowSpec {
    #[must_use]
    pub fn registers(base: BusAddress, count: u32) -> WindowSpec {
        WindowSpec {
            registers: Some(RegisterBlock { base, count }),
            ..WindowSpec::default()
        }
    }

    #[must_use]
    pub fn vectors_only() -> WindowSpec {
        WindowSpec::default()
    }

    #[must_use]
    pub fn with_vectors(mut self, level: Ipl, base: VectorAddress, count: u8) -> WindowSpec {
        self.vectors.push(VectorRequest { level, base, count });
        self
    }

    #[must_use]
    pub fn with_relative_priority(mut self, relative_priority: u32) -> WindowSpec {
        self.relative_priority = relative_priority;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub reads: u64,
    pub writes: u64,
    pub nonexistent: u64,
    pub misuse: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub handle: WindowHandle,
    pub device: String,
    pub registers: AddressRange,
    pub relative_priority: u32,
    pub vectors: Vec<AllocatedVector>,
}

/// A snapshot of the configuration and interrupt state of a bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusStatus {
    pub name: String,
    pub addressing: AddressingMode,
    /// Attached windows, in address order.
    pub windows: Vec<WindowStatus>,
    pub levels: Vec<LevelStatus>,
}

#[derive(Debug)]
pub struct Bus {
    id: BusId,
    config: BusConfig,
    windows: Arena<WindowHandle, WindowEntry>,
    map: AddressMap,
    interrupts: InterruptController,
    stats: BusStats,
}

impl Bus {
    #[must_use]
    pub fn new(id: BusId, config: BusConfig) -> Bus {
        Bus {
            id,
            config,
            windows: Arena::new(),
            map: AddressMap::new(),
            interrupts: InterruptController::new(),
            stats: BusStats::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> BusId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            misuse: self.stats.misuse + self.interrupts.misuse_count(),
            ..self.stats
        }
    }

    #[must_use]
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    fn report(&mut self, misuse: BusMisuse) -> BusMisuse {
        self.stats.misuse += 1;
        event!(Level::WARN, "{}: request ignored: {}", self.config.name, misuse);
        misuse
    }

    fn register_range(&self, name: &str, spec: &WindowSpec) -> Result<AddressRange, AttachError> {
        let invalid = |reason: String| AttachError::InvalidWindow {
            device: name.to_string(),
            reason,
        };
        let block = match spec.registers {
            Some(block) => block,
            None => {
                return Ok(AddressRange::new(BusAddress::ZERO, 0));
            }
        };
        let base = self.config.addressing.normalise(block.base);
        let len = match block.count.checked_mul(REGISTER_BYTES) {
            Some(len) => len,
            None => {
                return Err(invalid(format!("{} registers is too many", block.count)));
            }
        };
        let range = AddressRange::new(base, len);
        if range.end() > u64::from(self.config.addressing.mask()) + 1 {
            return Err(invalid(format!(
                "registers {} extend past the end of the {} address space",
                range, self.config.addressing
            )));
        }
        Ok(range)
    }

    /// Attach a device.
    ///
    /// On failure the bus is unchanged and the device is dropped.
    pub fn attach(
        &mut self,
        scheduler: &mut Scheduler,
        spec: &WindowSpec,
        device: Box<dyn BusDevice>,
    ) -> Result<WindowHandle, AttachError> {
        let name = device.name();
        let attach_span = span!(Level::INFO, "attach", bus=%self.id, device=%name);
        let _enter = attach_span.enter();

        if let Some(req) = spec.vectors.iter().find(|req| req.count == 0) {
            return Err(AttachError::InvalidWindow {
                device: name,
                reason: format!("empty vector request at {} (base {})", req.level, req.base),
            });
        }
        let registers = self.register_range(&name, spec)?;
        if let Some(existing) = self.map.find_conflict(&registers) {
            let existing_device = match self.windows.get(existing.window) {
                Some(entry) => entry.name(),
                None => {
                    unreachable!("address map names {} which is not attached", existing.window);
                }
            };
            event!(
                Level::DEBUG,
                "rejecting {}: {} overlaps {} of {}",
                name,
                registers,
                existing.range,
                existing_device
            );
            return Err(AttachError::AddressConflict {
                requested: registers,
                existing: existing.range,
                existing_device,
            });
        }
        let vectors = self.interrupts.plan(&name, &spec.vectors)?;

        let handle = self.windows.insert(WindowEntry {
            device,
            registers,
            relative_priority: spec.relative_priority,
            vectors: vectors.clone(),
        });
        self.map.insert(MapEntry {
            range: registers,
            relative_priority: spec.relative_priority,
            window: handle,
        });
        self.interrupts.reserve(handle, &vectors);
        event!(
            Level::DEBUG,
            "attached {} as {} with registers {} and {} vector(s)",
            name,
            handle,
            registers,
            vectors.len()
        );
        self.with_device(scheduler, handle, |device, ctx| device.on_attach(ctx));
        Ok(handle)
    }

    /// Detach a device, returning it.  Its address range and vector
    /// slots become free (any outstanding interrupt requests are
    /// withdrawn) and its timers are destroyed.
    pub fn detach(
        &mut self,
        scheduler: &mut Scheduler,
        handle: WindowHandle,
    ) -> Result<Box<dyn BusDevice>, BusMisuse> {
        let entry = match self.windows.remove(handle) {
            Some(entry) => entry,
            None => {
                return Err(self.report(BusMisuse::UnknownWindow(handle)));
            }
        };
        if self.map.remove(handle).is_none() {
            panic!("{handle} was attached but missing from the address map");
        }
        self.interrupts.release(handle, &entry.vectors);
        let timers = scheduler.destroy_timers_owned_by(DeviceRef {
            bus: self.id,
            window: handle,
        });
        event!(
            Level::DEBUG,
            "detached {} ({}); destroyed {} timer(s)",
            entry.name(),
            handle,
            timers
        );
        Ok(entry.device)
    }

    /// Call `f` with the device attached as `handle` and a context
    /// for it.
    fn with_device<R, F>(
        &mut self,
        scheduler: &mut Scheduler,
        handle: WindowHandle,
        f: F,
    ) -> Option<R>
    where
        F: FnOnce(&mut Box<dyn BusDevice>, &mut DeviceContext<'_>) -> R,
    {
        let owner = DeviceRef {
            bus: self.id,
            window: handle,
        };
        let entry = self.windows.get_mut(handle)?;
        let lines = InterruptLines::new(&mut self.interrupts, handle, &entry.vectors);
        let mut ctx = DeviceContext::new(owner, entry.registers, scheduler, lines);
        Some(f(&mut entry.device, &mut ctx))
    }

    fn lookup(&mut self, address: BusAddress, width: Width) -> Result<(BusAddress, WindowHandle), BusFault> {
        let address = self.config.addressing.normalise(address);
        match self.map.lookup(address) {
            Some(handle) => Ok((address, handle)),
            None => {
                self.stats.nonexistent += 1;
                event!(
                    Level::DEBUG,
                    "{}: no device responds to {} access at {}",
                    self.config.name,
                    width,
                    address
                );
                Err(BusFault::NonExistentMemory { address, width })
            }
        }
    }

    /// Read from the device whose registers include `address`.
    pub fn read(
        &mut self,
        scheduler: &mut Scheduler,
        address: BusAddress,
        width: Width,
    ) -> Result<u16, BusFault> {
        let (address, handle) = self.lookup(address, width)?;
        self.stats.reads += 1;
        match self.with_device(scheduler, handle, |device, ctx| {
            device.read(ctx, address, width)
        }) {
            Some(result) => result.map(|value| value & width.value_mask()),
            None => unreachable!("address map names {handle} which is not attached"),
        }
    }

    /// Write to the device whose registers include `address`.
    pub fn write(
        &mut self,
        scheduler: &mut Scheduler,
        address: BusAddress,
        width: Width,
        value: u16,
    ) -> Result<(), BusFault> {
        let (address, handle) = self.lookup(address, width)?;
        self.stats.writes += 1;
        let value = value & width.value_mask();
        match self.with_device(scheduler, handle, |device, ctx| {
            device.write(ctx, address, width, value)
        }) {
            Some(result) => result,
            None => unreachable!("address map names {handle} which is not attached"),
        }
    }

    fn lines(&mut self, handle: WindowHandle) -> Result<InterruptLines<'_>, BusMisuse> {
        if !self.windows.contains(handle) {
            return Err(self.report(BusMisuse::UnknownWindow(handle)));
        }
        match self.windows.get(handle) {
            Some(entry) => Ok(InterruptLines::new(
                &mut self.interrupts,
                handle,
                &entry.vectors,
            )),
            None => unreachable!("{handle} vanished"),
        }
    }

    /// Raise the interrupt request for the `sub_index`th vector of a
    /// window.
    pub fn send_interrupt(&mut self, handle: WindowHandle, sub_index: usize) -> Result<(), BusMisuse> {
        self.lines(handle)?.send(sub_index)
    }

    pub fn cancel_interrupt(
        &mut self,
        handle: WindowHandle,
        sub_index: usize,
    ) -> Result<(), BusMisuse> {
        self.lines(handle)?.cancel(sub_index)
    }

    /// The request which currently wins arbitration, if any.  This
    /// does not change anything.
    #[must_use]
    pub fn poll_highest_interrupt(&self) -> Option<PendingInterrupt> {
        self.interrupts.highest_pending()
    }

    /// Like [`Bus::poll_highest_interrupt`] but ignores requests at
    /// or below the processor priority `cpu_level` (0 to 7).
    #[must_use]
    pub fn poll_interrupt_above(&self, cpu_level: u8) -> Option<PendingInterrupt> {
        self.interrupts.highest_pending_above(cpu_level)
    }

    /// Take the winning request.  Its slot goes back to being merely
    /// reserved.
    pub fn acknowledge_interrupt(&mut self) -> Option<PendingInterrupt> {
        self.interrupts.acknowledge_above(0)
    }

    pub fn acknowledge_interrupt_above(&mut self, cpu_level: u8) -> Option<PendingInterrupt> {
        self.interrupts.acknowledge_above(cpu_level)
    }

    #[must_use]
    pub fn slot_state(&self, level: Ipl, slot: u8) -> SlotState {
        self.interrupts.slot_state(level, slot)
    }

    #[must_use]
    pub fn device(&self, handle: WindowHandle) -> Option<&dyn BusDevice> {
        self.windows.get(handle).map(|entry| entry.device.as_ref())
    }

    #[must_use]
    pub fn status(&self) -> BusStatus {
        let windows = self
            .map
            .iter()
            .filter_map(|m| {
                self.windows.get(m.window).map(|entry| WindowStatus {
                    handle: m.window,
                    device: entry.name(),
                    registers: entry.registers,
                    relative_priority: entry.relative_priority,
                    vectors: entry.vectors.clone(),
                })
            })
            .collect();
        BusStatus {
            name: self.config.name.clone(),
            addressing: self.config.addressing,
            windows,
            levels: self.interrupts.level_status(),
        }
    }

    /// Pass an expired timer to the device which owns it.
    pub fn dispatch_timer(&mut self, scheduler: &mut Scheduler, fired: FiredTimer) {
        if fired.owner.bus != self.id {
            event!(
                Level::ERROR,
                "{} belongs to {} but was delivered to {}",
                fired.timer,
                fired.owner,
                self.id
            );
            return;
        }
        let delivered = self.with_device(scheduler, fired.owner.window, |device, ctx| {
            device.on_timer(ctx, fired.timer)
        });
        if delivered.is_none() {
            event!(
                Level::ERROR,
                "{} fired for {} which is no longer attached",
                fired.timer,
                fired.owner
            );
        }
    }
}

impl TimerHandler for Bus {
    fn on_timer(&mut self, scheduler: &mut Scheduler, fired: FiredTimer) {
        self.dispatch_timer(scheduler, fired);
    }
}
