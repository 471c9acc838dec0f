//! A complete simulated system: one scheduler shared by any number
//! of buses.
//!
//! All the state of a system lives in its [`System`] value, so
//! several independent systems can exist in one process.  A system
//! is not `Sync`; it belongs to the thread which runs it.
use tracing::{event, span, Level};

use base::prelude::*;

use crate::bus::{Bus, BusConfig, BusDevice, PendingInterrupt, WindowSpec};
use crate::clock::WallClockSource;
use crate::error::{AttachError, BusFault, BusMisuse};
use crate::event::{FiredTimer, Scheduler, SchedulerConfig, TimerHandler};

/// Routes expired timers to the bus the owning device is attached
/// to.
struct BusSet<'a>(&'a mut [Bus]);

impl TimerHandler for BusSet<'_> {
    fn on_timer(&mut self, scheduler: &mut Scheduler, fired: FiredTimer) {
        match self.0.get_mut(usize::from(fired.owner.bus.0)) {
            Some(bus) => bus.dispatch_timer(scheduler, fired),
            None => {
                event!(
                    Level::ERROR,
                    "{} fired for {} but there is no such bus",
                    fired.timer,
                    fired.owner
                );
            }
        }
    }
}

#[derive(Debug)]
pub struct System {
    scheduler: Scheduler,
    buses: Vec<Bus>,
}

impl System {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> System {
        System {
            scheduler: Scheduler::new(config),
            buses: Vec::new(),
        }
    }

    pub fn add_bus(&mut self, config: BusConfig) -> BusId {
        let id = match u16::try_from(self.buses.len()) {
            Ok(n) => BusId(n),
            Err(_) => panic!("too many buses"),
        };
        event!(
            Level::INFO,
            "added {} bus {} as {}",
            config.addressing,
            config.name,
            id
        );
        self.buses.push(Bus::new(id, config));
        id
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.buses.get(usize::from(id.0))
    }

    pub fn buses(&self) -> impl Iterator<Item = &Bus> {
        self.buses.iter()
    }

    fn bus_and_scheduler(&mut self, id: BusId) -> Option<(&mut Bus, &mut Scheduler)> {
        self.buses
            .get_mut(usize::from(id.0))
            .map(|bus| (bus, &mut self.scheduler))
    }

    pub fn attach(
        &mut self,
        bus: BusId,
        spec: &WindowSpec,
        device: Box<dyn BusDevice>,
    ) -> Result<DeviceRef, AttachError> {
        let (b, sched) = self
            .bus_and_scheduler(bus)
            .ok_or(AttachError::UnknownBus(bus))?;
        let window = b.attach(sched, spec, device)?;
        Ok(DeviceRef { bus, window })
    }

    pub fn detach(&mut self, device: DeviceRef) -> Result<Box<dyn BusDevice>, BusMisuse> {
        match self.bus_and_scheduler(device.bus) {
            Some((b, sched)) => b.detach(sched, device.window),
            None => {
                event!(Level::WARN, "cannot detach {}: no such bus", device);
                Err(BusMisuse::UnknownBus(device.bus))
            }
        }
    }

    pub fn read(&mut self, bus: BusId, address: BusAddress, width: Width) -> Result<u16, BusFault> {
        let (b, sched) = self
            .bus_and_scheduler(bus)
            .ok_or(BusFault::UnknownBus(bus))?;
        b.read(sched, address, width)
    }

    pub fn write(
        &mut self,
        bus: BusId,
        address: BusAddress,
        width: Width,
        value: u16,
    ) -> Result<(), BusFault> {
        let (b, sched) = self
            .bus_and_scheduler(bus)
            .ok_or(BusFault::UnknownBus(bus))?;
        b.write(sched, address, width, value)
    }

    pub fn send_interrupt(&mut self, device: DeviceRef, sub_index: usize) -> Result<(), BusMisuse> {
        match self.buses.get_mut(usize::from(device.bus.0)) {
            Some(b) => b.send_interrupt(device.window, sub_index),
            None => Err(BusMisuse::UnknownBus(device.bus)),
        }
    }

    pub fn cancel_interrupt(&mut self, device: DeviceRef, sub_index: usize) -> Result<(), BusMisuse> {
        match self.buses.get_mut(usize::from(device.bus.0)) {
            Some(b) => b.cancel_interrupt(device.window, sub_index),
            None => Err(BusMisuse::UnknownBus(device.bus)),
        }
    }

    #[must_use]
    pub fn poll_highest_interrupt(&self, bus: BusId) -> Option<PendingInterrupt> {
        self.bus(bus).and_then(Bus::poll_highest_interrupt)
    }

    /// Take the winning interrupt request on `bus` which is above the
    /// processor priority `cpu_level`.
    pub fn acknowledge_interrupt(&mut self, bus: BusId, cpu_level: u8) -> Option<PendingInterrupt> {
        self.buses
            .get_mut(usize::from(bus.0))
            .and_then(|b| b.acknowledge_interrupt_above(cpu_level))
    }

    #[must_use]
    pub fn global_time(&self) -> u64 {
        self.scheduler.global_time()
    }

    /// Advance simulated time by one tick.  The dispatcher calls
    /// this once per simulated instruction (or other unit of work).
    pub fn advance_one_tick(&mut self) {
        self.advance(1);
    }

    pub fn advance(&mut self, ticks: u64) {
        let tick_span = span!(Level::TRACE, "tick", t = self.scheduler.global_time());
        let _enter = tick_span.enter();
        let mut handler = BusSet(&mut self.buses);
        self.scheduler.advance(&mut handler, ticks);
    }

    /// Run the real-time timers for any wall-clock ticks which have
    /// happened since the last call.  Returns the number of ticks.
    pub fn service_wall_clock<W: WallClockSource + ?Sized>(&mut self, source: &mut W) -> u32 {
        let ticks = source.take_ticks();
        self.run_wall_ticks(ticks);
        ticks
    }

    fn run_wall_ticks(&mut self, ticks: u32) {
        let mut handler = BusSet(&mut self.buses);
        for _ in 0..ticks {
            self.scheduler.wall_tick(&mut handler);
        }
    }

    /// Called when the dispatcher has nothing to do (for example,
    /// the processor is waiting for an interrupt).  Waits for the
    /// next wall-clock tick, runs the real-time timers, and gives
    /// the corresponding amount of simulated time to the devices.
    /// Returns the number of simulated ticks which elapsed.
    pub fn idle<W: WallClockSource + ?Sized>(&mut self, source: &mut W) -> u64 {
        let limit = self.scheduler.config().wall_tick * 2;
        let ticks = source.wait_ticks(limit);
        self.run_wall_ticks(ticks);
        let mut handler = BusSet(&mut self.buses);
        self.scheduler.donate_idle(&mut handler, ticks)
    }
}

impl Default for System {
    fn default() -> System {
        System::new(SchedulerConfig::default())
    }
}
