//! A line-frequency clock.
//!
//! The clock has a single control/status register.  Each clock
//! period the "monitor" bit (bit 7) is set and, if interrupts are
//! enabled (bit 6), an interrupt is requested.  Software clears the
//! monitor bit by writing zero to it.
use tracing::{event, Level};

use base::prelude::*;

use super::{CSR_INTERRUPT_ENABLE, CSR_READY};
use crate::bus::{BusDevice, WindowSpec};
use crate::context::DeviceContext;
use crate::error::BusFault;
use crate::event::TimeBase;

/// The conventional address of the clock's register on an 18-bit
/// bus.  The clock answers wherever its window is placed.
pub const CSR_ADDRESS: BusAddress = BusAddress::new(0o777_546);

pub const VECTOR: VectorAddress = VectorAddress::new(0o100);

#[derive(Debug)]
pub struct LineClock {
    period: u64,
    csr: u16,
    timer: Option<TimerId>,
    ticks: u64,
}

impl LineClock {
    /// Create a clock which ticks every `period` simulated ticks.
    #[must_use]
    pub fn new(period: u64) -> LineClock {
        LineClock {
            period: period.max(1),
            csr: 0,
            timer: None,
            ticks: 0,
        }
    }

    /// The window a line clock normally occupies.
    #[must_use]
    pub fn window_spec() -> WindowSpec {
        WindowSpec::registers(CSR_ADDRESS, 1).with_vectors(Ipl::Br6, VECTOR, 1)
    }

    fn interrupts_enabled(&self) -> bool {
        self.csr & CSR_INTERRUPT_ENABLE != 0
    }

    fn update_interrupt(&self, ctx: &mut DeviceContext<'_>) {
        let result = if self.interrupts_enabled() && self.csr & CSR_READY != 0 {
            ctx.send_interrupt(0)
        } else {
            ctx.cancel_interrupt(0)
        };
        if let Err(e) = result {
            event!(Level::ERROR, "line clock has no interrupt vector: {}", e);
        }
    }
}

impl BusDevice for LineClock {
    fn name(&self) -> String {
        "line-clock".to_string()
    }

    fn on_attach(&mut self, ctx: &mut DeviceContext<'_>) {
        let timer = ctx.create_timer(TimeBase::Simulated);
        let period = i64::try_from(self.period).unwrap_or(i64::MAX);
        let armed = ctx
            .set_periodic(timer, Some(self.period))
            .and_then(|()| ctx.arm(timer, period));
        if let Err(e) = armed {
            event!(Level::ERROR, "line clock could not start its timer: {}", e);
        }
        self.timer = Some(timer);
    }

    fn read(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        address: BusAddress,
        width: Width,
    ) -> Result<u16, BusFault> {
        match ctx.register_offset(address) {
            Some(0) => Ok(self.csr),
            Some(1) => Ok(self.csr >> 8),
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
            Some(0) => {
                // The monitor bit can be cleared but not set.
                let monitor = self.csr & value & CSR_READY;
                self.csr = monitor | (value & CSR_INTERRUPT_ENABLE);
                self.update_interrupt(ctx);
                Ok(())
            }
            // The high byte has no writable bits.
            Some(1) => Ok(()),
            _ => Err(BusFault::NonExistentMemory { address, width }),
        }
    }

    fn on_timer(&mut self, ctx: &mut DeviceContext<'_>, _timer: TimerId) {
        self.ticks += 1;
        self.csr |= CSR_READY;
        event!(Level::TRACE, "line clock tick {} at {}", self.ticks, ctx.now());
        self.update_interrupt(ctx);
    }

    fn describe(&self) -> String {
        format!("csr={:06o} ticks={}", self.csr, self.ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, BusConfig};
    use crate::event::Scheduler;

    fn setup() -> (Bus, Scheduler, WindowHandle) {
        setup_with(BusConfig::default())
    }

    fn setup_with(config: BusConfig) -> (Bus, Scheduler, WindowHandle) {
        let mut bus = Bus::new(BusId(0), config);
        let mut sched = Scheduler::default();
        let h = bus
            .attach(&mut sched, &LineClock::window_spec(), Box::new(LineClock::new(10)))
            .unwrap();
        (bus, sched, h)
    }

    #[test]
    fn test_monitor_bit_is_set_each_period() {
        let (mut bus, mut sched, _) = setup();
        assert_eq!(bus.read(&mut sched, CSR_ADDRESS, Width::Word), Ok(0));
        sched.advance(&mut bus, 10);
        assert_eq!(bus.read(&mut sched, CSR_ADDRESS, Width::Word), Ok(CSR_READY));
        // Interrupts are not enabled yet.
        assert_eq!(bus.poll_highest_interrupt(), None);
        bus.write(&mut sched, CSR_ADDRESS, Width::Word, 0).unwrap();
        assert_eq!(bus.read(&mut sched, CSR_ADDRESS, Width::Word), Ok(0));
    }

    #[test]
    fn test_interrupt_when_enabled() {
        let (mut bus, mut sched, h) = setup();
        bus.write(&mut sched, CSR_ADDRESS, Width::Word, CSR_INTERRUPT_ENABLE)
            .unwrap();
        sched.advance(&mut bus, 9);
        assert_eq!(bus.poll_highest_interrupt(), None);
        sched.tick_and_fire(&mut bus);
        let p = bus.poll_highest_interrupt().unwrap();
        assert_eq!((p.vector, p.level, p.window), (VECTOR, Ipl::Br6, h));
        // Disabling interrupts withdraws the request.
        bus.write(&mut sched, CSR_ADDRESS, Width::Word, CSR_READY)
            .unwrap();
        assert_eq!(bus.poll_highest_interrupt(), None);
        assert!(bus.device(h).unwrap().describe().contains("ticks=1"));
    }

    #[test]
    fn test_writes_cannot_set_monitor_bit() {
        let (mut bus, mut sched, _) = setup();
        bus.write(&mut sched, CSR_ADDRESS, Width::Word, 0o177_777).unwrap();
        assert_eq!(
            bus.read(&mut sched, CSR_ADDRESS, Width::Word),
            Ok(CSR_INTERRUPT_ENABLE)
        );
    }

    #[test]
    fn test_16_bit_bus() {
        let (mut bus, mut sched, h) = setup_with(BusConfig {
            name: "qbus".to_string(),
            addressing: AddressingMode::Bits16,
        });
        let csr = addr!(0o177_546);
        bus.write(&mut sched, csr, Width::Word, CSR_INTERRUPT_ENABLE)
            .unwrap();
        assert_eq!(bus.read(&mut sched, csr, Width::Word), Ok(CSR_INTERRUPT_ENABLE));
        // The 18-bit address of the register reaches it too.
        assert_eq!(
            bus.read(&mut sched, CSR_ADDRESS, Width::Word),
            Ok(CSR_INTERRUPT_ENABLE)
        );
        assert_eq!(
            bus.read(&mut sched, addr!(0o177_550), Width::Word),
            Err(BusFault::NonExistentMemory {
                address: addr!(0o177_550),
                width: Width::Word
            })
        );
        sched.advance(&mut bus, 10);
        let p = bus.poll_highest_interrupt().unwrap();
        assert_eq!((p.vector, p.window), (VECTOR, h));
    }
}
