use std::cell::Cell;
use std::rc::Rc;

use base::prelude::*;

use super::*;
use crate::event::TimeBase;

/// A device with two registers.  Writing the first register starts
/// a 50-tick timer; when the timer expires the device requests an
/// interrupt.  The second register does not exist.
struct Probe {
    value: u16,
    timer: Option<TimerId>,
    attached: Rc<Cell<bool>>,
}

impl Probe {
    fn new() -> Probe {
        Probe {
            value: 0,
            timer: None,
            attached: Rc::new(Cell::new(false)),
        }
    }
}

impl BusDevice for Probe {
    fn name(&self) -> String {
        "probe".to_string()
    }

    fn on_attach(&mut self, ctx: &mut DeviceContext<'_>) {
        assert_eq!(ctx.registers().len(), 4);
        self.timer = Some(ctx.create_timer(TimeBase::Simulated));
        self.attached.set(true);
    }

    fn read(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        address: BusAddress,
        width: Width,
    ) -> Result<u16, BusFault> {
        match ctx.register_offset(address) {
            Some(0 | 1) => Ok(self.value),
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
                self.value = value;
                if let Some(t) = self.timer {
                    ctx.arm(t, 50).expect("timer should not be pending");
                }
                Ok(())
            }
            _ => Err(BusFault::NonExistentMemory { address, width }),
        }
    }

    fn on_timer(&mut self, ctx: &mut DeviceContext<'_>, timer: TimerId) {
        assert_eq!(Some(timer), self.timer);
        assert!(!ctx.interrupt_requested(0));
        ctx.send_interrupt(0).expect("device should have a vector");
        assert!(ctx.interrupt_requested(0));
    }
}

/// A device which answers every access and has no timers.
struct Dummy(&'static str);

impl BusDevice for Dummy {
    fn name(&self) -> String {
        self.0.to_string()
    }

    fn read(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _address: BusAddress,
        _width: Width,
    ) -> Result<u16, BusFault> {
        Ok(0o177_777)
    }

    fn write(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _address: BusAddress,
        _width: Width,
        _value: u16,
    ) -> Result<(), BusFault> {
        Ok(())
    }
}

fn make_bus(addressing: AddressingMode) -> (Bus, Scheduler) {
    let bus = Bus::new(
        BusId(0),
        BusConfig {
            name: "test".to_string(),
            addressing,
        },
    );
    (bus, Scheduler::default())
}

#[test]
fn test_overlapping_windows_are_rejected() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o160_000), 1),
        Box::new(Dummy("first")),
    )
    .expect("first attach should succeed");
    let before = bus.status();
    match bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o160_001), 1),
        Box::new(Dummy("second")),
    ) {
        Err(AttachError::AddressConflict {
            requested,
            existing,
            existing_device,
        }) => {
            assert_eq!(requested, AddressRange::new(addr!(0o160_001), 2));
            assert_eq!(existing, AddressRange::new(addr!(0o160_000), 2));
            assert_eq!(existing_device, "first");
        }
        other => panic!("expected an address conflict, got {other:?}"),
    }
    assert_eq!(bus.status(), before);
    // An adjacent window is fine.
    bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o160_002), 1),
        Box::new(Dummy("third")),
    )
    .expect("adjacent window should be accepted");
}

#[test]
fn test_read_of_unmapped_address_is_nonexistent_memory() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    assert_eq!(
        bus.read(&mut sched, addr!(0o777_000), Width::Word),
        Err(BusFault::NonExistentMemory {
            address: addr!(0o777_000),
            width: Width::Word
        })
    );
    assert_eq!(bus.stats().nonexistent, 1);
    assert_eq!(bus.stats().reads, 0);
}

#[test]
fn test_device_may_report_nonexistent_register() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o777_514), 2).with_vectors(Ipl::Br4, vector!(0o200), 1),
        Box::new(Probe::new()),
    )
    .unwrap();
    assert!(bus.read(&mut sched, addr!(0o777_516), Width::Word).is_err());
    assert_eq!(bus.read(&mut sched, addr!(0o777_514), Width::Word), Ok(0));
}

#[test]
fn test_interrupt_priority_ordering() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    let low = bus
        .attach(
            &mut sched,
            &WindowSpec::vectors_only().with_vectors(Ipl::Br4, vector!(0o060), 2),
            Box::new(Dummy("low")),
        )
        .unwrap();
    let high = bus
        .attach(
            &mut sched,
            &WindowSpec::vectors_only().with_vectors(Ipl::Br6, vector!(0o100), 1),
            Box::new(Dummy("high")),
        )
        .unwrap();
    bus.send_interrupt(low, 1).unwrap();
    bus.send_interrupt(high, 0).unwrap();
    bus.send_interrupt(low, 0).unwrap();

    let p = bus.poll_highest_interrupt().unwrap();
    assert_eq!((p.vector, p.level), (vector!(0o100), Ipl::Br6));
    // Polling changes nothing.
    assert_eq!(bus.poll_highest_interrupt(), Some(p));
    // A processor at priority 6 does not see the BR6 request.
    let p = bus.poll_interrupt_above(6);
    assert_eq!(p, None);
    let p = bus.poll_interrupt_above(5).unwrap();
    assert_eq!(p.window, high);

    bus.cancel_interrupt(high, 0).unwrap();
    let p = bus.poll_highest_interrupt().unwrap();
    assert_eq!((p.vector, p.level), (vector!(0o060), Ipl::Br4));

    assert_eq!(bus.acknowledge_interrupt().map(|p| p.vector), Some(vector!(0o060)));
    assert_eq!(bus.slot_state(Ipl::Br4, 0), SlotState::Reserved(low));
    assert_eq!(bus.slot_state(Ipl::Br4, 1), SlotState::Requesting(low));
    assert_eq!(
        bus.acknowledge_interrupt_above(4).map(|p| p.vector),
        None
    );
    assert_eq!(bus.acknowledge_interrupt().map(|p| p.vector), Some(vector!(0o064)));
    assert_eq!(bus.poll_highest_interrupt(), None);
}

#[test]
fn test_timer_driven_interrupt_end_to_end() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    let probe = Probe::new();
    let attached = Rc::clone(&probe.attached);
    bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o777_514), 2).with_vectors(Ipl::Br4, vector!(0o200), 1),
        Box::new(probe),
    )
    .unwrap();
    assert!(attached.get());

    bus.write(&mut sched, addr!(0o777_514), Width::Word, 1).unwrap();
    sched.advance(&mut bus, 49);
    assert_eq!(bus.poll_highest_interrupt(), None);
    sched.tick_and_fire(&mut bus);
    let p = bus.poll_highest_interrupt().expect("interrupt should be pending");
    assert_eq!((p.vector, p.level), (vector!(0o200), Ipl::Br4));
    assert_eq!(sched.global_time(), 50);
}

#[test]
fn test_attach_then_detach_restores_initial_state() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o777_546), 1).with_vectors(Ipl::Br6, vector!(0o100), 1),
        Box::new(Dummy("clock")),
    )
    .unwrap();
    let initial = bus.status();

    let handle = bus
        .attach(
            &mut sched,
            &WindowSpec::registers(addr!(0o777_514), 2)
                .with_vectors(Ipl::Br4, vector!(0o200), 1)
                .with_vectors(Ipl::Br5, vector!(0o204), 2),
            Box::new(Probe::new()),
        )
        .unwrap();
    bus.write(&mut sched, addr!(0o777_514), Width::Word, 1).unwrap();
    bus.send_interrupt(handle, 2).unwrap();
    assert_ne!(bus.status(), initial);
    assert_eq!(sched.pending_count(), 1);

    let device = bus.detach(&mut sched, handle).expect("should detach");
    assert_eq!(device.name(), "probe");
    assert_eq!(bus.status(), initial);
    assert_eq!(sched.pending_count(), 0);
    assert_eq!(bus.poll_highest_interrupt(), None);

    // The handle is now stale.
    assert!(bus.device(handle).is_none());
    assert_eq!(
        bus.send_interrupt(handle, 0),
        Err(BusMisuse::UnknownWindow(handle))
    );
    assert!(matches!(
        bus.detach(&mut sched, handle),
        Err(BusMisuse::UnknownWindow(h)) if h == handle
    ));
    assert_eq!(bus.stats().misuse, 2);
}

#[test]
fn test_attach_then_detach_on_empty_bus_leaves_it_empty() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    let handle = bus
        .attach(
            &mut sched,
            &WindowSpec::registers(addr!(0o777_514), 2)
                .with_vectors(Ipl::Br4, vector!(0o200), 1)
                .with_vectors(Ipl::Br7, vector!(0o210), 3),
            Box::new(Probe::new()),
        )
        .unwrap();
    bus.send_interrupt(handle, 0).unwrap();
    bus.send_interrupt(handle, 3).unwrap();
    bus.detach(&mut sched, handle).expect("should detach");

    let status = bus.status();
    assert!(status.windows.is_empty());
    assert_eq!(status.levels.len(), 4);
    for level in &status.levels {
        assert!(level.reserved.is_empty(), "{:?} still reserved", level.level);
        assert!(level.requesting.is_empty(), "{:?} still requesting", level.level);
    }
    assert_eq!(bus.window_count(), 0);
    assert_eq!(
        bus.read(&mut sched, addr!(0o777_514), Width::Word),
        Err(BusFault::NonExistentMemory {
            address: addr!(0o777_514),
            width: Width::Word
        })
    );
}

#[test]
fn test_vector_exhaustion_leaves_bus_unchanged() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    bus.attach(
        &mut sched,
        &WindowSpec::vectors_only().with_vectors(Ipl::Br5, vector!(0o300), 30),
        Box::new(Dummy("mux")),
    )
    .unwrap();
    let before = bus.status();
    let result = bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o776_500), 4)
            .with_vectors(Ipl::Br4, vector!(0o040), 1)
            .with_vectors(Ipl::Br5, vector!(0o500), 4),
        Box::new(Dummy("greedy")),
    );
    assert_eq!(
        result,
        Err(AttachError::VectorSpaceExhausted {
            level: Ipl::Br5,
            requested: 4,
            free: 2,
        })
    );
    assert_eq!(bus.status(), before);
    assert_eq!(bus.slot_state(Ipl::Br4, 0), SlotState::Free);
    assert!(bus.read(&mut sched, addr!(0o776_500), Width::Word).is_err());
}

#[test]
fn test_invalid_windows_are_rejected() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits16);
    assert!(matches!(
        bus.attach(
            &mut sched,
            &WindowSpec::registers(addr!(0o177_776), 2),
            Box::new(Dummy("too-high")),
        ),
        Err(AttachError::InvalidWindow { .. })
    ));
    assert!(matches!(
        bus.attach(
            &mut sched,
            &WindowSpec::vectors_only().with_vectors(Ipl::Br4, vector!(0o60), 0),
            Box::new(Dummy("no-vectors")),
        ),
        Err(AttachError::InvalidWindow { .. })
    ));
    assert_eq!(bus.window_count(), 0);
}

#[test]
fn test_sixteen_bit_bus_normalises_addresses() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits16);
    bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o777_514), 2).with_vectors(Ipl::Br4, vector!(0o200), 1),
        Box::new(Probe::new()),
    )
    .unwrap();
    let status = bus.status();
    assert_eq!(status.windows[0].registers.base(), addr!(0o177_514));
    bus.write(&mut sched, addr!(0o177_514), Width::Word, 0o123).unwrap();
    // Bits above the bottom 16 are ignored.
    assert_eq!(bus.read(&mut sched, addr!(0o777_514), Width::Word), Ok(0o123));
}

#[test]
fn test_byte_reads_are_masked() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    bus.attach(
        &mut sched,
        &WindowSpec::registers(addr!(0o760_000), 1),
        Box::new(Dummy("ones")),
    )
    .unwrap();
    assert_eq!(bus.read(&mut sched, addr!(0o760_001), Width::Byte), Ok(0o377));
    assert_eq!(bus.read(&mut sched, addr!(0o760_000), Width::Word), Ok(0o177_777));
}

#[test]
fn test_windows_at_same_address_are_ordered_by_relative_priority() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    let b = bus
        .attach(
            &mut sched,
            &WindowSpec::vectors_only()
                .with_vectors(Ipl::Br7, vector!(0o010), 1)
                .with_relative_priority(2),
            Box::new(Dummy("b")),
        )
        .unwrap();
    let a = bus
        .attach(
            &mut sched,
            &WindowSpec::vectors_only()
                .with_vectors(Ipl::Br7, vector!(0o014), 1)
                .with_relative_priority(1),
            Box::new(Dummy("a")),
        )
        .unwrap();
    let order: Vec<WindowHandle> = bus.status().windows.iter().map(|w| w.handle).collect();
    assert_eq!(order, vec![a, b]);
    assert_eq!(bus.device(a).map(|d| d.name()), Some("a".to_string()));
}

#[test]
fn test_unknown_vector_index_is_misuse() {
    let (mut bus, mut sched) = make_bus(AddressingMode::Bits18);
    let h = bus
        .attach(
            &mut sched,
            &WindowSpec::vectors_only().with_vectors(Ipl::Br4, vector!(0o060), 1),
            Box::new(Dummy("one")),
        )
        .unwrap();
    assert_eq!(
        bus.send_interrupt(h, 3),
        Err(BusMisuse::NoSuchVector {
            window: h,
            sub_index: 3
        })
    );
    assert_eq!(bus.stats().misuse, 1);
    assert_eq!(bus.poll_highest_interrupt(), None);
}
