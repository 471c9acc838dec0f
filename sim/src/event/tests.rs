use std::collections::HashMap;

use base::prelude::*;

use super::*;

fn owner(n: u32) -> DeviceRef {
    DeviceRef {
        bus: BusId(0),
        window: WindowHandle::from_parts(n, 0),
    }
}

/// Records which timers fired when, and optionally reacts to them.
#[derive(Debug, Default)]
struct Recorder {
    fired: Vec<(u64, TimerId)>,
    /// When the key fires, cancel the value.
    cancels: HashMap<TimerId, TimerId>,
    /// When the key fires, arm the value with the given interval.
    arms: HashMap<TimerId, (TimerId, i64)>,
}

impl TimerHandler for Recorder {
    fn on_timer(&mut self, scheduler: &mut Scheduler, fired: FiredTimer) {
        let when = match fired.base {
            TimeBase::Simulated => scheduler.global_time(),
            TimeBase::RealTime => scheduler.wall_ticks(),
        };
        self.fired.push((when, fired.timer));
        if let Some(victim) = self.cancels.get(&fired.timer) {
            scheduler.cancel(*victim).expect("victim should exist");
        }
        if let Some((other, interval)) = self.arms.get(&fired.timer) {
            scheduler.arm(*other, *interval).expect("should be able to arm");
        }
    }
}

fn sim_timers(sched: &mut Scheduler, n: u32) -> Vec<TimerId> {
    (0..n)
        .map(|i| sched.create_timer(owner(i), TimeBase::Simulated))
        .collect()
}

#[test]
fn test_fires_at_arm_time_plus_interval() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 3);
    let mut rec = Recorder::default();
    sched.arm(t[0], 10).unwrap();
    sched.arm(t[1], 3).unwrap();
    sched.advance(&mut rec, 5);
    sched.arm(t[2], 1).unwrap();
    sched.advance(&mut rec, 10);
    assert_eq!(rec.fired, vec![(3, t[1]), (6, t[2]), (10, t[0])]);
    assert_eq!(sched.global_time(), 15);
}

#[test]
fn test_same_tick_timers_fire_in_arming_order() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 3);
    let mut rec = Recorder::default();
    sched.arm(t[2], 4).unwrap();
    sched.arm(t[0], 4).unwrap();
    sched.arm(t[1], 4).unwrap();
    sched.advance(&mut rec, 4);
    assert_eq!(rec.fired, vec![(4, t[2]), (4, t[0]), (4, t[1])]);
}

#[test]
fn test_zero_interval_fires_at_next_drain() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 1);
    let mut rec = Recorder::default();
    sched.arm(t[0], 0).unwrap();
    assert!(sched.is_pending(t[0]));
    sched.tick_and_fire(&mut rec);
    // It fires before the clock moves, so it carries the old time.
    assert_eq!(rec.fired, vec![(0, t[0])]);
    assert_eq!(sched.global_time(), 1);
    assert!(!sched.is_pending(t[0]));
}

#[test]
fn test_double_arm_is_rejected_and_first_arming_stands() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 1);
    let mut rec = Recorder::default();
    sched.arm(t[0], 5).unwrap();
    assert_eq!(sched.arm(t[0], 2), Err(TimerMisuse::AlreadyPending(t[0])));
    assert_eq!(sched.stats().misuse, 1);
    assert_eq!(sched.pending_timers(), vec![(t[0], 5)]);
    sched.advance(&mut rec, 10);
    assert_eq!(rec.fired, vec![(5, t[0])]);
}

#[test]
fn test_negative_interval_is_rejected() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 1);
    assert_eq!(
        sched.arm(t[0], -1),
        Err(TimerMisuse::NegativeInterval {
            timer: t[0],
            interval: -1
        })
    );
    assert!(!sched.is_pending(t[0]));
    assert_eq!(sched.pending_count(), 0);
}

#[test]
fn test_cancel_leaves_other_expiry_times_alone() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 4);
    let mut rec = Recorder::default();
    sched.arm(t[0], 2).unwrap();
    sched.arm(t[1], 6).unwrap();
    sched.arm(t[2], 9).unwrap();
    sched.arm(t[3], 9).unwrap();
    sched.advance(&mut rec, 1);
    sched.cancel(t[1]).unwrap();
    assert_eq!(sched.pending_timers(), vec![(t[0], 2), (t[2], 9), (t[3], 9)]);
    // Cancelling something which is not pending does nothing.
    sched.cancel(t[1]).unwrap();
    assert_eq!(sched.stats().misuse, 0);
    sched.advance(&mut rec, 20);
    assert_eq!(rec.fired, vec![(2, t[0]), (9, t[2]), (9, t[3])]);
    assert_eq!(sched.stats().cancelled, 1);
}

#[test]
fn test_callback_can_cancel_timer_due_on_same_tick() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 3);
    let mut rec = Recorder::default();
    rec.cancels.insert(t[0], t[1]);
    sched.arm(t[0], 3).unwrap();
    sched.arm(t[1], 3).unwrap();
    sched.arm(t[2], 3).unwrap();
    sched.advance(&mut rec, 3);
    assert_eq!(rec.fired, vec![(3, t[0]), (3, t[2])]);
}

#[test]
fn test_callback_zero_interval_arm_fires_in_same_drain() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 2);
    let mut rec = Recorder::default();
    rec.arms.insert(t[0], (t[1], 0));
    sched.arm(t[0], 1).unwrap();
    sched.tick_and_fire(&mut rec);
    assert_eq!(rec.fired, vec![(1, t[0]), (1, t[1])]);
    assert_eq!(sched.global_time(), 1);
}

#[test]
fn test_periodic_timer_rearms_before_callback() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 1);
    let mut rec = Recorder::default();
    sched.set_periodic(t[0], Some(4)).unwrap();
    sched.arm(t[0], 4).unwrap();
    sched.advance(&mut rec, 12);
    assert_eq!(rec.fired, vec![(4, t[0]), (8, t[0]), (12, t[0])]);
    assert!(sched.is_pending(t[0]));
    assert_eq!(sched.pending_timers(), vec![(t[0], 16)]);
    // The first arm plus one re-arm per firing.
    let stats = sched.stats();
    assert_eq!((stats.armed, stats.fired), (4, 3));
}

#[test]
fn test_periodic_timer_can_cancel_itself() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 1);
    let mut rec = Recorder::default();
    rec.cancels.insert(t[0], t[0]);
    sched.set_periodic(t[0], Some(2)).unwrap();
    sched.arm(t[0], 2).unwrap();
    sched.advance(&mut rec, 10);
    assert_eq!(rec.fired, vec![(2, t[0])]);
    assert!(!sched.is_pending(t[0]));
}

#[test]
fn test_zero_period_is_rejected() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 1);
    assert_eq!(
        sched.set_periodic(t[0], Some(0)),
        Err(TimerMisuse::ZeroPeriod(t[0]))
    );
}

#[test]
fn test_disabled_timer_cannot_be_armed() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 1);
    let mut rec = Recorder::default();
    sched.arm(t[0], 3).unwrap();
    sched.set_enabled(t[0], false).unwrap();
    assert!(!sched.is_pending(t[0]));
    assert_eq!(sched.arm(t[0], 3), Err(TimerMisuse::Disabled(t[0])));
    sched.advance(&mut rec, 10);
    assert!(rec.fired.is_empty());
    sched.set_enabled(t[0], true).unwrap();
    sched.arm(t[0], 3).unwrap();
    sched.advance(&mut rec, 10);
    assert_eq!(rec.fired, vec![(13, t[0])]);
}

#[test]
fn test_destroyed_timer_is_unknown() {
    let mut sched = Scheduler::default();
    let t = sim_timers(&mut sched, 2);
    let mut rec = Recorder::default();
    sched.arm(t[0], 3).unwrap();
    sched.destroy_timer(t[0]).unwrap();
    assert_eq!(sched.arm(t[0], 1), Err(TimerMisuse::UnknownTimer(t[0])));
    assert_eq!(sched.owner_of(t[0]), None);
    // The slot is reused, but the old identifier stays dead.
    let again = sched.create_timer(owner(7), TimeBase::Simulated);
    assert_ne!(again, t[0]);
    assert_eq!(sched.owner_of(again), Some(owner(7)));
    sched.advance(&mut rec, 5);
    assert!(rec.fired.is_empty());
}

#[test]
fn test_destroy_timers_owned_by() {
    let mut sched = Scheduler::default();
    let a = sched.create_timer(owner(1), TimeBase::Simulated);
    let b = sched.create_timer(owner(1), TimeBase::RealTime);
    let c = sched.create_timer(owner(2), TimeBase::Simulated);
    sched.arm(a, 5).unwrap();
    sched.arm(b, 5).unwrap();
    sched.arm(c, 5).unwrap();
    assert_eq!(sched.destroy_timers_owned_by(owner(1)), 2);
    assert_eq!(sched.pending_count(), 1);
    assert!(sched.is_pending(c));
    assert_eq!(sched.owner_of(a), None);
    assert_eq!(sched.owner_of(b), None);
}

#[test]
fn test_idle_time_is_folded_into_global_time() {
    let mut sched = Scheduler::default();
    let mut rec = Recorder::default();
    sched.advance(&mut rec, 1000);
    assert_eq!(sched.global_time(), 1000);
    let t = sim_timers(&mut sched, 1);
    sched.arm(t[0], 1).unwrap();
    sched.tick_and_fire(&mut rec);
    assert_eq!(rec.fired, vec![(1001, t[0])]);
}

#[test]
fn test_donate_idle_converts_wall_ticks() {
    let mut sched = Scheduler::new(SchedulerConfig {
        sim_ticks_per_wall_tick: 100,
        ..SchedulerConfig::default()
    });
    let t = sim_timers(&mut sched, 1);
    let mut rec = Recorder::default();
    sched.arm(t[0], 250).unwrap();
    assert_eq!(sched.donate_idle(&mut rec, 3), 300);
    assert_eq!(rec.fired, vec![(250, t[0])]);
    assert_eq!(sched.global_time(), 300);
}

#[test]
fn test_global_time_saturates() {
    let mut sched = Scheduler::new(SchedulerConfig {
        sim_ticks_per_wall_tick: u64::MAX,
        ..SchedulerConfig::default()
    });
    let mut rec = Recorder::default();
    assert_eq!(sched.donate_idle(&mut rec, 2), u64::MAX);
    assert_eq!(sched.global_time(), u64::MAX);
    sched.donate_idle(&mut rec, 1);
    assert_eq!(sched.global_time(), u64::MAX);

    let t = sim_timers(&mut sched, 1);
    sched.arm(t[0], 5).unwrap();
    assert_eq!(sched.pending_timers(), vec![(t[0], u64::MAX)]);
    sched.advance(&mut rec, 5);
    assert_eq!(rec.fired, vec![(u64::MAX, t[0])]);
}

#[test]
fn test_realtime_timers_do_not_see_simulated_time() {
    let mut sched = Scheduler::default();
    let rt = sched.create_timer(owner(1), TimeBase::RealTime);
    let mut rec = Recorder::default();
    sched.arm(rt, 2).unwrap();
    assert_eq!(sched.realtime_deadline(rt), Some(2));
    sched.advance(&mut rec, 100);
    assert!(rec.fired.is_empty());
    sched.wall_tick(&mut rec);
    assert!(rec.fired.is_empty());
    sched.wall_tick(&mut rec);
    assert_eq!(rec.fired, vec![(2, rt)]);
}

#[test]
fn test_periodic_realtime_timer() {
    let mut sched = Scheduler::default();
    let rt = sched.create_timer(owner(1), TimeBase::RealTime);
    let mut rec = Recorder::default();
    sched.set_periodic(rt, Some(3)).unwrap();
    sched.arm(rt, 3).unwrap();
    for _ in 0..9 {
        sched.wall_tick(&mut rec);
    }
    assert_eq!(rec.fired, vec![(3, rt), (6, rt), (9, rt)]);
    let stats = sched.stats();
    assert_eq!((stats.armed, stats.fired), (4, 3));
    sched.cancel(rt).unwrap();
    assert_eq!(sched.realtime_deadline(rt), None);
}

#[test]
fn test_every_expired_realtime_timer_fires_on_one_tick() {
    let mut sched = Scheduler::default();
    let a = sched.create_timer(owner(1), TimeBase::RealTime);
    let b = sched.create_timer(owner(2), TimeBase::RealTime);
    let mut rec = Recorder::default();
    sched.arm(b, 1).unwrap();
    sched.arm(a, 1).unwrap();
    sched.wall_tick(&mut rec);
    assert_eq!(rec.fired, vec![(1, b), (1, a)]);
}

mod proptests {
    use std::collections::BTreeMap;

    use proptest::collection::vec;
    use proptest::prelude::any;
    use test_strategy::{proptest, Arbitrary};

    use super::*;

    const TIMERS: usize = 5;

    #[derive(Debug, Clone, Arbitrary)]
    enum Op {
        Arm(#[strategy(0..TIMERS)] usize, #[strategy(0..40i64)] i64),
        Cancel(#[strategy(0..TIMERS)] usize),
        Advance(#[strategy(0..30u64)] u64),
    }

    #[derive(Debug, Arbitrary)]
    struct Script {
        #[strategy(vec(any::<Op>(), 1..80))]
        ops: Vec<Op>,
    }

    /// Checks the delta queue against a model which keeps absolute
    /// expiry times.
    #[proptest]
    fn timers_fire_exactly_when_due_in_arming_order(script: Script) {
        let mut sched = Scheduler::default();
        let timers = sim_timers(&mut sched, TIMERS as u32);
        let mut rec = Recorder::default();
        // timer index -> (due, arming sequence number)
        let mut model: BTreeMap<usize, (u64, u64)> = BTreeMap::new();
        let mut seq: u64 = 0;
        let mut expected: Vec<(u64, TimerId)> = Vec::new();

        for op in script.ops {
            match op {
                Op::Arm(i, interval) => {
                    let result = sched.arm(timers[i], interval);
                    if model.contains_key(&i) {
                        assert_eq!(result, Err(TimerMisuse::AlreadyPending(timers[i])));
                    } else {
                        assert_eq!(result, Ok(()));
                        model.insert(i, (sched.global_time() + interval as u64, seq));
                        seq += 1;
                    }
                }
                Op::Cancel(i) => {
                    assert_eq!(sched.cancel(timers[i]), Ok(()));
                    model.remove(&i);
                }
                Op::Advance(n) => {
                    let until = sched.global_time() + n;
                    let mut due: Vec<(u64, u64, usize)> = model
                        .iter()
                        .filter(|(_, (when, _))| *when <= until)
                        .map(|(i, (when, s))| (*when, *s, *i))
                        .collect();
                    due.sort();
                    for (when, _, i) in due {
                        model.remove(&i);
                        expected.push((when, timers[i]));
                    }
                    sched.advance(&mut rec, n);
                    assert_eq!(sched.global_time(), until);
                }
            }
            for (i, t) in timers.iter().enumerate() {
                assert_eq!(sched.is_pending(*t), model.contains_key(&i));
            }
        }
        assert_eq!(rec.fired, expected);
    }
}
