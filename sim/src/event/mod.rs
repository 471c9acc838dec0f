//! The event scheduler.
//!
//! Devices model the passage of time by arming timers.  A timer
//! belongs to one device and measures either simulated ticks (the
//! delta queue, advanced by the dispatcher) or wall-clock ticks (the
//! real-time list, advanced by a [`crate::WallClockSource`]).  When a
//! timer expires the scheduler calls a [`TimerHandler`], which
//! (normally) routes the call to the device that owns the timer.
//!
//! Everything here runs on the emulation thread.  A timer callback
//! may arm or cancel any timer, including the one that fired and the
//! ones due on the same tick; the firing loop looks at the head of
//! the queue afresh after every callback.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use base::prelude::*;

use crate::error::TimerMisuse;

mod delta;
mod realtime;

#[cfg(test)]
mod tests;

use delta::DeltaQueue;
use realtime::RealTimeQueue;

/// Which clock a timer measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeBase {
    /// Simulated ticks; deterministic.
    Simulated,
    /// Wall-clock ticks; used only for operator-visible pacing.
    RealTime,
}

/// Describes a timer which has just expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub timer: TimerId,
    pub owner: DeviceRef,
    pub base: TimeBase,
}

/// Receives expired timers.
pub trait TimerHandler {
    fn on_timer(&mut self, scheduler: &mut Scheduler, fired: FiredTimer);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period of the wall-clock tick which drives the real-time list.
    pub wall_tick: Duration,

    /// How many simulated ticks an idle dispatcher gives away for
    /// each wall-clock tick it spends waiting.
    pub sim_ticks_per_wall_tick: u64,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            wall_tick: crate::clock::DEFAULT_WALL_TICK,
            sim_ticks_per_wall_tick: 10_000,
        }
    }
}

/// Counters, mainly for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub armed: u64,
    pub fired: u64,
    pub cancelled: u64,
    pub misuse: u64,
}

#[derive(Debug)]
struct TimerSlot {
    owner: DeviceRef,
    base: TimeBase,
    pending: bool,
    enabled: bool,
    /// When set, the timer is periodic and is re-armed with this
    /// interval each time it fires.
    requeue_interval: Option<u64>,
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    timers: Arena<TimerId, TimerSlot>,
    queue: DeltaQueue,
    realtime: RealTimeQueue,
    now: u64,
    stats: SchedulerStats,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Scheduler {
        Scheduler {
            config,
            timers: Arena::new(),
            queue: DeltaQueue::new(),
            realtime: RealTimeQueue::new(),
            now: 0,
            stats: SchedulerStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// The number of simulated ticks which have elapsed.
    #[must_use]
    pub fn global_time(&self) -> u64 {
        self.now
    }

    /// The number of wall-clock ticks the real-time list has seen.
    #[must_use]
    pub fn wall_ticks(&self) -> u64 {
        self.realtime.now()
    }

    pub(crate) fn report(&mut self, misuse: TimerMisuse) -> TimerMisuse {
        self.stats.misuse += 1;
        event!(Level::WARN, "timer request ignored: {}", misuse);
        misuse
    }

    /// Create an (unarmed) timer belonging to `owner`.
    pub fn create_timer(&mut self, owner: DeviceRef, base: TimeBase) -> TimerId {
        let id = self.timers.insert(TimerSlot {
            owner,
            base,
            pending: false,
            enabled: true,
            requeue_interval: None,
        });
        event!(Level::DEBUG, "created {:?} {} for {}", base, id, owner);
        id
    }

    /// Cancel and forget a timer.  `timer` is invalid afterwards.
    pub fn destroy_timer(&mut self, timer: TimerId) -> Result<(), TimerMisuse> {
        self.cancel(timer)?;
        match self.timers.remove(timer) {
            Some(_) => Ok(()),
            None => unreachable!("cancel() accepted {timer} but it is not in the arena"),
        }
    }

    /// Destroy every timer belonging to `owner`, returning how many
    /// there were.  Used when a device is detached.
    pub fn destroy_timers_owned_by(&mut self, owner: DeviceRef) -> usize {
        let doomed: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, slot)| slot.owner == owner)
            .map(|(id, _)| id)
            .collect();
        for id in doomed.iter() {
            if let Err(e) = self.destroy_timer(*id) {
                unreachable!("failed to destroy timer {id} which we just found: {e}");
            }
        }
        doomed.len()
    }

    #[must_use]
    pub fn owner_of(&self, timer: TimerId) -> Option<DeviceRef> {
        self.timers.get(timer).map(|slot| slot.owner)
    }

    #[must_use]
    pub fn is_pending(&self, timer: TimerId) -> bool {
        self.timers.get(timer).is_some_and(|slot| slot.pending)
    }

    /// Make `timer` periodic (with `Some(interval)`) or one-shot
    /// (with `None`).  This does not arm the timer.
    pub fn set_periodic(
        &mut self,
        timer: TimerId,
        interval: Option<u64>,
    ) -> Result<(), TimerMisuse> {
        if interval == Some(0) {
            return Err(self.report(TimerMisuse::ZeroPeriod(timer)));
        }
        match self.timers.get_mut(timer) {
            Some(slot) => {
                slot.requeue_interval = interval;
                Ok(())
            }
            None => Err(self.report(TimerMisuse::UnknownTimer(timer))),
        }
    }

    /// Enable or disable `timer`.  Disabling a pending timer cancels
    /// it; a disabled timer cannot be armed.
    pub fn set_enabled(&mut self, timer: TimerId, enabled: bool) -> Result<(), TimerMisuse> {
        if !enabled {
            self.cancel(timer)?;
        }
        match self.timers.get_mut(timer) {
            Some(slot) => {
                slot.enabled = enabled;
                Ok(())
            }
            None => Err(self.report(TimerMisuse::UnknownTimer(timer))),
        }
    }

    /// Arm `timer` to expire after `interval` ticks of its time base.
    ///
    /// A zero interval expires at the next opportunity: during the
    /// firing loop already in progress if called from a callback,
    /// otherwise at the start of the next drain (`advance` or
    /// `tick_and_fire`), stamped with the current time because it
    /// fires before the clock moves.  Arming a timer which is already
    /// pending, or with a negative interval, is reported and ignored.
    pub fn arm(&mut self, timer: TimerId, interval: i64) -> Result<(), TimerMisuse> {
        let base = match self.timers.get_mut(timer) {
            None => {
                return Err(self.report(TimerMisuse::UnknownTimer(timer)));
            }
            Some(slot) if !slot.enabled => {
                return Err(self.report(TimerMisuse::Disabled(timer)));
            }
            Some(slot) if slot.pending => {
                return Err(self.report(TimerMisuse::AlreadyPending(timer)));
            }
            Some(_) if interval < 0 => {
                return Err(self.report(TimerMisuse::NegativeInterval { timer, interval }));
            }
            Some(slot) => {
                slot.pending = true;
                slot.base
            }
        };
        let ticks = interval.unsigned_abs();
        self.enqueue(timer, base, ticks);
        Ok(())
    }

    fn enqueue(&mut self, timer: TimerId, base: TimeBase, ticks: u64) {
        self.stats.armed += 1;
        match base {
            TimeBase::Simulated => {
                if self.queue.is_empty() {
                    event!(
                        Level::TRACE,
                        "queue was idle; global time is {} as {} is armed",
                        self.now,
                        timer
                    );
                }
                self.queue.insert(timer, ticks);
                event!(
                    Level::TRACE,
                    "{} armed, due at tick {}",
                    timer,
                    self.now.saturating_add(ticks)
                );
            }
            TimeBase::RealTime => {
                let deadline = self.realtime.insert(timer, ticks);
                event!(
                    Level::TRACE,
                    "real-time {} armed, due at wall tick {}",
                    timer,
                    deadline
                );
            }
        }
    }

    /// Cancel `timer` if it is pending.  Cancelling a timer which is
    /// not pending does nothing.
    pub fn cancel(&mut self, timer: TimerId) -> Result<(), TimerMisuse> {
        let base = match self.timers.get_mut(timer) {
            None => {
                return Err(self.report(TimerMisuse::UnknownTimer(timer)));
            }
            Some(slot) if !slot.pending => {
                return Ok(());
            }
            Some(slot) => {
                slot.pending = false;
                slot.base
            }
        };
        let removed = match base {
            TimeBase::Simulated => self.queue.remove(timer),
            TimeBase::RealTime => self.realtime.remove(timer),
        };
        assert!(
            removed.is_some(),
            "{timer} was marked pending but was not queued"
        );
        self.stats.cancelled += 1;
        event!(Level::TRACE, "{} cancelled", timer);
        Ok(())
    }

    /// The pending simulated-time timers in firing order, with the
    /// absolute tick at which each will fire.
    #[must_use]
    pub fn pending_timers(&self) -> Vec<(TimerId, u64)> {
        self.queue
            .expiry_offsets()
            .into_iter()
            .map(|(id, offset)| (id, self.now.saturating_add(offset)))
            .collect()
    }

    /// The wall tick at which a pending real-time timer will fire.
    #[must_use]
    pub fn realtime_deadline(&self, timer: TimerId) -> Option<u64> {
        self.realtime.deadline(timer)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len() + self.realtime.len()
    }

    /// Advance simulated time by one tick, firing whatever expires.
    pub fn tick_and_fire<H: TimerHandler + ?Sized>(&mut self, handler: &mut H) {
        self.advance(handler, 1)
    }

    /// Advance simulated time by `ticks` ticks, firing timers in
    /// order as they expire.  When nothing is queued the ticks are
    /// simply added to the global time.  The global time saturates
    /// rather than wrapping.
    pub fn advance<H: TimerHandler + ?Sized>(&mut self, handler: &mut H, ticks: u64) {
        let mut remaining = ticks;
        loop {
            match self.queue.head_delta() {
                None => {
                    self.now = self.now.saturating_add(remaining);
                    return;
                }
                Some(delta) if delta > remaining => {
                    self.queue.consume(remaining);
                    self.now = self.now.saturating_add(remaining);
                    return;
                }
                Some(delta) => {
                    self.queue.consume(delta);
                    self.now = self.now.saturating_add(delta);
                    remaining -= delta;
                    self.fire_expired(handler);
                    if remaining == 0 {
                        return;
                    }
                }
            }
        }
    }

    fn fire_expired<H: TimerHandler + ?Sized>(&mut self, handler: &mut H) {
        // We re-examine the head on each iteration since the handler
        // may have changed the queue.
        while let Some(timer) = self.queue.pop_due() {
            let (owner, requeue) = match self.timers.get_mut(timer) {
                Some(slot) => {
                    slot.pending = false;
                    (slot.owner, slot.requeue_interval.filter(|_| slot.enabled))
                }
                None => {
                    panic!("{timer} expired but no longer exists; destroy_timer should have unqueued it");
                }
            };
            if let Some(interval) = requeue {
                // Periodic timers are re-armed before the callback,
                // so that the callback can cancel them.
                if let Some(slot) = self.timers.get_mut(timer) {
                    slot.pending = true;
                }
                self.enqueue(timer, TimeBase::Simulated, interval);
            }
            self.stats.fired += 1;
            event!(
                Level::TRACE,
                "{} fired at tick {} for {}",
                timer,
                self.now,
                owner
            );
            handler.on_timer(
                self,
                FiredTimer {
                    timer,
                    owner,
                    base: TimeBase::Simulated,
                },
            );
        }
    }

    /// Process one wall-clock tick: every real-time timer which has
    /// expired fires, earliest deadline first.
    pub fn wall_tick<H: TimerHandler + ?Sized>(&mut self, handler: &mut H) {
        self.realtime.tick();
        while let Some(timer) = self.realtime.pop_expired() {
            let (owner, requeue) = match self.timers.get_mut(timer) {
                Some(slot) => {
                    slot.pending = false;
                    (slot.owner, slot.requeue_interval.filter(|_| slot.enabled))
                }
                None => {
                    panic!("real-time {timer} expired but no longer exists");
                }
            };
            if let Some(interval) = requeue {
                if let Some(slot) = self.timers.get_mut(timer) {
                    slot.pending = true;
                }
                self.enqueue(timer, TimeBase::RealTime, interval);
            }
            self.stats.fired += 1;
            event!(
                Level::TRACE,
                "real-time {} fired at wall tick {} for {}",
                timer,
                self.realtime.now(),
                owner
            );
            handler.on_timer(
                self,
                FiredTimer {
                    timer,
                    owner,
                    base: TimeBase::RealTime,
                },
            );
        }
    }

    /// Give simulated time to the devices while the dispatcher has
    /// nothing to do.  `wall_ticks` wall-clock ticks are converted
    /// to simulated ticks at the configured rate.  Returns the number
    /// of simulated ticks which elapsed.
    pub fn donate_idle<H: TimerHandler + ?Sized>(&mut self, handler: &mut H, wall_ticks: u32) -> u64 {
        let ticks = u64::from(wall_ticks).saturating_mul(self.config.sim_ticks_per_wall_tick);
        event!(
            Level::TRACE,
            "idle: donating {} simulated ticks for {} wall ticks",
            ticks,
            wall_ticks
        );
        self.advance(handler, ticks);
        ticks
    }
}

impl Default for Scheduler {
    fn default() -> Scheduler {
        Scheduler::new(SchedulerConfig::default())
    }
}
