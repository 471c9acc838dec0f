//! The real-time timer list.
//!
//! Real-time timers measure wall-clock ticks rather than simulated
//! ticks.  They pace things the operator can see (for example how
//! fast console output appears) and never influence the order of
//! events in simulated time.
//!
//! Deadlines are absolute wall-tick counts.  Entries with equal
//! deadlines come out in the order they were queued, because the
//! priority includes a sequence number.
use tracing::{event, Level};

use base::collections::pq::KeyedReversePriorityQueue;
use base::prelude::*;

/// Ordering key for a queued timer: deadline first, then queueing
/// order.
type Deadline = (u64, u64);

#[derive(Debug)]
pub(crate) struct RealTimeQueue {
    items: KeyedReversePriorityQueue<TimerId, Deadline>,
    now: u64,
    next_sequence: u64,
}

impl RealTimeQueue {
    pub(crate) fn new() -> RealTimeQueue {
        RealTimeQueue {
            items: KeyedReversePriorityQueue::new(),
            now: 0,
            next_sequence: 0,
        }
    }

    /// The number of wall-clock ticks seen so far.
    pub(crate) fn now(&self) -> u64 {
        self.now
    }

    /// Queue `timer` to expire `interval` wall ticks from now.  A
    /// zero interval expires on the next wall tick.
    pub(crate) fn insert(&mut self, timer: TimerId, interval: u64) -> u64 {
        let deadline = self.now.saturating_add(interval);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if let Some((prev, _)) = self.items.push(timer, (deadline, sequence)) {
            // The scheduler checks the pending flag before calling
            // us, so this should not happen.
            event!(
                Level::ERROR,
                "real-time {} was already queued (deadline {}); now due at {}",
                timer,
                prev,
                deadline
            );
        }
        deadline
    }

    pub(crate) fn remove(&mut self, timer: TimerId) -> Option<u64> {
        self.items.remove(&timer).map(|(deadline, _)| deadline)
    }

    pub(crate) fn deadline(&self, timer: TimerId) -> Option<u64> {
        self.items.get_priority(&timer).map(|(deadline, _)| *deadline)
    }

    /// Record the passing of one wall-clock tick.
    pub(crate) fn tick(&mut self) {
        self.now += 1;
    }

    /// Remove and return the earliest timer, if it has expired.
    pub(crate) fn pop_expired(&mut self) -> Option<TimerId> {
        let now = self.now;
        let expired = match self.items.peek() {
            Some((_, (deadline, _))) if *deadline <= now => true,
            Some((timer, (deadline, _))) => {
                event!(
                    Level::TRACE,
                    "real-time list: next expiry is {} at wall tick {}, now={}",
                    timer,
                    deadline,
                    now
                );
                false
            }
            None => false,
        };
        if expired {
            self.items.pop().map(|(timer, _)| timer)
        } else {
            None
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
fn t(n: u32) -> TimerId {
    TimerId::from_parts(n, 0)
}

#[test]
fn test_realtime_queue_empty() {
    let mut q = RealTimeQueue::new();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    q.tick();
    assert_eq!(q.pop_expired(), None);
}

#[test]
fn test_realtime_queue_all_expired_entries_come_out_in_order() {
    let mut q = RealTimeQueue::new();
    assert_eq!(q.insert(t(3), 2), 2);
    q.insert(t(1), 1);
    q.insert(t(2), 1);
    q.tick();
    assert_eq!(q.pop_expired(), Some(t(1)));
    assert_eq!(q.pop_expired(), Some(t(2)));
    assert_eq!(q.pop_expired(), None);
    q.tick();
    assert_eq!(q.pop_expired(), Some(t(3)));
    assert!(q.is_empty());
}

#[test]
fn test_realtime_queue_late_service_fires_everything() {
    // If the wall clock driver falls behind, several deadlines can
    // pass before the queue is next looked at.  All of them fire.
    let mut q = RealTimeQueue::new();
    q.insert(t(1), 1);
    q.insert(t(2), 2);
    q.insert(t(3), 3);
    q.tick();
    q.tick();
    q.tick();
    let fired: Vec<TimerId> = std::iter::from_fn(|| q.pop_expired()).collect();
    assert_eq!(fired, vec![t(1), t(2), t(3)]);
}

#[test]
fn test_realtime_queue_remove() {
    let mut q = RealTimeQueue::new();
    q.insert(t(1), 4);
    assert_eq!(q.deadline(t(1)), Some(4));
    assert_eq!(q.remove(t(1)), Some(4));
    assert_eq!(q.remove(t(1)), None);
    assert_eq!(q.deadline(t(1)), None);
}
