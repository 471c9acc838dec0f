//! The simulated-time delta queue.
//!
//! Each entry stores the number of ticks between its own expiry and
//! that of the entry before it (the head's delta is relative to
//! "now").  Advancing time therefore only ever touches the head, and
//! the absolute expiry of any entry is the sum of the deltas from the
//! head up to and including that entry.
use std::collections::VecDeque;

use base::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    timer: TimerId,
    delta: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DeltaQueue {
    entries: VecDeque<Entry>,
}

impl DeltaQueue {
    pub(crate) fn new() -> DeltaQueue {
        DeltaQueue::default()
    }

    /// Queue `timer` to expire `interval` ticks from now.
    ///
    /// The new entry goes in front of the first entry whose expiry
    /// is strictly later, so entries expiring on the same tick stay
    /// in the order in which they were queued.
    pub(crate) fn insert(&mut self, timer: TimerId, interval: u64) {
        let mut elapsed: u64 = 0;
        let mut pos = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            if elapsed + entry.delta > interval {
                pos = i;
                break;
            }
            elapsed += entry.delta;
        }
        let delta = interval - elapsed;
        if let Some(successor) = self.entries.get_mut(pos) {
            successor.delta -= delta;
        }
        self.entries.insert(pos, Entry { timer, delta });
    }

    /// Unlink `timer`, returning its delta.  The successor inherits
    /// the delta so that its own expiry time does not move.
    pub(crate) fn remove(&mut self, timer: TimerId) -> Option<u64> {
        let pos = self.entries.iter().position(|e| e.timer == timer)?;
        let removed = self.entries.remove(pos)?;
        if let Some(successor) = self.entries.get_mut(pos) {
            successor.delta += removed.delta;
        }
        Some(removed.delta)
    }

    pub(crate) fn head_delta(&self) -> Option<u64> {
        self.entries.front().map(|e| e.delta)
    }

    /// Account for `ticks` elapsed ticks.  The caller must not
    /// consume more ticks than the head is waiting for.
    pub(crate) fn consume(&mut self, ticks: u64) {
        match self.entries.front_mut() {
            Some(head) => {
                assert!(
                    ticks <= head.delta,
                    "consumed {ticks} ticks but the head timer was due in {}",
                    head.delta
                );
                head.delta -= ticks;
            }
            None => {
                assert_eq!(ticks, 0, "consumed ticks from an empty delta queue");
            }
        }
    }

    /// Remove and return the head, if it has expired.
    pub(crate) fn pop_due(&mut self) -> Option<TimerId> {
        match self.entries.front() {
            Some(head) if head.delta == 0 => self.entries.pop_front().map(|e| e.timer),
            _ => None,
        }
    }

    /// The queued timers in firing order, each with the number of
    /// ticks from now until it expires.
    pub(crate) fn expiry_offsets(&self) -> Vec<(TimerId, u64)> {
        let mut total: u64 = 0;
        self.entries
            .iter()
            .map(|e| {
                total += e.delta;
                (e.timer, total)
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, timer: TimerId) -> bool {
        self.entries.iter().any(|e| e.timer == timer)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
fn t(n: u32) -> TimerId {
    TimerId::from_parts(n, 0)
}

#[test]
fn test_insert_keeps_relative_encoding() {
    let mut q = DeltaQueue::new();
    q.insert(t(1), 10);
    q.insert(t(2), 4);
    q.insert(t(3), 7);
    assert_eq!(q.expiry_offsets(), vec![(t(2), 4), (t(3), 7), (t(1), 10)]);
    // The stored deltas are 4, 3, 3.
    assert_eq!(q.head_delta(), Some(4));
}

#[test]
fn test_same_tick_entries_keep_insertion_order() {
    let mut q = DeltaQueue::new();
    q.insert(t(1), 5);
    q.insert(t(2), 5);
    q.insert(t(3), 5);
    q.insert(t(0), 0);
    let order: Vec<TimerId> = q.expiry_offsets().into_iter().map(|(id, _)| id).collect();
    assert_eq!(order, vec![t(0), t(1), t(2), t(3)]);
}

#[test]
fn test_remove_gives_delta_to_successor() {
    let mut q = DeltaQueue::new();
    q.insert(t(1), 3);
    q.insert(t(2), 8);
    q.insert(t(3), 20);
    assert_eq!(q.remove(t(2)), Some(5));
    assert!(!q.contains(t(2)));
    assert_eq!(q.expiry_offsets(), vec![(t(1), 3), (t(3), 20)]);
    assert_eq!(q.remove(t(2)), None);
    assert_eq!(q.remove(t(3)), Some(17));
    assert_eq!(q.len(), 1);
}

#[test]
fn test_consume_and_pop_due() {
    let mut q = DeltaQueue::new();
    q.insert(t(1), 2);
    q.insert(t(2), 2);
    q.insert(t(3), 3);
    assert_eq!(q.pop_due(), None);
    q.consume(2);
    assert_eq!(q.pop_due(), Some(t(1)));
    assert_eq!(q.pop_due(), Some(t(2)));
    assert_eq!(q.pop_due(), None);
    assert_eq!(q.head_delta(), Some(1));
    q.consume(1);
    assert_eq!(q.pop_due(), Some(t(3)));
    assert!(q.is_empty());
    q.consume(0);
}

#[test]
#[should_panic]
fn test_consume_past_head_is_a_bug() {
    let mut q = DeltaQueue::new();
    q.insert(t(1), 2);
    q.consume(3);
}
