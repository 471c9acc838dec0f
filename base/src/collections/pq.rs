//! A keyed priority queue which yields its *lowest* priority first.
//!
//! The real-time timer list keys entries by timer and orders them by
//! deadline, and wants the earliest deadline out first, which is the
//! reverse of what `keyed_priority_queue` provides.
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use keyed_priority_queue::KeyedPriorityQueue;

#[derive(Debug)]
struct ReverseOrdered<T> {
    inner: T,
}

impl<T> From<T> for ReverseOrdered<T> {
    fn from(inner: T) -> ReverseOrdered<T> {
        ReverseOrdered { inner }
    }
}

impl<T: Ord> PartialOrd for ReverseOrdered<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Eq for ReverseOrdered<T> {}

impl<T: Eq> PartialEq for ReverseOrdered<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: Ord> Ord for ReverseOrdered<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.inner.cmp(&self.inner)
    }
}

#[test]
fn test_reverse_order() {
    assert_eq!(ReverseOrdered::from(3), ReverseOrdered::from(3));
    assert_ne!(ReverseOrdered::from(3), ReverseOrdered::from(2));
    assert!(ReverseOrdered::from(3) < ReverseOrdered::from(2));
    assert!(ReverseOrdered::from((5, 1)) > ReverseOrdered::from((5, 2)));
}

pub struct KeyedReversePriorityQueue<K: Hash + Eq, P: Ord> {
    items: KeyedPriorityQueue<K, ReverseOrdered<P>>,
}

impl<K, P> KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    #[must_use]
    pub fn new() -> KeyedReversePriorityQueue<K, P> {
        KeyedReversePriorityQueue {
            items: KeyedPriorityQueue::<K, ReverseOrdered<P>>::new(),
        }
    }

    #[must_use]
    pub fn peek(&self) -> Option<(&K, &P)> {
        self.items.peek().map(|(k, p)| (k, &p.inner))
    }

    pub fn pop(&mut self) -> Option<(K, P)> {
        self.items.pop().map(|(k, p)| (k, p.inner))
    }

    /// Insert `key` with `priority`, returning the previous priority
    /// of `key` if it was already present.
    pub fn push(&mut self, key: K, priority: P) -> Option<P> {
        self.items
            .push(key, ReverseOrdered::from(priority))
            .map(|rd| rd.inner)
    }

    /// Remove `key` from the queue, returning its priority.
    pub fn remove(&mut self, key: &K) -> Option<P> {
        self.items.remove(key).map(|rd| rd.inner)
    }

    #[must_use]
    pub fn get_priority(&self, key: &K) -> Option<&P> {
        self.items.get_priority(key).map(|rd| &rd.inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K, P> Default for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Debug for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq + Debug,
    P: Ord + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedReversePriorityQueue")
            .field("items", &self.items)
            .finish()
    }
}

#[test]
fn test_empty() {
    let mut q: KeyedReversePriorityQueue<usize, u64> = KeyedReversePriorityQueue::default();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    assert_eq!(q.peek(), None);
    assert_eq!(q.pop(), None);
}

#[test]
fn test_repeat_push_replaces_priority() {
    let mut q: KeyedReversePriorityQueue<&'static str, u64> = KeyedReversePriorityQueue::new();
    assert_eq!(q.push("clock", 20), None);
    assert_eq!(q.push("clock", 40), Some(20));
    assert_eq!(q.push("clock", 30), Some(40));
    assert_eq!(q.len(), 1);
    assert_eq!(q.pop(), Some(("clock", 30)));
    assert!(q.is_empty());
}

#[test]
fn test_lowest_priority_pops_first() {
    let mut q: KeyedReversePriorityQueue<char, (u64, u64)> = KeyedReversePriorityQueue::new();
    q.push('b', (10, 1));
    q.push('a', (10, 0));
    q.push('c', (5, 2));
    assert_eq!(q.peek(), Some((&'c', &(5, 2))));
    assert_eq!(q.pop(), Some(('c', (5, 2))));
    assert_eq!(q.pop(), Some(('a', (10, 0))));
    assert_eq!(q.pop(), Some(('b', (10, 1))));
    assert!(q.is_empty());
}

#[test]
fn test_remove() {
    let mut q: KeyedReversePriorityQueue<u32, u64> = KeyedReversePriorityQueue::new();
    q.push(1, 100);
    q.push(2, 200);
    assert_eq!(q.get_priority(&2), Some(&200));
    assert_eq!(q.get_priority(&3), None);
    assert_eq!(q.remove(&1), Some(100));
    assert_eq!(q.remove(&1), None);
    assert_eq!(q.pop(), Some((2, 200)));
}
