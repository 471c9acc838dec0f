//! The address map of a bus.
//!
//! Windows are kept sorted by base address (then by relative
//! priority) so that lookup is a binary search.  Live windows never
//! overlap, so at most one window contains any address.
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use base::prelude::*;

/// A half-open range of byte addresses `[base, base + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    base: BusAddress,
    len: u32,
}

impl AddressRange {
    #[must_use]
    pub const fn new(base: BusAddress, len: u32) -> AddressRange {
        AddressRange { base, len }
    }

    #[must_use]
    pub const fn base(&self) -> BusAddress {
        self.base
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last address in the range.  This is a `u64`
    /// because it may lie just past the largest representable
    /// address.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.base.bits()) + u64::from(self.len)
    }

    #[must_use]
    pub fn contains(&self, addr: BusAddress) -> bool {
        addr >= self.base && u64::from(addr.bits()) < self.end()
    }

    /// Two ranges overlap if some address lies in both.  Empty
    /// ranges overlap nothing.
    #[must_use]
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && u64::from(self.base.bits()) < other.end()
            && u64::from(other.base.bits()) < self.end()
    }
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {:>06o})", self.base, self.end())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MapEntry {
    pub(crate) range: AddressRange,
    pub(crate) relative_priority: u32,
    pub(crate) window: WindowHandle,
}

impl MapEntry {
    fn key(&self) -> (BusAddress, u32) {
        (self.range.base, self.relative_priority)
    }
}

#[derive(Debug, Default)]
pub(crate) struct AddressMap {
    entries: Vec<MapEntry>,
}

impl AddressMap {
    pub(crate) fn new() -> AddressMap {
        AddressMap::default()
    }

    /// Find an existing entry which overlaps `range`.
    pub(crate) fn find_conflict(&self, range: &AddressRange) -> Option<&MapEntry> {
        self.entries.iter().find(|e| e.range.overlaps(range))
    }

    /// Add an entry.  The caller must already have checked that it
    /// does not overlap an existing one.
    pub(crate) fn insert(&mut self, entry: MapEntry) {
        if let Some(existing) = self.find_conflict(&entry.range) {
            panic!(
                "address map entry {} for {} overlaps {} for {}",
                entry.range, entry.window, existing.range, existing.window
            );
        }
        let key = entry.key();
        let pos = self.entries.partition_point(|e| e.key() <= key);
        self.entries.insert(pos, entry);
    }

    pub(crate) fn remove(&mut self, window: WindowHandle) -> Option<MapEntry> {
        let pos = self.entries.iter().position(|e| e.window == window)?;
        Some(self.entries.remove(pos))
    }

    /// Find the window whose range contains `addr`.
    pub(crate) fn lookup(&self, addr: BusAddress) -> Option<WindowHandle> {
        // The candidates are the entries whose base is at or below
        // `addr`.  Empty ranges are skipped; they can share a base
        // address with a real one.
        let end = self.entries.partition_point(|e| e.range.base <= addr);
        self.entries[..end]
            .iter()
            .rev()
            .find(|e| !e.range.is_empty())
            .filter(|e| e.range.contains(addr))
            .map(|e| e.window)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &MapEntry> {
        self.entries.iter()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
fn w(n: u32) -> WindowHandle {
    WindowHandle::from_parts(n, 0)
}

#[cfg(test)]
fn entry(base: u32, len: u32, window: u32) -> MapEntry {
    MapEntry {
        range: AddressRange::new(addr!(base), len),
        relative_priority: 0,
        window: w(window),
    }
}

#[test]
fn test_range_overlap() {
    let a = AddressRange::new(addr!(0o160_000), 2);
    let b = AddressRange::new(addr!(0o160_001), 2);
    let c = AddressRange::new(addr!(0o160_002), 2);
    assert!(a.overlaps(&b));
    assert!(b.overlaps(&a));
    assert!(!a.overlaps(&c));
    assert!(!c.overlaps(&a));
    let empty = AddressRange::new(addr!(0o160_000), 0);
    assert!(!empty.overlaps(&a));
    assert!(!a.overlaps(&empty));
}

#[test]
fn test_range_at_top_of_address_space() {
    let r = AddressRange::new(addr!(0o777_776), 2);
    assert_eq!(r.end(), 0o1_000_000);
    assert!(r.contains(addr!(0o777_777)));
    assert!(!r.contains(addr!(0o777_775)));
    assert_eq!(r.to_string(), "[777776, 1000000)");
}

#[test]
fn test_lookup() {
    let mut map = AddressMap::new();
    map.insert(entry(0o777_560, 8, 2));
    map.insert(entry(0o777_546, 2, 1));
    map.insert(entry(0o777_560, 0, 3));
    assert_eq!(map.len(), 3);
    let bases: Vec<u32> = map.iter().map(|e| e.range.base().bits()).collect();
    assert_eq!(bases, vec![0o777_546, 0o777_560, 0o777_560]);

    assert_eq!(map.lookup(addr!(0o777_546)), Some(w(1)));
    assert_eq!(map.lookup(addr!(0o777_547)), Some(w(1)));
    assert_eq!(map.lookup(addr!(0o777_550)), None);
    assert_eq!(map.lookup(addr!(0o777_560)), Some(w(2)));
    assert_eq!(map.lookup(addr!(0o777_567)), Some(w(2)));
    assert_eq!(map.lookup(addr!(0o777_570)), None);
    assert_eq!(map.lookup(addr!(0)), None);

    assert_eq!(map.remove(w(2)).map(|e| e.window), Some(w(2)));
    assert_eq!(map.lookup(addr!(0o777_560)), None);
    assert_eq!(map.remove(w(2)), None);
}

#[test]
#[should_panic]
fn test_overlapping_insert_is_a_bug() {
    let mut map = AddressMap::new();
    map.insert(entry(0o160_000, 2, 1));
    map.insert(entry(0o160_001, 2, 2));
}
