//! A slot arena addressed by generational keys.
//!
//! Objects which other parts of the simulator refer to by handle
//! (timers, bus windows) live in an arena.  Removing an object bumps
//! the generation of its slot, so handles to the removed object stop
//! resolving even after the slot is reused.
use std::fmt::Debug;
use std::marker::PhantomData;

/// Implemented by handle types which name arena slots.
pub trait ArenaKey: Copy {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(&self) -> u32;
    fn generation(&self) -> u32;
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Arena<K: ArenaKey, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    #[must_use]
    pub fn new() -> Arena<K, T> {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> K {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                assert!(slot.value.is_none(), "arena free list names an occupied slot");
                slot.value = Some(value);
                K::from_parts(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("arena has too many slots");
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                K::from_parts(index, 0)
            }
        }
    }

    fn slot(&self, key: K) -> Option<&Slot<T>> {
        self.slots
            .get(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
    }

    #[must_use]
    pub fn get(&self, key: K) -> Option<&T> {
        self.slot(key).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Remove the value named by `key`, invalidating `key` (and any
    /// copies of it).
    pub fn remove(&mut self, key: K) -> Option<T> {
        let slot = self
            .slots
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (K::from_parts(index as u32, slot.generation), value))
        })
    }
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TestKey(u32, u32);

#[cfg(test)]
impl ArenaKey for TestKey {
    fn from_parts(index: u32, generation: u32) -> Self {
        TestKey(index, generation)
    }
    fn index(&self) -> u32 {
        self.0
    }
    fn generation(&self) -> u32 {
        self.1
    }
}

#[test]
fn test_insert_get_remove() {
    let mut arena: Arena<TestKey, &'static str> = Arena::new();
    assert!(arena.is_empty());
    let k = arena.insert("Annapurna");
    assert_eq!(arena.get(k), Some(&"Annapurna"));
    assert_eq!(arena.len(), 1);
    assert_eq!(arena.remove(k), Some("Annapurna"));
    assert_eq!(arena.get(k), None);
    assert_eq!(arena.remove(k), None);
    assert!(arena.is_empty());
}

#[test]
fn test_stale_key_does_not_resolve_after_reuse() {
    let mut arena: Arena<TestKey, u32> = Arena::new();
    let first = arena.insert(1);
    arena.remove(first);
    let second = arena.insert(2);
    // The slot is reused, but the old key must not see the new value.
    assert_eq!(first.index(), second.index());
    assert_ne!(first.generation(), second.generation());
    assert_eq!(arena.get(first), None);
    assert_eq!(arena.get(second), Some(&2));
}

#[test]
fn test_iter_skips_vacant_slots() {
    let mut arena: Arena<TestKey, char> = Arena::new();
    let a = arena.insert('a');
    let b = arena.insert('b');
    let c = arena.insert('c');
    arena.remove(b);
    let items: Vec<(TestKey, char)> = arena.iter().map(|(k, v)| (k, *v)).collect();
    assert_eq!(items, vec![(a, 'a'), (c, 'c')]);
}
