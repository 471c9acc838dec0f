//! Bitmaps of interrupt vector slots.
//!
//! Each bus has, for each priority level, a fixed number of vector
//! slots.  Bit `i` of a [`SlotMask`] describes slot `i`; whether a
//! set bit means "reserved" or "requesting" depends on which table
//! the mask belongs to.
use std::fmt::{self, Debug, Formatter};

use serde::{Deserialize, Serialize};

/// The number of vector slots at each priority level of a bus.
pub const SLOTS_PER_LEVEL: u8 = 32;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotMask(u32);

fn block_bits(start: u8, count: u8) -> u32 {
    assert!(
        u16::from(start) + u16::from(count) <= u16::from(SLOTS_PER_LEVEL),
        "slot block {start}+{count} extends past the end of the level"
    );
    let ones: u64 = (1u64 << count) - 1;
    (ones << start) as u32
}

impl SlotMask {
    pub const EMPTY: SlotMask = SlotMask(0);

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn is_set(&self, slot: u8) -> bool {
        slot < SLOTS_PER_LEVEL && (self.0 & (1 << slot)) != 0
    }

    pub fn set(&mut self, slot: u8) {
        self.0 |= block_bits(slot, 1);
    }

    pub fn clear(&mut self, slot: u8) {
        self.0 &= !block_bits(slot, 1);
    }

    pub fn set_block(&mut self, start: u8, count: u8) {
        self.0 |= block_bits(start, count);
    }

    pub fn clear_block(&mut self, start: u8, count: u8) {
        self.0 &= !block_bits(start, count);
    }

    /// The number of slots whose bits are clear.
    #[must_use]
    pub fn count_clear(&self) -> u8 {
        self.0.count_zeros() as u8
    }

    /// The lowest-numbered slot whose bit is set.
    #[must_use]
    pub fn lowest_set(&self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    /// Find the lowest-numbered run of `count` consecutive clear
    /// slots, returning the number of its first slot.
    #[must_use]
    pub fn lowest_clear_block(&self, count: u8) -> Option<u8> {
        if count == 0 || count > SLOTS_PER_LEVEL {
            return None;
        }
        (0..=(SLOTS_PER_LEVEL - count)).find(|&start| self.0 & block_bits(start, count) == 0)
    }

    /// Iterate over the numbers of the set slots, lowest first.
    pub fn iter_set(&self) -> impl Iterator<Item = u8> + '_ {
        (0..SLOTS_PER_LEVEL).filter(|slot| self.is_set(*slot))
    }
}

impl Debug for SlotMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SlotMask({:#034b})", self.0)
    }
}

#[test]
fn test_empty_mask() {
    let m = SlotMask::EMPTY;
    assert!(m.is_empty());
    assert_eq!(m.count_clear(), SLOTS_PER_LEVEL);
    assert_eq!(m.lowest_set(), None);
    assert_eq!(m.lowest_clear_block(1), Some(0));
    assert_eq!(m.lowest_clear_block(SLOTS_PER_LEVEL), Some(0));
    assert_eq!(m.lowest_clear_block(0), None);
    assert_eq!(m.lowest_clear_block(SLOTS_PER_LEVEL + 1), None);
}

#[test]
fn test_lowest_clear_block_skips_holes_too_small() {
    let mut m = SlotMask::EMPTY;
    m.set(0);
    m.set(2);
    // Slot 1 is a hole of size 1; a block of 2 has to start at 3.
    assert_eq!(m.lowest_clear_block(1), Some(1));
    assert_eq!(m.lowest_clear_block(2), Some(3));
}

#[test]
fn test_full_mask() {
    let mut m = SlotMask::EMPTY;
    m.set_block(0, SLOTS_PER_LEVEL);
    assert_eq!(m.count_clear(), 0);
    assert_eq!(m.lowest_clear_block(1), None);
    m.clear_block(30, 2);
    assert_eq!(m.lowest_clear_block(2), Some(30));
    assert_eq!(m.lowest_clear_block(3), None);
}

#[test]
fn test_iter_set() {
    let mut m = SlotMask::EMPTY;
    m.set(31);
    m.set(4);
    m.set_block(7, 2);
    assert_eq!(m.iter_set().collect::<Vec<u8>>(), vec![4, 7, 8, 31]);
    assert_eq!(m.lowest_set(), Some(4));
    m.clear(4);
    assert_eq!(m.lowest_set(), Some(7));
}

#[cfg(test)]
mod proptests {
    use super::*;
    use test_strategy::proptest;

    #[proptest]
    fn found_block_is_clear_and_lowest(bits: u32, #[strategy(1u8..=SLOTS_PER_LEVEL)] count: u8) {
        let m = SlotMask(bits);
        match m.lowest_clear_block(count) {
            Some(start) => {
                for slot in start..start + count {
                    assert!(!m.is_set(slot));
                }
                // No earlier start position would have worked.
                for earlier in 0..start {
                    assert!((earlier..earlier + count).any(|slot| m.is_set(slot)));
                }
            }
            None => {
                for start in 0..=(SLOTS_PER_LEVEL - count) {
                    assert!((start..start + count).any(|slot| m.is_set(slot)));
                }
            }
        }
    }
}
