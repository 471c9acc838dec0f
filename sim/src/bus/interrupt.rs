//! Interrupt vector allocation and priority arbitration.
//!
//! Each bus has one [`LevelTable`] for each of the four device
//! priority levels.  A table has 32 vector slots.  A slot is free,
//! reserved by a window, or reserved and requesting an interrupt.
//!
//! Arbitration picks the highest level with any requesting slot,
//! and within that level the lowest-numbered slot.
use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use super::VectorRequest;
use crate::error::{AttachError, BusMisuse};

/// A vector slot assigned to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AllocatedVector {
    pub level: Ipl,
    pub slot: u8,
    pub vector: VectorAddress,
}

/// An interrupt request which has won arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingInterrupt {
    pub vector: VectorAddress,
    pub level: Ipl,
    pub slot: u8,
    pub window: WindowHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Free,
    Reserved(WindowHandle),
    Requesting(WindowHandle),
}

/// A snapshot of one level table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelStatus {
    pub level: Ipl,
    pub reserved: SlotMask,
    pub requesting: SlotMask,
}

#[derive(Debug, Clone)]
struct LevelTable {
    level: Ipl,
    reserved: SlotMask,
    requesting: SlotMask,
    assignments: [Option<(WindowHandle, VectorAddress)>; SLOTS_PER_LEVEL as usize],
}

impl LevelTable {
    fn new(level: Ipl) -> LevelTable {
        LevelTable {
            level,
            reserved: SlotMask::EMPTY,
            requesting: SlotMask::EMPTY,
            assignments: [None; SLOTS_PER_LEVEL as usize],
        }
    }

    fn check_invariants(&self) {
        assert_eq!(
            self.requesting.bits() & !self.reserved.bits(),
            0,
            "{}: requesting slots {:?} are not all reserved {:?}",
            self.level,
            self.requesting,
            self.reserved
        );
    }

    fn pending(&self) -> Option<PendingInterrupt> {
        let slot = self.requesting.lowest_set()?;
        match self.assignments[usize::from(slot)] {
            Some((window, vector)) => Some(PendingInterrupt {
                vector,
                level: self.level,
                slot,
                window,
            }),
            None => {
                panic!(
                    "{} slot {} is requesting but has no owner",
                    self.level, slot
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InterruptController {
    levels: [LevelTable; 4],
    misuse: u64,
}

impl InterruptController {
    pub(crate) fn new() -> InterruptController {
        InterruptController {
            levels: [
                LevelTable::new(Ipl::Br4),
                LevelTable::new(Ipl::Br5),
                LevelTable::new(Ipl::Br6),
                LevelTable::new(Ipl::Br7),
            ],
            misuse: 0,
        }
    }

    fn table(&self, level: Ipl) -> &LevelTable {
        &self.levels[level.index()]
    }

    fn table_mut(&mut self, level: Ipl) -> &mut LevelTable {
        &mut self.levels[level.index()]
    }

    pub(crate) fn misuse_count(&self) -> u64 {
        self.misuse
    }

    /// Work out which slots a window asking for `requests` would be
    /// given, without changing anything.  Each request gets the
    /// lowest-numbered block of consecutive free slots at its level.
    pub(crate) fn plan(
        &self,
        device: &str,
        requests: &[VectorRequest],
    ) -> Result<Vec<AllocatedVector>, AttachError> {
        let mut reserved: [SlotMask; 4] = [
            self.levels[0].reserved,
            self.levels[1].reserved,
            self.levels[2].reserved,
            self.levels[3].reserved,
        ];
        let mut result = Vec::new();
        for req in requests {
            let mask = &mut reserved[req.level.index()];
            let start = match mask.lowest_clear_block(req.count) {
                Some(start) => start,
                None => {
                    return Err(AttachError::VectorSpaceExhausted {
                        level: req.level,
                        requested: req.count,
                        free: mask.count_clear(),
                    });
                }
            };
            mask.set_block(start, req.count);
            for i in 0..req.count {
                let vector = match req.base.nth(u16::from(i)) {
                    Some(v) => v,
                    None => {
                        return Err(AttachError::InvalidWindow {
                            device: device.to_string(),
                            reason: format!(
                                "{} vectors starting at {} run off the end of vector space",
                                req.count, req.base
                            ),
                        });
                    }
                };
                result.push(AllocatedVector {
                    level: req.level,
                    slot: start + i,
                    vector,
                });
            }
        }
        Ok(result)
    }

    /// Record the allocations previously computed by `plan`.
    pub(crate) fn reserve(&mut self, window: WindowHandle, vectors: &[AllocatedVector]) {
        for av in vectors {
            let table = self.table_mut(av.level);
            assert!(
                !table.reserved.is_set(av.slot),
                "{} slot {} is already reserved",
                av.level,
                av.slot
            );
            table.reserved.set(av.slot);
            table.assignments[usize::from(av.slot)] = Some((window, av.vector));
            event!(
                Level::DEBUG,
                "{} slot {} (vector {}) reserved for {}",
                av.level,
                av.slot,
                av.vector,
                window
            );
        }
    }

    /// Free the slots of a window, withdrawing any outstanding
    /// requests.
    pub(crate) fn release(&mut self, window: WindowHandle, vectors: &[AllocatedVector]) {
        for av in vectors {
            let table = self.table_mut(av.level);
            match table.assignments[usize::from(av.slot)] {
                Some((owner, _)) if owner == window => (),
                other => {
                    panic!(
                        "{} slot {} should belong to {} but is assigned to {:?}",
                        av.level, av.slot, window, other
                    );
                }
            }
            if table.requesting.is_set(av.slot) {
                event!(
                    Level::DEBUG,
                    "withdrawing outstanding request on vector {} of {}",
                    av.vector,
                    window
                );
            }
            table.requesting.clear(av.slot);
            table.reserved.clear(av.slot);
            table.assignments[usize::from(av.slot)] = None;
            table.check_invariants();
        }
    }

    fn owned_slot(&self, window: WindowHandle, av: &AllocatedVector) {
        let table = self.table(av.level);
        assert!(
            table.reserved.is_set(av.slot)
                && matches!(table.assignments[usize::from(av.slot)], Some((w, _)) if w == window),
            "{window} is not the owner of {} slot {}",
            av.level,
            av.slot
        );
    }

    pub(crate) fn request(&mut self, window: WindowHandle, av: &AllocatedVector) {
        self.owned_slot(window, av);
        self.table_mut(av.level).requesting.set(av.slot);
        event!(
            Level::TRACE,
            "{} requests an interrupt on vector {} at {}",
            window,
            av.vector,
            av.level
        );
    }

    pub(crate) fn withdraw(&mut self, window: WindowHandle, av: &AllocatedVector) {
        self.owned_slot(window, av);
        self.table_mut(av.level).requesting.clear(av.slot);
    }

    pub(crate) fn is_requesting(&self, av: &AllocatedVector) -> bool {
        self.table(av.level).requesting.is_set(av.slot)
    }

    /// The request which would win arbitration at a processor
    /// priority of `cpu_level`: only levels above it are considered.
    pub(crate) fn highest_pending_above(&self, cpu_level: u8) -> Option<PendingInterrupt> {
        Ipl::DESCENDING
            .iter()
            .take_while(|ipl| ipl.level() > cpu_level)
            .find_map(|ipl| self.table(*ipl).pending())
    }

    pub(crate) fn highest_pending(&self) -> Option<PendingInterrupt> {
        self.highest_pending_above(0)
    }

    /// Take the winning request (above `cpu_level`).  The slot
    /// stays reserved.
    pub(crate) fn acknowledge_above(&mut self, cpu_level: u8) -> Option<PendingInterrupt> {
        let winner = self.highest_pending_above(cpu_level)?;
        self.table_mut(winner.level).requesting.clear(winner.slot);
        event!(
            Level::DEBUG,
            "acknowledged interrupt at {} vector {} from {}",
            winner.level,
            winner.vector,
            winner.window
        );
        Some(winner)
    }

    pub(crate) fn slot_state(&self, level: Ipl, slot: u8) -> SlotState {
        let table = self.table(level);
        match table.assignments.get(usize::from(slot)).copied().flatten() {
            None => SlotState::Free,
            Some((window, _)) if table.requesting.is_set(slot) => SlotState::Requesting(window),
            Some((window, _)) => SlotState::Reserved(window),
        }
    }

    pub(crate) fn level_status(&self) -> Vec<LevelStatus> {
        self.levels
            .iter()
            .map(|t| LevelStatus {
                level: t.level,
                reserved: t.reserved,
                requesting: t.requesting,
            })
            .collect()
    }
}

/// The interrupt request lines of one window, as seen by the device
/// which owns the window.
pub(crate) struct InterruptLines<'a> {
    controller: &'a mut InterruptController,
    window: WindowHandle,
    vectors: &'a [AllocatedVector],
}

impl<'a> InterruptLines<'a> {
    pub(crate) fn new(
        controller: &'a mut InterruptController,
        window: WindowHandle,
        vectors: &'a [AllocatedVector],
    ) -> InterruptLines<'a> {
        InterruptLines {
            controller,
            window,
            vectors,
        }
    }

    pub(crate) fn vectors(&self) -> &[AllocatedVector] {
        self.vectors
    }

    fn vector(&mut self, sub_index: usize) -> Result<AllocatedVector, BusMisuse> {
        match self.vectors.get(sub_index) {
            Some(av) => Ok(*av),
            None => {
                let misuse = BusMisuse::NoSuchVector {
                    window: self.window,
                    sub_index,
                };
                self.controller.misuse += 1;
                event!(Level::WARN, "interrupt request ignored: {}", misuse);
                Err(misuse)
            }
        }
    }

    pub(crate) fn send(&mut self, sub_index: usize) -> Result<(), BusMisuse> {
        let av = self.vector(sub_index)?;
        self.controller.request(self.window, &av);
        Ok(())
    }

    pub(crate) fn cancel(&mut self, sub_index: usize) -> Result<(), BusMisuse> {
        let av = self.vector(sub_index)?;
        self.controller.withdraw(self.window, &av);
        Ok(())
    }

    pub(crate) fn is_requesting(&self, sub_index: usize) -> bool {
        self.vectors
            .get(sub_index)
            .is_some_and(|av| self.controller.is_requesting(av))
    }
}

#[cfg(test)]
fn w(n: u32) -> WindowHandle {
    WindowHandle::from_parts(n, 0)
}

#[cfg(test)]
fn req(level: Ipl, base: u16, count: u8) -> VectorRequest {
    VectorRequest {
        level,
        base: vector!(base),
        count,
    }
}

#[test]
fn test_plan_takes_lowest_free_block() {
    let mut ic = InterruptController::new();
    let first = ic.plan("a", &[req(Ipl::Br5, 0o300, 2)]).unwrap();
    ic.reserve(w(1), &first);
    let second = ic.plan("b", &[req(Ipl::Br5, 0o310, 1)]).unwrap();
    ic.reserve(w(2), &second);
    ic.release(w(1), &first);
    // Slots 0 and 1 are free again; a block of three must start at 3.
    let third = ic.plan("c", &[req(Ipl::Br5, 0o320, 3)]).unwrap();
    let slots: Vec<u8> = third.iter().map(|av| av.slot).collect();
    assert_eq!(slots, vec![3, 4, 5]);
    let vectors: Vec<u16> = third.iter().map(|av| u16::from(av.vector)).collect();
    assert_eq!(vectors, vec![0o320, 0o324, 0o330]);
    // But a single slot fits in the hole.
    let fourth = ic.plan("d", &[req(Ipl::Br5, 0o340, 1)]).unwrap();
    assert_eq!(fourth[0].slot, 0);
}

#[test]
fn test_plan_accounts_for_its_own_earlier_requests() {
    let ic = InterruptController::new();
    let plan = ic
        .plan("a", &[req(Ipl::Br4, 0o60, 1), req(Ipl::Br4, 0o64, 1)])
        .unwrap();
    assert_eq!(plan[0].slot, 0);
    assert_eq!(plan[1].slot, 1);
}

#[test]
fn test_plan_exhaustion() {
    let mut ic = InterruptController::new();
    let all = ic.plan("big", &[req(Ipl::Br6, 0o400, 31)]).unwrap();
    ic.reserve(w(1), &all);
    assert_eq!(
        ic.plan("more", &[req(Ipl::Br6, 0o600, 2)]),
        Err(AttachError::VectorSpaceExhausted {
            level: Ipl::Br6,
            requested: 2,
            free: 1,
        })
    );
    // Other levels are unaffected.
    assert!(ic.plan("more", &[req(Ipl::Br7, 0o600, 2)]).is_ok());
}

#[test]
fn test_arbitration_order() {
    let mut ic = InterruptController::new();
    let low = ic.plan("low", &[req(Ipl::Br4, 0o200, 2)]).unwrap();
    ic.reserve(w(1), &low);
    let high = ic.plan("high", &[req(Ipl::Br6, 0o100, 1)]).unwrap();
    ic.reserve(w(2), &high);
    assert_eq!(ic.highest_pending(), None);

    ic.request(w(1), &low[1]);
    ic.request(w(1), &low[0]);
    ic.request(w(2), &high[0]);
    let winner = ic.highest_pending().unwrap();
    assert_eq!((winner.vector, winner.level), (vector!(0o100), Ipl::Br6));
    assert_eq!(ic.highest_pending_above(6), None);

    ic.withdraw(w(2), &high[0]);
    let winner = ic.highest_pending().unwrap();
    assert_eq!((winner.vector, winner.slot), (vector!(0o200), 0));

    assert_eq!(ic.slot_state(Ipl::Br4, 0), SlotState::Requesting(w(1)));
    assert_eq!(ic.acknowledge_above(0).map(|p| p.slot), Some(0));
    assert_eq!(ic.slot_state(Ipl::Br4, 0), SlotState::Reserved(w(1)));
    assert_eq!(ic.acknowledge_above(0).map(|p| p.slot), Some(1));
    assert_eq!(ic.acknowledge_above(0), None);
    assert_eq!(ic.slot_state(Ipl::Br4, 2), SlotState::Free);
}

#[test]
fn test_processor_level_masks_lower_requests() {
    let mut ic = InterruptController::new();
    let v = ic.plan("dev", &[req(Ipl::Br5, 0o240, 1)]).unwrap();
    ic.reserve(w(1), &v);
    ic.request(w(1), &v[0]);
    assert!(ic.highest_pending_above(4).is_some());
    assert_eq!(ic.highest_pending_above(5), None);
    assert_eq!(ic.highest_pending_above(7), None);
    assert_eq!(ic.acknowledge_above(5), None);
    assert!(ic.is_requesting(&v[0]));
}

#[test]
fn test_release_withdraws_requests() {
    let mut ic = InterruptController::new();
    let v = ic.plan("dev", &[req(Ipl::Br7, 0o10, 1)]).unwrap();
    ic.reserve(w(1), &v);
    ic.request(w(1), &v[0]);
    ic.release(w(1), &v);
    assert_eq!(ic.slot_state(Ipl::Br7, 0), SlotState::Free);
    assert_eq!(ic.highest_pending(), None);
}

#[test]
fn test_lines_reject_unknown_sub_index() {
    let mut ic = InterruptController::new();
    let v = ic.plan("dev", &[req(Ipl::Br4, 0o60, 1)]).unwrap();
    ic.reserve(w(1), &v);
    let mut lines = InterruptLines::new(&mut ic, w(1), &v);
    assert_eq!(lines.vectors().len(), 1);
    assert_eq!(
        lines.send(1),
        Err(BusMisuse::NoSuchVector {
            window: w(1),
            sub_index: 1
        })
    );
    assert_eq!(lines.send(0), Ok(()));
    assert!(lines.is_requesting(0));
    assert_eq!(lines.cancel(0), Ok(()));
    assert!(!lines.is_requesting(0));
    assert_eq!(ic.misuse_count(), 1);
}
