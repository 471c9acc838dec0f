//! The prelude exports the types which are useful in describing bus
//! topology and timers.  Providing this prelude is the main purpose
//! of the base crate.
pub use super::collections::arena::{Arena, ArenaKey};
pub use super::handles::*;
pub use super::slotmask::{SlotMask, SLOTS_PER_LEVEL};
pub use super::types::*;
pub use super::{addr, vector};
