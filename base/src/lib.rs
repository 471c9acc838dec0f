//! The `base` crate defines the bus-related things which are useful
//! both in the simulator core and in tools built around it (for
//! example a topology checker or a front panel).  The idea is that
//! such a tool would depend on the base crate but would not need to
//! depend on the simulator library itself.

mod handles;
mod slotmask;
mod types;

pub mod collections;
pub mod prelude;

pub use handles::*;
pub use slotmask::{SlotMask, SLOTS_PER_LEVEL};
pub use types::*;

#[macro_export]
macro_rules! addr {
    ($n:expr) => {
        $crate::prelude::BusAddress::new($n)
    };
}

#[macro_export]
macro_rules! vector {
    ($n:expr) => {
        $crate::prelude::VectorAddress::new($n)
    };
}

#[test]
fn test_addr_macro() {
    use prelude::BusAddress;
    let a: BusAddress = addr!(0o777514);
    assert_eq!(u32::from(a), 0o777514);
}

#[test]
fn test_vector_macro() {
    use prelude::VectorAddress;
    let v: VectorAddress = vector!(0o200);
    assert_eq!(u16::from(v), 0o200);
}
