//! Collection types used by the simulator which are not specific to
//! any one part of it.
pub mod arena;
pub mod pq;
