//! This crate provides the infrastructure shared by every simulated
//! peripheral: the event scheduler which advances simulated time and
//! calls devices back when their timers expire, and the bus
//! interconnect which routes I/O-page reads and writes to devices and
//! arbitrates their interrupt requests.
//!
//! The CPU instruction loop is not part of this crate; it is a
//! client of [`System`] (or of [`Bus`] and [`Scheduler`] directly).
#![crate_name = "sim"]

mod bus;
mod clock;
mod context;
mod error;
mod event;
mod system;

pub mod devices;

pub use bus::{
    AddressRange, AllocatedVector, Bus, BusConfig, BusDevice, BusStats, BusStatus, LevelStatus,
    PendingInterrupt, RegisterBlock, SlotState, VectorRequest, WindowSpec, WindowStatus,
};
pub use clock::{ManualTicker, ThreadedTicker, WallClockSource, DEFAULT_WALL_TICK};
pub use context::DeviceContext;
pub use error::{AttachError, BusFault, BusMisuse, TimerMisuse};
pub use event::{
    FiredTimer, Scheduler, SchedulerConfig, SchedulerStats, TimeBase, TimerHandler,
};
pub use system::System;
