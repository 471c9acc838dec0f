//! Simple devices which exercise the bus and the scheduler.
//!
//! These are not faithful models of any real peripheral; they
//! implement just enough of the register interface of a line-time
//! clock and of a console terminal's transmitter to drive guest
//! software (or a demonstration dispatcher loop).
pub mod line_clock;
pub mod teletype;

pub use line_clock::LineClock;
pub use teletype::{SharedOutput, Teletype};

/// Control/status register bit: the device is ready (or, for the
/// clock, a tick has happened).
pub const CSR_READY: u16 = 0o200;

/// Control/status register bit: interrupt when ready.
pub const CSR_INTERRUPT_ENABLE: u16 = 0o100;
