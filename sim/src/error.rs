//! Errors reported by the scheduler and the bus.
//!
//! There are three kinds:
//!
//! - Configuration errors ([`AttachError`]) reject a single attempt
//!   to attach a device; the rest of the system carries on.
//! - Bus faults ([`BusFault`]) are a normal part of running guest
//!   software.  The CPU turns them into a guest-visible trap.
//! - Misuse ([`TimerMisuse`], [`BusMisuse`]) is a device or
//!   dispatcher calling the core incorrectly.  The request is
//!   dropped, logged and counted; it is never fatal.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::*;

use crate::bus::AddressRange;

/// Failure to attach a device window to a bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// The requested register block overlaps one which is already
    /// attached.
    AddressConflict {
        requested: AddressRange,
        existing: AddressRange,
        existing_device: String,
    },

    /// There is no block of `requested` consecutive free vector
    /// slots at `level`.
    VectorSpaceExhausted { level: Ipl, requested: u8, free: u8 },

    /// The window description makes no sense for this bus (for
    /// example, the register block runs off the end of the address
    /// space).
    InvalidWindow { device: String, reason: String },

    /// The system has no bus with this identifier.
    UnknownBus(BusId),
}

impl Display for AttachError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            AttachError::AddressConflict {
                requested,
                existing,
                existing_device,
            } => write!(
                f,
                "address conflict: requested registers {requested} overlap {existing} already used by {existing_device}"
            ),
            AttachError::VectorSpaceExhausted {
                level,
                requested,
                free,
            } => write!(
                f,
                "vector space exhausted at {level}: {requested} consecutive slots requested, {free} slots free"
            ),
            AttachError::InvalidWindow { device, reason } => {
                write!(f, "invalid window for {device}: {reason}")
            }
            AttachError::UnknownBus(bus) => write!(f, "there is no bus {bus}"),
        }
    }
}

impl Error for AttachError {}

/// A bus transfer which could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// No device responded to the address (a bus timeout, in
    /// hardware terms).
    NonExistentMemory { address: BusAddress, width: Width },

    /// The system has no bus with this identifier.
    UnknownBus(BusId),
}

impl Display for BusFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BusFault::NonExistentMemory { address, width } => {
                write!(f, "non-existent memory: no response to {width} access at {address}")
            }
            BusFault::UnknownBus(bus) => write!(f, "there is no bus {bus}"),
        }
    }
}

impl Error for BusFault {}

/// Incorrect use of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMisuse {
    /// The timer was destroyed, or never existed.
    UnknownTimer(TimerId),
    /// The timer is already queued; arming it again would queue it
    /// twice.
    AlreadyPending(TimerId),
    NegativeInterval { timer: TimerId, interval: i64 },
    /// The timer has been disabled and may not be armed.
    Disabled(TimerId),
    /// A periodic timer must have a period of at least one tick.
    ZeroPeriod(TimerId),
    /// A device tried to manipulate a timer belonging to another
    /// device.
    NotOwner { timer: TimerId, caller: DeviceRef },
}

impl Display for TimerMisuse {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            TimerMisuse::UnknownTimer(t) => write!(f, "{t} does not exist"),
            TimerMisuse::AlreadyPending(t) => write!(f, "{t} is already pending"),
            TimerMisuse::NegativeInterval { timer, interval } => {
                write!(f, "{timer} cannot be armed with negative interval {interval}")
            }
            TimerMisuse::Disabled(t) => write!(f, "{t} is disabled"),
            TimerMisuse::ZeroPeriod(t) => write!(f, "{t} cannot have a period of zero ticks"),
            TimerMisuse::NotOwner { timer, caller } => {
                write!(f, "{timer} does not belong to device {caller}")
            }
        }
    }
}

impl Error for TimerMisuse {}

/// Incorrect use of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMisuse {
    /// The window handle is stale (its device was detached) or
    /// belongs to some other bus.
    UnknownWindow(WindowHandle),
    /// The window has fewer interrupt vectors than `sub_index`
    /// implies.
    NoSuchVector {
        window: WindowHandle,
        sub_index: usize,
    },
    UnknownBus(BusId),
}

impl Display for BusMisuse {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BusMisuse::UnknownWindow(w) => write!(f, "{w} is not attached"),
            BusMisuse::NoSuchVector { window, sub_index } => {
                write!(f, "{window} has no interrupt vector number {sub_index}")
            }
            BusMisuse::UnknownBus(bus) => write!(f, "there is no bus {bus}"),
        }
    }
}

impl Error for BusMisuse {}

#[test]
fn test_attach_error_messages_mention_the_culprit() {
    let e = AttachError::AddressConflict {
        requested: AddressRange::new(addr!(0o160_001), 2),
        existing: AddressRange::new(addr!(0o160_000), 2),
        existing_device: "RK11".to_string(),
    };
    let msg = e.to_string();
    assert!(msg.contains("160001"), "{msg}");
    assert!(msg.contains("RK11"), "{msg}");

    let e = AttachError::VectorSpaceExhausted {
        level: Ipl::Br5,
        requested: 4,
        free: 1,
    };
    assert!(e.to_string().contains("BR5"));
}
