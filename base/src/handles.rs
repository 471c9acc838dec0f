//! Handles by which devices, buses and the dispatcher refer to the
//! objects owned by a bus or by the scheduler.
//!
//! Handles carry a generation number so that a handle which outlives
//! the object it names (for example a window handle kept by a device
//! after the device was detached) is recognised as stale rather than
//! silently naming whatever object later reuses the same slot.
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::collections::arena::ArenaKey;

/// Identifies one bus within a simulated system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BusId(pub u16);

impl Display for BusId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "bus{}", self.0)
    }
}

/// Names a window (a device's reservation of address and vector
/// space) on a particular bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowHandle {
    index: u32,
    generation: u32,
}

impl ArenaKey for WindowHandle {
    fn from_parts(index: u32, generation: u32) -> Self {
        WindowHandle { index, generation }
    }

    fn index(&self) -> u32 {
        self.index
    }

    fn generation(&self) -> u32 {
        self.generation
    }
}

impl Display for WindowHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}.{}", self.index, self.generation)
    }
}

/// Names a timer owned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId {
    index: u32,
    generation: u32,
}

impl ArenaKey for TimerId {
    fn from_parts(index: u32, generation: u32) -> Self {
        TimerId { index, generation }
    }

    fn index(&self) -> u32 {
        self.index
    }

    fn generation(&self) -> u32 {
        self.generation
    }
}

impl Display for TimerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}.{}", self.index, self.generation)
    }
}

/// Identifies a device by the bus it is attached to and its window
/// there.  Timers record their owner this way so that the scheduler
/// knows whom to call back without holding a reference to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    pub bus: BusId,
    pub window: WindowHandle,
}

impl Display for DeviceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bus, self.window)
    }
}
