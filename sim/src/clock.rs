//! Sources of wall-clock ticks.
//!
//! The real-time timer list is driven by a fixed-period tick from
//! the host.  The dispatcher asks a [`WallClockSource`] how many
//! ticks have happened since it last asked, and calls
//! [`crate::Scheduler::wall_tick`] that many times.
//!
//! [`ThreadedTicker`] produces ticks from a background thread.
//! [`ManualTicker`] produces them only when told to, which makes it
//! suitable for tests.
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{event, Level};

/// The usual period of the wall-clock tick.
pub const DEFAULT_WALL_TICK: Duration = Duration::from_millis(10);

pub trait WallClockSource {
    /// Return the number of ticks which have occurred since the
    /// previous call.  Never blocks.
    fn take_ticks(&mut self) -> u32;

    /// Wait (for at most `limit`) until at least one tick has
    /// occurred, returning the number of ticks.
    fn wait_ticks(&mut self, limit: Duration) -> u32;
}

/// Generates ticks from a background thread.
///
/// The thread sends one message per period.  It stops when the
/// ticker is dropped (because its next send fails).
#[derive(Debug)]
pub struct ThreadedTicker {
    period: Duration,
    rx: Receiver<()>,
    _thread: JoinHandle<()>,
}

impl ThreadedTicker {
    #[must_use]
    pub fn start(period: Duration) -> ThreadedTicker {
        let (tx, rx) = mpsc::channel();
        let thread = thread::spawn(move || loop {
            thread::sleep(period);
            if tx.send(()).is_err() {
                event!(Level::DEBUG, "wall-clock ticker stopping");
                return;
            }
        });
        event!(Level::DEBUG, "wall-clock ticker started with period {:?}", period);
        ThreadedTicker {
            period,
            rx,
            _thread: thread,
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl WallClockSource for ThreadedTicker {
    fn take_ticks(&mut self) -> u32 {
        let n = self.rx.try_iter().count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    fn wait_ticks(&mut self, limit: Duration) -> u32 {
        match self.rx.recv_timeout(limit) {
            Ok(()) => 1_u32.saturating_add(self.take_ticks()),
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                event!(Level::ERROR, "wall-clock ticker thread has gone away");
                0
            }
        }
    }
}

/// A tick source which ticks only when [`ManualTicker::advance`] is
/// called.
#[derive(Debug, Default)]
pub struct ManualTicker {
    pending: u32,
}

impl ManualTicker {
    #[must_use]
    pub fn new() -> ManualTicker {
        ManualTicker::default()
    }

    pub fn advance(&mut self, ticks: u32) {
        self.pending = self.pending.saturating_add(ticks);
    }
}

impl WallClockSource for ManualTicker {
    fn take_ticks(&mut self) -> u32 {
        std::mem::take(&mut self.pending)
    }

    fn wait_ticks(&mut self, _limit: Duration) -> u32 {
        self.take_ticks()
    }
}

#[test]
fn test_manual_ticker() {
    let mut t = ManualTicker::new();
    assert_eq!(t.take_ticks(), 0);
    t.advance(3);
    t.advance(2);
    assert_eq!(t.take_ticks(), 5);
    assert_eq!(t.take_ticks(), 0);
}

#[test]
fn test_threaded_ticker_ticks() {
    let mut t = ThreadedTicker::start(Duration::from_millis(1));
    assert_eq!(t.period(), Duration::from_millis(1));
    let n = t.wait_ticks(Duration::from_secs(10));
    assert!(n >= 1);
}
