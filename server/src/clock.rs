//! Server time source.
//!
//! The clock is created once at startup and handed to the server; every
//! component that embeds server time in a response reads it through the
//! `Clock` it was given.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Current server time in milliseconds
    fn server_time(&self) -> u64;
}

/// Wall-clock time anchored at creation and advanced by a monotonic `Instant`,
/// so successive readings never go backwards even if the system clock does.
#[derive(Debug)]
pub struct SystemClock {
    anchor_millis: u64,
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis() as u64;

        Self {
            anchor_millis,
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn server_time(&self) -> u64 {
        self.anchor_millis + self.started.elapsed().as_millis() as u64
    }
}

/// Settable clock for tests and replay tools
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn server_time(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
