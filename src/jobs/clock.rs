//! Time sources for the executor.
//!
//! Elapsed time is always measured locally from a monotonic reading; the wall
//! clock only stamps records.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic and wall-clock readings.
pub trait Clock: Send + Sync {
    /// Monotonic reading relative to an arbitrary fixed origin.
    fn monotonic(&self) -> Duration;
    /// Wall-clock milliseconds since the Unix epoch.
    fn unix_millis(&self) -> i64;
}

/// Real clock backed by [`Instant`] and [`SystemTime`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn unix_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis() as i64
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    epoch_millis: i64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(epoch_millis: i64) -> Self {
        Self {
            epoch_millis,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|err| err.into_inner());
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Duration {
        self.offset()
    }

    fn unix_millis(&self) -> i64 {
        self.epoch_millis + self.offset().as_millis() as i64
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn monotonic(&self) -> Duration {
        (**self).monotonic()
    }

    fn unix_millis(&self) -> i64 {
        (**self).unix_millis()
    }
}
