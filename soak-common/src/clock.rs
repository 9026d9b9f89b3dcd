//! Injectable time source.
//!
//! Every deadline check and bounded sleep in the harness goes through a
//! [`Clock`], so tests can drive time with [`ManualClock`] or paused tokio
//! time instead of waiting.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when slept on or advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Absolute run boundary, fixed once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    end: Instant,
}

impl Deadline {
    pub fn new(end: Instant) -> Self {
        Self { end }
    }

    /// Deadline `duration` from the clock's current time.
    pub fn after(clock: &dyn Clock, duration: Duration) -> Self {
        Self {
            end: clock.now() + duration,
        }
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        clock.now() >= self.end
    }

    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        self.end.saturating_duration_since(clock.now())
    }
}
