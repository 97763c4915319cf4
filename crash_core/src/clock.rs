use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Time source for the engine.
///
/// `now` is the monotonic reading that drives growth and deadlines;
/// `wall_now` stamps published deadlines and history entries.
pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn wall_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock. Clones share the same reading.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<(Instant, DateTime<Utc>)>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new((Instant::now(), Utc::now()))),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut t = self.lock();
        t.0 += by;
        t.1 += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    /// Step the monotonic reading backwards, as a misbehaving clock would.
    pub fn rewind(&self, by: Duration) {
        let mut t = self.lock();
        if let Some(earlier) = t.0.checked_sub(by) {
            t.0 = earlier;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (Instant, DateTime<Utc>)> {
        // a poisoned reading is still a reading
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.lock().0
    }

    fn wall_now(&self) -> DateTime<Utc> {
        self.lock().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_time() {
        let a = ManualClock::new();
        let b = a.clone();
        let start = a.now();
        let wall = a.wall_now();
        b.advance(Duration::from_millis(1500));
        assert_eq!(a.now() - start, Duration::from_millis(1500));
        assert_eq!((a.wall_now() - wall).num_milliseconds(), 1500);
    }

    #[test]
    fn rewind_moves_monotonic_reading_back() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(10));
        let before = clock.now();
        clock.rewind(Duration::from_secs(2));
        assert_eq!(before - clock.now(), Duration::from_secs(2));
    }
}
