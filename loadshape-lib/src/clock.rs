use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Monotonic reference point shared by everything taking part in a single run.
///
/// Sample timestamps are offsets from [`RunClock::origin`],
/// which keeps them comparable across scenarios.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    origin: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Offset of the given instant relative to the run start,
    /// saturating at zero for instants prior to the start.
    pub fn offset_of(&self, instant: Instant) -> Duration {
        instant.saturating_duration_since(self.origin)
    }

    pub fn at(&self, offset: Duration) -> Instant {
        instant_after(self.origin, offset)
    }
}

/// Roughly thirty years, further away than any run lasts.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `base + offset`, saturating at a far-future instant instead of overflowing.
pub fn instant_after(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// Periodic driver for the scheduling control loops.
///
/// The first tick completes immediately.
/// Missed ticks are skipped rather than replayed in a burst:
/// every loop recomputes its target from the elapsed time on each tick.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
    period: Duration,
}

impl Ticker {
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(5);

    pub fn new(period: Duration) -> Self {
        let period = if period.is_zero() {
            Duration::from_millis(1)
        } else {
            period
        };

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self { interval, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD)
    }
}
