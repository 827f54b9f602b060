use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// A re-armable periodic timer on the tokio clock.
///
/// Re-arming is done by replacing the ticker; dropping one cancels it.
/// Under a paused test runtime it follows virtual time.
pub struct Ticker {
    interval: Interval,
    period: Duration,
}

impl Ticker {
    /// First fire one period from now.
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now() + period, period)
    }

    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn starting_at(start: Instant, period: Duration) -> Self {
        let mut interval = time::interval_at(start, period);
        // Late fires are dropped instead of bunched so ticks stay on boundaries.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next fire and returns its scheduled instant.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}
