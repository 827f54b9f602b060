//! Reconciles overlapping schedules into one ticking period.
//!
//! Every positive schedule period is a multiple of the GCD of all of them, so
//! a single ticker firing at the GCD (aligned to the start instant) lands on
//! every schedule boundary. On each fire the [`Rule`] decides which names are
//! actually due.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::{validate_schedules, Schedule};
use crate::error::ValidationError;

/// Greatest common divisor.
///
/// # Panics
///
/// `gcd(0, 0)` is undefined and panics.
pub fn gcd(a: u64, b: u64) -> u64 {
    assert!(a != 0 || b != 0, "gcd(0, 0) is undefined");
    let (mut a, mut b) = (a, b);
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

pub struct PeriodMatcher {
    schedules: Option<Vec<Schedule>>,
    // name -> positive periods (secs) of every schedule selecting it
    metrics: HashMap<String, Vec<u64>>,
    start: Instant,
}

impl PeriodMatcher {
    pub fn new() -> Self {
        Self {
            schedules: None,
            metrics: HashMap::new(),
            start: Instant::now(),
        }
    }

    /// Records the instant all elapsed-time checks are measured from.
    pub fn mark_start(&mut self, now: Instant) {
        self.start = now;
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn consume_schedules(&mut self, schedules: Vec<Schedule>) {
        self.schedules = Some(schedules);
        self.metrics.clear();
    }

    /// Validates and consumes `schedules`, returning the new minimal period.
    /// Invalid schedules leave the current ones in place.
    pub fn apply_schedules(&mut self, schedules: Vec<Schedule>) -> Result<Duration, ValidationError> {
        validate_schedules(&schedules)?;
        self.consume_schedules(schedules);
        Ok(self.min_period())
    }

    pub fn schedules(&self) -> Option<&[Schedule]> {
        self.schedules.as_deref()
    }

    /// GCD of all positive periods, or zero when no schedule is active.
    ///
    /// # Panics
    ///
    /// Panics if no schedules have been consumed yet.
    pub fn min_period(&self) -> Duration {
        let secs = self
            .consumed()
            .iter()
            .filter(|s| s.period_sec > 0)
            .fold(0, |acc, s| gcd(acc, s.period_sec as u64));
        Duration::from_secs(secs)
    }

    /// Builds the inclusion rule for a tick at `now`.
    ///
    /// # Panics
    ///
    /// Panics if no schedules have been consumed yet.
    pub fn build_rule(&mut self, now: Instant) -> Rule<'_> {
        self.consumed();
        // Periods are whole seconds; tolerate a late tick.
        let elapsed = now.saturating_duration_since(self.start) + Duration::from_millis(500);
        Rule {
            elapsed_secs: elapsed.as_secs(),
            matcher: self,
        }
    }

    /// First instant strictly after `now` that is a whole number of `period`s
    /// past the start instant.
    pub fn next_boundary(&self, now: Instant, period: Duration) -> Instant {
        let period_nanos = period.as_nanos().max(1);
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        let boundaries = elapsed / period_nanos + 1;
        self.start + Duration::from_nanos((boundaries * period_nanos) as u64)
    }

    pub(crate) fn cached_names(&self) -> usize {
        self.metrics.len()
    }

    fn consumed(&self) -> &[Schedule] {
        match &self.schedules {
            Some(schedules) => schedules,
            None => panic!("PeriodMatcher used before any schedules were consumed"),
        }
    }

    fn periods_for(&mut self, name: &str) -> &[u64] {
        if !self.metrics.contains_key(name) {
            let periods = self
                .consumed()
                .iter()
                .filter(|s| s.period_sec > 0 && s.matches(name))
                .map(|s| s.period_sec as u64)
                .collect();
            self.metrics.insert(name.to_string(), periods);
        }
        self.metrics.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

impl Default for PeriodMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides, for one tick, which instrument names are due.
pub struct Rule<'a> {
    matcher: &'a mut PeriodMatcher,
    elapsed_secs: u64,
}

impl Rule<'_> {
    /// True when at least one schedule selecting `name` has a boundary at
    /// this tick.
    pub fn matches(&mut self, name: &str) -> bool {
        let elapsed = self.elapsed_secs;
        self.matcher
            .periods_for(name)
            .iter()
            .any(|period| elapsed % period == 0)
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }
}
