//! Collection schedules as delivered by the config service.

pub mod matcher;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub use matcher::{gcd, PeriodMatcher, Rule};

/// Attribute key carrying the service name in a [`Resource`].
pub const SERVICE_NAME: &str = "service.name";

/// Opaque identity of one config snapshot. Equal bytes mean equal configs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Fingerprint {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Selects instruments by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Every name beginning with the prefix. The empty prefix selects all.
    StartsWith(String),
    /// Exactly one name.
    Equals(String),
}

impl Pattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::StartsWith(prefix) => name.starts_with(prefix.as_str()),
            Pattern::Equals(exact) => name == exact,
        }
    }
}

/// A set of inclusion patterns sharing one collection period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub inclusion_patterns: Vec<Pattern>,
    /// Seconds between collections. 0 disables the schedule.
    pub period_sec: i32,
}

impl Schedule {
    pub fn new(inclusion_patterns: Vec<Pattern>, period_sec: i32) -> Self {
        Self {
            inclusion_patterns,
            period_sec,
        }
    }

    /// Convenience for the common single-prefix schedule.
    pub fn starts_with(prefix: impl Into<String>, period_sec: i32) -> Self {
        Self::new(vec![Pattern::StartsWith(prefix.into())], period_sec)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.inclusion_patterns.iter().any(|p| p.matches(name))
    }

    /// The period, or `None` for disabled and invalid schedules.
    pub fn period(&self) -> Option<Duration> {
        (self.period_sec > 0).then(|| Duration::from_secs(self.period_sec as u64))
    }
}

/// Rejects schedules with negative periods.
pub fn validate_schedules(schedules: &[Schedule]) -> Result<(), ValidationError> {
    for (index, schedule) in schedules.iter().enumerate() {
        if schedule.period_sec < 0 {
            return Err(ValidationError::NegativePeriod {
                index,
                period_sec: schedule.period_sec,
            });
        }
    }
    Ok(())
}

/// Static attributes identifying this process to the config service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub attributes: BTreeMap<String, String>,
}

impl Resource {
    pub fn new<K, V>(attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with_service_name(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self::new([(SERVICE_NAME, name)])
    }

    pub fn service_name(&self) -> Option<&str> {
        self.attributes.get(SERVICE_NAME).map(String::as_str)
    }
}

/// One validated config snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub fingerprint: Fingerprint,
    pub schedules: Vec<Schedule>,
    /// Passed through untouched.
    #[serde(default)]
    pub trace_config: Option<serde_json::Value>,
    #[serde(default)]
    pub suggested_wait_time_sec: i32,
}

impl MetricConfig {
    pub fn new(fingerprint: impl Into<Fingerprint>, schedules: Vec<Schedule>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            schedules,
            trace_config: None,
            suggested_wait_time_sec: 0,
        }
    }

    /// A config with one schedule matching every instrument.
    pub fn with_default_schedule(period_sec: i32, fingerprint: impl Into<Fingerprint>) -> Self {
        Self::new(fingerprint, vec![Schedule::starts_with("", period_sec)])
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_schedules(&self.schedules)
    }

    pub fn same_snapshot(&self, other: &MetricConfig) -> bool {
        self.fingerprint == other.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(Pattern::StartsWith("one".into()).matches("one-fish"));
        assert!(!Pattern::StartsWith("one".into()).matches("two-fish"));
        assert!(Pattern::StartsWith(String::new()).matches("anything"));
        assert!(Pattern::Equals("cpu".into()).matches("cpu"));
        assert!(!Pattern::Equals("cpu".into()).matches("cpu.user"));
    }

    #[test]
    fn test_schedule_period() {
        assert_eq!(
            Schedule::starts_with("a", 30).period(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(Schedule::starts_with("a", 0).period(), None);
        assert_eq!(Schedule::starts_with("a", -1).period(), None);
    }

    #[test]
    fn test_validate_rejects_negative_period() {
        let config = MetricConfig::new(
            "fp",
            vec![Schedule::starts_with("a", 10), Schedule::starts_with("b", -3)],
        );
        assert_eq!(
            config.validate(),
            Err(ValidationError::NegativePeriod {
                index: 1,
                period_sec: -3
            })
        );
    }

    #[test]
    fn test_validate_accepts_zero_period() {
        let config = MetricConfig::new("fp", vec![Schedule::starts_with("a", 0)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_same_snapshot_compares_fingerprints() {
        let a = MetricConfig::with_default_schedule(60, "foo");
        let b = MetricConfig::with_default_schedule(30, "foo");
        let c = MetricConfig::with_default_schedule(60, "bar");
        assert!(a.same_snapshot(&b));
        assert!(!a.same_snapshot(&c));
    }

    #[test]
    fn test_resource_service_name() {
        let resource = Resource::with_service_name("checkout");
        assert_eq!(resource.service_name(), Some("checkout"));
    }

    #[test]
    fn test_pattern_serde_shape() {
        let json = serde_json::to_string(&Pattern::StartsWith("cpu".into())).unwrap();
        assert_eq!(json, r#"{"starts_with":"cpu"}"#);
    }
}
