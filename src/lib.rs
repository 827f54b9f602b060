//! Push-based metrics export whose cadence and per-cycle selection are
//! reconfigured at runtime by a remote config service.

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod remote;
pub mod schedule;
pub mod sdk;
pub mod storage;
pub mod ticker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::AppConfig;
pub use controller::{PushController, PushOptions};
pub use error::{Error, ErrorSink, LogErrorSink, Result};
pub use notifier::{ConfigWatcher, Notifier};
pub use schedule::{Fingerprint, MetricConfig, Pattern, Resource, Schedule};
