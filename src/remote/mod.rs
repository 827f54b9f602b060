//! Talking to the remote config service.
//!
//! [`ConfigReader`] does one round trip, [`BasicMonitor`] polls it on an
//! adaptive ticker and republishes changes over a [`MonitorChannel`].

pub mod file;
#[cfg(test)]
pub(crate) mod mock;
pub mod monitor;
pub mod reader;
pub mod tcp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::error::{Error, TransportError, ValidationError};
use crate::schedule::{validate_schedules, Fingerprint, MetricConfig, Resource, Schedule};

pub use file::{FileSource, ScheduleFile};
pub use monitor::{BasicMonitor, StaticMonitor, DEFAULT_CHECK_FREQUENCY};
pub use reader::{ConfigReader, PollState, ReadOutcome};
pub use tcp::{serve, ConfigSource, TcpTransport};

const CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRequest {
    #[serde(default)]
    pub last_known_fingerprint: Fingerprint,
    pub resource: Resource,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMetricConfig {
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigResponse {
    #[serde(default)]
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub metric_config: Option<WireMetricConfig>,
    #[serde(default)]
    pub trace_config: Option<serde_json::Value>,
    #[serde(default)]
    pub suggested_wait_time_sec: i32,
}

impl ConfigResponse {
    pub fn from_config(config: &MetricConfig) -> Self {
        Self {
            fingerprint: config.fingerprint.clone(),
            metric_config: Some(WireMetricConfig {
                schedules: config.schedules.clone(),
            }),
            trace_config: config.trace_config.clone(),
            suggested_wait_time_sec: config.suggested_wait_time_sec,
        }
    }

    /// Validates the payload and turns it into a [`MetricConfig`].
    pub fn into_config(self) -> Result<MetricConfig, ValidationError> {
        let metric_config = self
            .metric_config
            .ok_or(ValidationError::MissingMetricConfig)?;
        validate_schedules(&metric_config.schedules)?;
        Ok(MetricConfig {
            fingerprint: self.fingerprint,
            schedules: metric_config.schedules,
            trace_config: self.trace_config,
            suggested_wait_time_sec: self.suggested_wait_time_sec,
        })
    }
}

/// Request/response link to the config service.
#[async_trait]
pub trait ConfigTransport: Send + Sync {
    async fn get_config(&self, request: ConfigRequest) -> Result<ConfigResponse, TransportError>;

    /// Releases the underlying connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Watches for config changes and publishes them on a channel.
pub trait Monitor: Send + Sync {
    /// Spawns the watching task and returns immediately. Must be called from
    /// within a tokio runtime.
    fn monitor_changes(&self, channel: MonitorChannel);
}

/// Producer half of the monitor protocol, owned by the monitor task.
pub struct MonitorChannel {
    pub data: mpsc::Sender<MetricConfig>,
    pub err: mpsc::Sender<Error>,
    pub quit: watch::Receiver<bool>,
}

/// Consumer half of the monitor protocol.
pub struct MonitorHandle {
    pub data: mpsc::Receiver<MetricConfig>,
    pub err: mpsc::Receiver<Error>,
    quit: Option<watch::Sender<bool>>,
}

impl MonitorHandle {
    /// Tells the monitor to stop. Idempotent.
    pub fn quit(&mut self) {
        if let Some(quit) = self.quit.take() {
            let _ = quit.send(true);
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.quit();
    }
}

pub fn monitor_channel() -> (MonitorChannel, MonitorHandle) {
    let (data_tx, data_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (quit_tx, quit_rx) = watch::channel(false);
    (
        MonitorChannel {
            data: data_tx,
            err: err_tx,
            quit: quit_rx,
        },
        MonitorHandle {
            data: data_rx,
            err: err_rx,
            quit: Some(quit_tx),
        },
    )
}

/// Resolves once the consumer has quit, either explicitly or by going away.
pub async fn quit_signal(quit: &mut watch::Receiver<bool>) {
    let _ = quit.wait_for(|quit| *quit).await;
}

/// Sends `value` unless the consumer quits first. Returns false when the
/// monitor should stop.
pub async fn publish<T>(tx: &mpsc::Sender<T>, quit: &mut watch::Receiver<bool>, value: T) -> bool {
    tokio::select! {
        biased;
        _ = quit_signal(quit) => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}
