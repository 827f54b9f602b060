use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{publish, quit_signal, ConfigReader, ConfigTransport, Monitor, MonitorChannel, ReadOutcome};
use crate::error::{Error, ErrorSink};
use crate::schedule::{MetricConfig, Resource};
use crate::ticker::Ticker;

/// How often the config service is polled until it suggests otherwise.
pub const DEFAULT_CHECK_FREQUENCY: Duration = Duration::from_secs(30 * 60);

/// Polls a [`ConfigReader`] and republishes changes.
///
/// Supports a single monitoring session; the reader is handed to the session
/// task and closed when the consumer quits.
pub struct BasicMonitor {
    reader: Mutex<Option<ConfigReader>>,
    check_frequency: Duration,
    sink: Arc<dyn ErrorSink>,
}

impl BasicMonitor {
    pub fn new(transport: Arc<dyn ConfigTransport>, resource: Resource, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            reader: Mutex::new(Some(ConfigReader::new(transport, resource))),
            check_frequency: DEFAULT_CHECK_FREQUENCY,
            sink,
        }
    }

    /// # Panics
    ///
    /// Panics if `check_frequency` is zero.
    pub fn with_check_frequency(mut self, check_frequency: Duration) -> Self {
        assert!(!check_frequency.is_zero(), "check frequency must be positive");
        self.check_frequency = check_frequency;
        self
    }
}

impl Monitor for BasicMonitor {
    fn monitor_changes(&self, channel: MonitorChannel) {
        let Some(reader) = self.reader.lock().take() else {
            warn!("config monitor already ran a session, not polling");
            let _ = channel.err.try_send(Error::MonitorAlreadyStarted);
            return;
        };

        let MonitorChannel { data, err, quit } = channel;
        let session = Session {
            reader,
            data,
            err,
            quit,
            sink: self.sink.clone(),
            ticker: Ticker::new(self.check_frequency),
        };
        tokio::spawn(session.run());
    }
}

struct Session {
    reader: ConfigReader,
    data: mpsc::Sender<MetricConfig>,
    err: mpsc::Sender<Error>,
    quit: watch::Receiver<bool>,
    sink: Arc<dyn ErrorSink>,
    ticker: Ticker,
}

impl Session {
    async fn run(mut self) {
        info!(
            check_secs = self.ticker.period().as_secs(),
            "config monitor started"
        );

        // First poll right away so the first config does not wait a full period.
        let mut running = self.poll().await;
        while running {
            running = tokio::select! {
                biased;
                _ = quit_signal(&mut self.quit) => false,
                _ = self.ticker.tick() => self.poll().await,
            };
        }

        if let Err(err) = self.reader.stop().await {
            self.sink.report(err);
        }
        info!("config monitor stopped");
    }

    /// Returns false once the consumer is gone.
    async fn poll(&mut self) -> bool {
        match self.reader.read_config().await {
            Ok(outcome) => {
                self.update_wait_time(self.reader.suggested_wait());
                match outcome {
                    ReadOutcome::Changed(config) => publish(&self.data, &mut self.quit, config).await,
                    ReadOutcome::Unchanged => true,
                }
            }
            Err(err) => publish(&self.err, &mut self.quit, err).await,
        }
    }

    fn update_wait_time(&mut self, wait: Duration) {
        if wait.is_zero() || wait == self.ticker.period() {
            return;
        }
        debug!(wait_secs = wait.as_secs(), "config service changed poll interval");
        self.ticker = Ticker::new(wait);
    }
}

/// Publishes a fixed sequence of configs, then idles until quit.
pub struct StaticMonitor {
    configs: Vec<MetricConfig>,
}

impl StaticMonitor {
    pub fn new(configs: Vec<MetricConfig>) -> Self {
        Self { configs }
    }

    /// Publishes one config matching every instrument at `period_sec`.
    pub fn with_period(period_sec: i32) -> Self {
        Self::new(vec![MetricConfig::with_default_schedule(period_sec, "static")])
    }
}

impl Monitor for StaticMonitor {
    fn monitor_changes(&self, channel: MonitorChannel) {
        let configs = self.configs.clone();
        tokio::spawn(async move {
            let MonitorChannel { data, err, mut quit } = channel;
            for config in configs {
                if !publish(&data, &mut quit, config).await {
                    return;
                }
            }
            quit_signal(&mut quit).await;
            drop(err);
        });
    }
}
