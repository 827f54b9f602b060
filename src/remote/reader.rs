use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{ConfigRequest, ConfigTransport};
use crate::error::{Error, Result};
use crate::schedule::{Fingerprint, MetricConfig, Resource};

/// What the reader knows about the last successful poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollState {
    pub last_fingerprint: Fingerprint,
    pub last_poll: Option<DateTime<Utc>>,
    pub suggested_wait: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Changed(MetricConfig),
    Unchanged,
}

/// Reads the latest config from the config service, one round trip at a time.
pub struct ConfigReader {
    transport: Arc<dyn ConfigTransport>,
    resource: Resource,
    state: PollState,
}

impl ConfigReader {
    pub fn new(transport: Arc<dyn ConfigTransport>, resource: Resource) -> Self {
        Self {
            transport,
            resource,
            state: PollState::default(),
        }
    }

    /// Asks for the latest config.
    ///
    /// Returns `Unchanged` when the service answers with the fingerprint we
    /// already hold. Transport and validation failures leave the poll state
    /// untouched.
    pub async fn read_config(&mut self) -> Result<ReadOutcome> {
        let request = ConfigRequest {
            last_known_fingerprint: self.state.last_fingerprint.clone(),
            resource: self.resource.clone(),
            timestamp: Utc::now(),
        };

        let response = self
            .transport
            .get_config(request)
            .await
            .map_err(Error::Transport)?;

        let now = Utc::now();
        let suggested_wait = Duration::from_secs(response.suggested_wait_time_sec.max(0) as u64);

        // The first successful answer always counts as a change, even when the
        // service leaves the fingerprint empty.
        if self.state.last_poll.is_some() && response.fingerprint == self.state.last_fingerprint {
            self.state.last_poll = Some(now);
            self.state.suggested_wait = suggested_wait;
            return Ok(ReadOutcome::Unchanged);
        }

        let config = response.into_config()?;
        self.state = PollState {
            last_fingerprint: config.fingerprint.clone(),
            last_poll: Some(now),
            suggested_wait,
        };
        tracing::debug!(
            schedules = config.schedules.len(),
            wait_secs = suggested_wait.as_secs(),
            "metric config changed"
        );
        Ok(ReadOutcome::Changed(config))
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn suggested_wait(&self) -> Duration {
        self.state.suggested_wait
    }

    pub fn last_fingerprint(&self) -> &Fingerprint {
        &self.state.last_fingerprint
    }

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        self.state.last_poll
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub async fn stop(&self) -> Result<()> {
        self.transport.close().await.map_err(Error::Teardown)
    }
}
