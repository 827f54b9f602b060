//! A config source backed by a TOML file, re-read on every request.
//!
//! ```toml
//! suggested_wait_time_sec = 60
//!
//! [[schedules]]
//! period_sec = 10
//! inclusion_patterns = [{ starts_with = "system." }]
//! ```

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::tcp::ConfigSource;
use super::{ConfigRequest, ConfigResponse, WireMetricConfig};
use crate::error::{Error, Result};
use crate::schedule::{validate_schedules, Fingerprint, Schedule};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFile {
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub suggested_wait_time_sec: i32,
}

/// Serves the schedules in a file. The fingerprint is a hash of the file
/// contents, so any edit is seen as a new config.
pub struct FileSource {
    path: PathBuf,
    last_good: Mutex<ConfigResponse>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_good: Mutex::new(ConfigResponse::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the file.
    pub fn load(&self) -> Result<ConfigResponse> {
        let content = std::fs::read_to_string(&self.path)?;
        let file: ScheduleFile = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", self.path.display(), e)))?;
        validate_schedules(&file.schedules)?;

        Ok(ConfigResponse {
            fingerprint: content_fingerprint(&content),
            metric_config: Some(WireMetricConfig {
                schedules: file.schedules,
            }),
            trace_config: None,
            suggested_wait_time_sec: file.suggested_wait_time_sec,
        })
    }
}

impl ConfigSource for FileSource {
    /// Falls back to the last file contents that loaded cleanly.
    fn respond(&self, request: &ConfigRequest) -> ConfigResponse {
        let mut last_good = self.last_good.lock();
        match self.load() {
            Ok(response) => {
                if response.fingerprint != last_good.fingerprint {
                    info!(path = %self.path.display(), "schedule file changed");
                }
                *last_good = response;
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "keeping last good schedules"),
        }
        info!(
            service = request.resource.service_name().unwrap_or("unknown"),
            "config requested"
        );
        last_good.clone()
    }
}

/// Name-based (SHA-1) uuid of the contents, stable across builds and hosts.
fn content_fingerprint(content: &str) -> Fingerprint {
    Fingerprint::from(Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string().as_str())
}
