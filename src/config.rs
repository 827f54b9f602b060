//! Process configuration, loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::LogConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address of the config service, `host:port`.
    #[serde(default = "default_config_host")]
    pub config_host: String,

    /// Sent as `service.name` on every poll.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_export_timeout_secs")]
    pub export_timeout_secs: u64,

    /// Poll interval until the config service suggests another one.
    #[serde(default = "default_check_frequency_secs")]
    pub check_frequency_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Ticking period when no schedule is active.
    #[serde(default = "default_fallback_period_secs")]
    pub fallback_period_secs: u64,

    /// Export backend: "log" or "sqlite".
    #[serde(default = "default_exporter")]
    pub exporter: String,

    /// Database file for the sqlite exporter. Defaults to `~/.tickwise/tickwise.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_config_host() -> String {
    "127.0.0.1:50420".to_string()
}

fn default_service_name() -> String {
    "tickwise".to_string()
}

fn default_export_timeout_secs() -> u64 {
    600
}

fn default_check_frequency_secs() -> u64 {
    1800
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_fallback_period_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_exporter() -> String {
    "log".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_host: default_config_host(),
            service_name: default_service_name(),
            export_timeout_secs: default_export_timeout_secs(),
            check_frequency_secs: default_check_frequency_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            fallback_period_secs: default_fallback_period_secs(),
            exporter: default_exporter(),
            db_path: None,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("export_timeout_secs", self.export_timeout_secs),
            ("check_frequency_secs", self.check_frequency_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("fallback_period_secs", self.fallback_period_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", field)));
            }
        }
        match self.exporter.as_str() {
            "log" | "sqlite" => Ok(()),
            other => Err(Error::Config(format!("unknown exporter '{}'", other))),
        }
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn check_frequency(&self) -> Duration {
        Duration::from_secs(self.check_frequency_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fallback_period(&self) -> Duration {
        Duration::from_secs(self.fallback_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.export_timeout(), Duration::from_secs(600));
        assert_eq!(config.check_frequency(), Duration::from_secs(1800));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.fallback_period(), Duration::from_secs(604_800));
        assert_eq!(config.exporter, "log");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
config_host = "config.internal:7000"
service_name = "checkout"
exporter = "sqlite"
db_path = "/var/lib/tickwise/metrics.db"

[log]
level = "debug"
json_format = true
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.config_host, "config.internal:7000");
        assert_eq!(config.service_name, "checkout");
        assert_eq!(config.exporter, "sqlite");
        assert_eq!(config.db_path, Some(PathBuf::from("/var/lib/tickwise/metrics.db")));
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json_format);
        assert_eq!(config.check_frequency_secs, 1800);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = AppConfig {
            export_timeout_secs: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: export_timeout_secs must be positive"
        );
    }

    #[test]
    fn test_validate_rejects_unknown_exporter() {
        let config = AppConfig {
            exporter: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "export_timeout_secs = \"soon\"").unwrap();
        assert!(matches!(AppConfig::load(file.path()), Err(Error::Config(_))));
    }
}
