use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            json_format: false,
        }
    }
}

/// Installs the global subscriber. Call once at program startup.
pub fn init_logging(config: &LogConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json_format {
        Box::new(fmt::layer().json())
    } else {
        Box::new(fmt::layer())
    };

    tracing_subscriber::registry().with(env_filter).with(console_layer).init();
}
