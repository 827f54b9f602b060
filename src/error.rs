use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by pipeline collaborators (processors, exporters).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while talking to the config service.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A config payload that is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no metric config in response")]
    MissingMetricConfig,

    #[error("schedule {index} has negative period {period_sec}s")]
    NegativePeriod { index: usize, period_sec: i32 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("fail to get metric config: {0}")]
    Transport(#[source] TransportError),

    #[error("metric config invalid: {0}")]
    Validation(#[from] ValidationError),

    #[error("fail to close connection to config backend: {0}")]
    Teardown(#[source] TransportError),

    #[error("finish collection failed: {0}")]
    Checkpoint(#[source] BoxError),

    #[error("export failed: {0}")]
    Export(#[source] BoxError),

    #[error("export timed out after {0:?}")]
    ExportTimeout(Duration),

    #[error("config monitor already started")]
    MonitorAlreadyStarted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for recoverable errors raised by background loops.
///
/// Every component that runs a loop takes one at construction instead of
/// reaching for a process-wide handler.
pub trait ErrorSink: Send + Sync {
    fn report(&self, err: Error);
}

/// Reports errors through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, err: Error) {
        tracing::error!(error = %err, "pipeline error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_negative_period() {
        let err = Error::from(ValidationError::NegativePeriod {
            index: 2,
            period_sec: -5,
        });
        assert_eq!(
            err.to_string(),
            "metric config invalid: schedule 2 has negative period -5s"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let err: TransportError = io_err.into();
        assert!(matches!(err, TransportError::Io(_)));
        assert!(Error::Transport(err).to_string().contains("pipe broke"));
    }
}
