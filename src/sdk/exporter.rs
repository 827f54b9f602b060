use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CheckpointSet, Exporter, MetricValue};
use crate::error::BoxError;

/// Logs every record via `tracing`.
pub struct LogExporter;

#[async_trait]
impl Exporter for LogExporter {
    async fn export(&self, checkpoint: &CheckpointSet) -> Result<(), BoxError> {
        for record in &checkpoint.records {
            let value = match &record.value {
                MetricValue::Integer(i) => i.to_string(),
                MetricValue::Float(f) => format!("{:.3}", f),
                MetricValue::String(s) => s.clone(),
                MetricValue::Boolean(b) => b.to_string(),
            };
            tracing::info!(
                name = %record.name,
                value = %value,
                labels = ?record.labels,
                timestamp = %record.timestamp,
                "metric"
            );
        }
        Ok(())
    }
}

/// Keeps every exported checkpoint in memory.
#[derive(Default)]
pub struct InMemoryExporter {
    exports: Mutex<Vec<CheckpointSet>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of export calls so far.
    pub fn count(&self) -> usize {
        self.exports.lock().len()
    }

    pub fn exports(&self) -> Vec<CheckpointSet> {
        self.exports.lock().clone()
    }

    pub fn take(&self) -> Vec<CheckpointSet> {
        std::mem::take(&mut *self.exports.lock())
    }
}

#[async_trait]
impl Exporter for InMemoryExporter {
    async fn export(&self, checkpoint: &CheckpointSet) -> Result<(), BoxError> {
        self.exports.lock().push(checkpoint.clone());
        Ok(())
    }
}
