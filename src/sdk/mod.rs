//! The collect/checkpoint/export pipeline driven by the push controller.
//!
//! An [`Accumulator`] walks its instruments and feeds the ones the tick's rule
//! selects into a [`Processor`], which freezes them into a [`CheckpointSet`]
//! for the [`Exporter`].

pub mod accumulator;
pub mod exporter;
pub mod processor;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BoxError;

pub use accumulator::{Counter, Gauge, Registry};
pub use exporter::{InMemoryExporter, LogExporter};
pub use processor::BasicProcessor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

/// One collected data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
    pub labels: HashMap<String, String>,
}

impl Record {
    pub fn new(name: impl Into<String>, value: MetricValue, labels: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
            labels,
        }
    }
}

/// The frozen output of one collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSet {
    pub records: Vec<Record>,
    pub collected_at: Option<DateTime<Utc>>,
}

impl CheckpointSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }
}

/// A source of values read at collection time, registered as one instrument.
pub trait Collector: Send + Sync {
    /// Instrument name matched against schedules.
    fn name(&self) -> &str;

    fn collect(&self) -> Result<Vec<Record>, BoxError>;
}

/// Walks registered instruments and aggregates the selected ones.
pub trait Accumulator: Send + Sync {
    /// Feeds every instrument `rule` accepts into `processor`. Returns the
    /// number of records produced.
    fn collect(&self, rule: &mut dyn FnMut(&str) -> bool, processor: &mut dyn Processor) -> usize;
}

/// Checkpoint lifecycle. Per cycle: `start_collection`, any number of
/// `process`, `finish_collection`, then `checkpoint_set`.
pub trait Processor: Send {
    fn start_collection(&mut self);

    fn process(&mut self, record: Record);

    fn finish_collection(&mut self) -> Result<(), BoxError>;

    fn checkpoint_set(&self) -> &CheckpointSet;
}

#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, checkpoint: &CheckpointSet) -> Result<(), BoxError>;
}
