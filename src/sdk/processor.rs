use chrono::Utc;

use super::{CheckpointSet, Processor, Record};
use crate::error::BoxError;

/// Collects records between `start_collection` and `finish_collection` and
/// publishes them as the next checkpoint.
#[derive(Default)]
pub struct BasicProcessor {
    pending: Vec<Record>,
    checkpoint: CheckpointSet,
    in_progress: bool,
}

impl BasicProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Processor for BasicProcessor {
    fn start_collection(&mut self) {
        self.pending.clear();
        self.in_progress = true;
    }

    fn process(&mut self, record: Record) {
        self.pending.push(record);
    }

    fn finish_collection(&mut self) -> Result<(), BoxError> {
        if !self.in_progress {
            return Err("finish_collection called without start_collection".into());
        }
        self.in_progress = false;
        self.checkpoint = CheckpointSet {
            records: std::mem::take(&mut self.pending),
            collected_at: Some(Utc::now()),
        };
        Ok(())
    }

    fn checkpoint_set(&self) -> &CheckpointSet {
        &self.checkpoint
    }
}
