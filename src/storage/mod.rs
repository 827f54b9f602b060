use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod sqlite;

pub use sqlite::SqliteExporter;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One stored export cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRound {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics_count: usize,
}

impl CollectionRound {
    /// The first eight characters of the id, or all of it when shorter.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_metrics: i64,
    pub total_collection_rounds: i64,
    pub latest_collection: Option<CollectionRound>,
    pub database_size_bytes: Option<u64>,
}
