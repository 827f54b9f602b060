use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{CollectionRound, StorageError, StorageStats};
use crate::error::BoxError;
use crate::sdk::{CheckpointSet, Exporter, MetricValue, Record};

/// Stores each exported checkpoint as a collection round in SQLite.
pub struct SqliteExporter {
    db_path: PathBuf,
}

impl SqliteExporter {
    pub fn new(db_path: Option<PathBuf>) -> Self {
        Self {
            db_path: db_path.unwrap_or_else(Self::default_path),
        }
    }

    pub fn default_path() -> PathBuf {
        let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home_dir).join(".tickwise").join("tickwise.db")
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn get_connection(&self) -> Result<Connection, StorageError> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Creates the database directory and tables if missing.
    pub fn initialize(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = self.get_connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS collection_rounds (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                metrics_count INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_round_id TEXT NOT NULL,
                name TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                value_type TEXT NOT NULL,
                value_int INTEGER,
                value_float REAL,
                value_text TEXT,
                value_bool INTEGER,
                labels TEXT NOT NULL,
                FOREIGN KEY(collection_round_id) REFERENCES collection_rounds(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_collection_round
             ON metrics(collection_round_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_name_timestamp
             ON metrics(name, timestamp DESC)",
            [],
        )?;

        Ok(())
    }

    pub fn store_checkpoint(&self, checkpoint: &CheckpointSet) -> Result<CollectionRound, StorageError> {
        let mut conn = self.get_connection()?;
        let round = CollectionRound {
            id: Uuid::new_v4().to_string(),
            timestamp: checkpoint.collected_at.unwrap_or_else(Utc::now),
            metrics_count: checkpoint.len(),
        };

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO collection_rounds (id, timestamp, metrics_count) VALUES (?1, ?2, ?3)",
            params![round.id, round.timestamp.to_rfc3339(), round.metrics_count as i64],
        )?;

        for record in &checkpoint.records {
            let labels = serde_json::to_string(&record.labels)?;
            let (value_type, int, float, text, boolean) = match &record.value {
                MetricValue::Integer(v) => ("integer", Some(*v), None, None, None),
                MetricValue::Float(v) => ("float", None, Some(*v), None, None),
                MetricValue::String(v) => ("string", None, None, Some(v.as_str()), None),
                MetricValue::Boolean(v) => ("boolean", None, None, None, Some(*v as i32)),
            };
            tx.execute(
                "INSERT INTO metrics (collection_round_id, name, timestamp, value_type,
                                      value_int, value_float, value_text, value_bool, labels)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    round.id,
                    record.name,
                    record.timestamp.timestamp_millis(),
                    value_type,
                    int,
                    float,
                    text,
                    boolean,
                    labels
                ],
            )?;
        }

        tx.commit()?;
        Ok(round)
    }

    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let conn = self.get_connection()?;

        let total_metrics: i64 = conn.query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
        let total_collection_rounds: i64 =
            conn.query_row("SELECT COUNT(*) FROM collection_rounds", [], |row| row.get(0))?;

        let latest_collection = conn
            .query_row(
                "SELECT id, timestamp, metrics_count FROM collection_rounds
                 ORDER BY timestamp DESC LIMIT 1",
                [],
                round_from_row,
            )
            .optional()?;

        let database_size_bytes = fs::metadata(&self.db_path).map(|m| m.len()).ok();

        Ok(StorageStats {
            total_metrics,
            total_collection_rounds,
            latest_collection,
            database_size_bytes,
        })
    }

    pub fn latest_rounds(&self, limit: usize) -> Result<Vec<CollectionRound>, StorageError> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, metrics_count FROM collection_rounds
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rounds = stmt
            .query_map([limit as i64], round_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rounds)
    }

    pub fn records_for_round(&self, round_id: &str) -> Result<Vec<Record>, StorageError> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT name, timestamp, value_type, value_int, value_float, value_text, value_bool, labels
             FROM metrics
             WHERE collection_round_id = ?1
             ORDER BY id",
        )?;
        let records = stmt
            .query_map([round_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn round_from_row(row: &Row<'_>) -> rusqlite::Result<CollectionRound> {
    let id: String = row.get(0)?;
    let timestamp_str: String = row.get(1)?;
    let metrics_count = row.get::<_, i64>(2)? as usize;

    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(CollectionRound {
        id,
        timestamp,
        metrics_count,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let name: String = row.get(0)?;
    let timestamp_ms: i64 = row.get(1)?;
    let value_type: String = row.get(2)?;
    let labels_json: String = row.get(7)?;

    let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, Box::new(std::fmt::Error))
    })?;

    let value = match value_type.as_str() {
        "integer" => MetricValue::Integer(row.get(3)?),
        "float" => MetricValue::Float(row.get(4)?),
        "string" => MetricValue::String(row.get(5)?),
        "boolean" => MetricValue::Boolean(row.get::<_, i32>(6)? != 0),
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::fmt::Error),
            ))
        }
    };

    let labels: HashMap<String, String> = serde_json::from_str(&labels_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Record {
        name,
        value,
        timestamp,
        labels,
    })
}

#[async_trait]
impl Exporter for SqliteExporter {
    async fn export(&self, checkpoint: &CheckpointSet) -> Result<(), BoxError> {
        let exporter = SqliteExporter::new(Some(self.db_path.clone()));
        let checkpoint = checkpoint.clone();
        let round = tokio::task::spawn_blocking(move || exporter.store_checkpoint(&checkpoint))
            .await
            .map_err(StorageError::from)??;
        tracing::debug!(round = %round.id, metrics = round.metrics_count, "stored checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> CheckpointSet {
        let mut labels = HashMap::new();
        labels.insert("core_id".to_string(), "0".to_string());
        CheckpointSet {
            records: vec![
                Record::new("cpu.ticks", MetricValue::Integer(12345), labels),
                Record::new("cpu.load", MetricValue::Float(0.5), HashMap::new()),
                Record::new("host.name", MetricValue::String("alpha".into()), HashMap::new()),
                Record::new("host.up", MetricValue::Boolean(true), HashMap::new()),
            ],
            collected_at: Some(Utc::now()),
        }
    }

    fn exporter_in(dir: &tempfile::TempDir) -> SqliteExporter {
        let exporter = SqliteExporter::new(Some(dir.path().join("nested").join("test.db")));
        exporter.initialize().unwrap();
        exporter
    }

    #[test]
    fn test_initialize_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = exporter_in(&dir);
        let conn = exporter.get_connection().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
                 AND name IN ('metrics', 'collection_rounds')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_store_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = exporter_in(&dir);
        let stored = checkpoint();

        let round = exporter.store_checkpoint(&stored).unwrap();
        assert_eq!(round.metrics_count, 4);

        let records = exporter.records_for_round(&round.id).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].name, "cpu.ticks");
        assert_eq!(records[0].value, MetricValue::Integer(12345));
        assert_eq!(records[0].labels.get("core_id").map(String::as_str), Some("0"));
        assert_eq!(records[2].value, MetricValue::String("alpha".into()));
        assert_eq!(records[3].value, MetricValue::Boolean(true));
    }

    #[test]
    fn test_stats_and_latest_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = exporter_in(&dir);
        exporter.store_checkpoint(&checkpoint()).unwrap();
        exporter.store_checkpoint(&CheckpointSet::default()).unwrap();

        let stats = exporter.stats().unwrap();
        assert_eq!(stats.total_collection_rounds, 2);
        assert_eq!(stats.total_metrics, 4);
        assert!(stats.latest_collection.is_some());
        assert!(stats.database_size_bytes.unwrap_or(0) > 0);

        assert_eq!(exporter.latest_rounds(1).unwrap().len(), 1);
        assert_eq!(exporter.latest_rounds(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_export_stores_round() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = exporter_in(&dir);
        exporter.export(&checkpoint()).await.unwrap();
        assert_eq!(exporter.stats().unwrap().total_collection_rounds, 1);
    }
}
