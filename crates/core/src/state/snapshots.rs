//! # Snapshot Store
//!
//! Durable key -> record storage for encoded pipeline states. The autosave
//! lives under a fixed key; every run also keeps a record under its thread id.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::db::InquiryDb;

/// Key of the record restored on startup
pub const AUTOSAVE_KEY: &str = "autosave";

/// Key of the per-run record
pub fn run_key(thread_id: &str) -> String {
    format!("run:{}", thread_id)
}

/// Listing entry for a stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub key: String,
    pub thread_id: String,
    pub topic: String,
    pub stage: String,
    pub iteration: u32,
    pub updated_at: DateTime<Utc>,
}

pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, record: &str) -> Result<()>;
    /// Returns whether a record was removed
    fn delete(&self, key: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<SnapshotRecord>>;
}

/// Columns lifted out of an encoded record for listing
struct RecordSummary {
    thread_id: String,
    topic: String,
    stage: String,
    iteration: u32,
}

impl RecordSummary {
    fn from_record(record: &str) -> Self {
        let value: serde_json::Value = serde_json::from_str(record).unwrap_or_default();
        let state = &value["state"];
        let text = |field: &str| state[field].as_str().unwrap_or_default().to_string();
        Self {
            thread_id: text("thread_id"),
            topic: text("topic"),
            stage: state["current_stage"].as_str().unwrap_or("idle").to_string(),
            iteration: state["iteration_number"].as_u64().unwrap_or(1) as u32,
        }
    }
}

/// Snapshot store backed by the `snapshots` table
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteSnapshotStore {
    pub fn new(db: &InquiryDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            "SELECT data FROM snapshots WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to load snapshot '{}'", key))
    }

    fn set(&self, key: &str, record: &str) -> Result<()> {
        let summary = RecordSummary::from_record(record);
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO snapshots (key, thread_id, topic, stage, iteration, data, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(key) DO UPDATE SET
                thread_id = ?2,
                topic = ?3,
                stage = ?4,
                iteration = ?5,
                data = ?6,
                updated_at = ?7
            "#,
            params![
                key,
                summary.thread_id,
                summary.topic,
                summary.stage,
                summary.iteration,
                record,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to save snapshot")?;

        tracing::debug!(key = %key, stage = %summary.stage, "Snapshot saved");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let rows = conn.execute("DELETE FROM snapshots WHERE key = ?1", params![key])?;
        if rows > 0 {
            tracing::info!(key = %key, "Snapshot deleted");
        }
        Ok(rows > 0)
    }

    fn list(&self) -> Result<Vec<SnapshotRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT key, thread_id, topic, stage, iteration, updated_at
            FROM snapshots ORDER BY updated_at DESC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let updated_at: String = row.get(5)?;
            Ok(SnapshotRecord {
                key: row.get(0)?,
                thread_id: row.get(1)?,
                topic: row.get(2)?,
                stage: row.get(3)?,
                iteration: row.get(4)?,
                updated_at: DateTime::parse_from_rfc3339(&updated_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

/// Process-local store for tests and one-shot CLI runs
#[derive(Default)]
pub struct MemorySnapshotStore {
    records: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(records.get(key).map(|(record, _)| record.clone()))
    }

    fn set(&self, key: &str, record: &str) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        records.insert(key.to_string(), (record.to_string(), Utc::now()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(records.remove(key).is_some())
    }

    fn list(&self) -> Result<Vec<SnapshotRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let mut listed: Vec<SnapshotRecord> = records
            .iter()
            .map(|(key, (record, updated_at))| {
                let summary = RecordSummary::from_record(record);
                SnapshotRecord {
                    key: key.clone(),
                    thread_id: summary.thread_id,
                    topic: summary.topic,
                    stage: summary.stage,
                    iteration: summary.iteration,
                    updated_at: *updated_at,
                }
            })
            .collect();
        listed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{codec, PipelineState};

    fn stores() -> Vec<Box<dyn SnapshotStore>> {
        let db = InquiryDb::open_in_memory().unwrap();
        vec![
            Box::new(SqliteSnapshotStore::new(&db)),
            Box::new(MemorySnapshotStore::new()),
        ]
    }

    #[test]
    fn test_set_get_delete() {
        for store in stores() {
            let state = PipelineState::new("coral bleaching");
            let record = codec::encode(&state);

            assert_eq!(store.get(AUTOSAVE_KEY).unwrap(), None);
            store.set(AUTOSAVE_KEY, &record).unwrap();
            assert_eq!(store.get(AUTOSAVE_KEY).unwrap(), Some(record.clone()));

            assert!(store.delete(AUTOSAVE_KEY).unwrap());
            assert!(!store.delete(AUTOSAVE_KEY).unwrap());
            assert_eq!(store.get(AUTOSAVE_KEY).unwrap(), None);
        }
    }

    #[test]
    fn test_set_overwrites() {
        for store in stores() {
            store.set("k", "first").unwrap();
            store.set("k", "second").unwrap();
            assert_eq!(store.get("k").unwrap().as_deref(), Some("second"));
            assert_eq!(store.list().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_list_reads_summary_columns() {
        for store in stores() {
            let state = PipelineState::new("tidal energy");
            let key = run_key(&state.thread_id);
            store.set(&key, &codec::encode(&state)).unwrap();

            let listed = store.list().unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].key, key);
            assert_eq!(listed[0].topic, "tidal energy");
            assert_eq!(listed[0].thread_id, state.thread_id);
            assert_eq!(listed[0].stage, "idle");
            assert_eq!(listed[0].iteration, 1);
        }
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inquiry.db");
        let record = codec::encode(&PipelineState::new("persisted"));

        {
            let db = InquiryDb::open_at(&path).unwrap();
            SqliteSnapshotStore::new(&db)
                .set(AUTOSAVE_KEY, &record)
                .unwrap();
        }

        let db = InquiryDb::open_at(&path).unwrap();
        let store = SqliteSnapshotStore::new(&db);
        let restored = codec::decode(&store.get(AUTOSAVE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(restored.topic, "persisted");
    }
}
