//! Append-only usage records and the background meter that writes them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use worldgraph_core::{SharedConnection, WorldgraphError, WorldgraphResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS usage_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id TEXT NOT NULL,
    feature_id TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    metadata TEXT,
    recorded_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS usage_records_actor_time
    ON usage_records (actor_id, recorded_at_ms);
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub actor_id: String,
    pub feature_id: String,
    pub quantity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(actor_id: impl Into<String>, feature_id: impl Into<String>, quantity: u64) -> Self {
        Self {
            actor_id: actor_id.into(),
            feature_id: feature_id.into(),
            quantity,
            metadata: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Clone)]
pub struct UsageStore {
    conn: SharedConnection,
}

impl UsageStore {
    pub fn open(conn: SharedConnection) -> WorldgraphResult<Self> {
        conn.lock().execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn append(&self, record: &UsageRecord) -> WorldgraphResult<()> {
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let quantity = i64::try_from(record.quantity)
            .map_err(|_| WorldgraphError::invalid(format!("usage quantity {} out of range", record.quantity)))?;
        self.conn.lock().execute(
            "INSERT INTO usage_records (actor_id, feature_id, quantity, metadata, recorded_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.actor_id,
                record.feature_id,
                quantity,
                metadata,
                record.recorded_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Summed quantity per feature for records at or after `since`.
    pub fn totals(&self, actor_id: &str, since: DateTime<Utc>) -> WorldgraphResult<BTreeMap<String, u64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT feature_id, SUM(quantity) FROM usage_records
             WHERE actor_id = ?1 AND recorded_at_ms >= ?2
             GROUP BY feature_id",
        )?;
        let rows = stmt.query_map(params![actor_id, since.timestamp_millis()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (feature, total) = row?;
            out.insert(feature, total.max(0) as u64);
        }
        Ok(out)
    }

    /// Records of one actor, oldest first.
    pub fn records(&self, actor_id: &str) -> WorldgraphResult<Vec<UsageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT actor_id, feature_id, quantity, metadata, recorded_at_ms FROM usage_records
             WHERE actor_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![actor_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (actor_id, feature_id, quantity, metadata, recorded_at_ms) = row?;
            let recorded_at = DateTime::from_timestamp_millis(recorded_at_ms).ok_or_else(|| {
                WorldgraphError::upstream(format!("corrupt usage timestamp {recorded_at_ms}"))
            })?;
            out.push(UsageRecord {
                actor_id,
                feature_id,
                quantity: quantity.max(0) as u64,
                metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
                recorded_at,
            });
        }
        Ok(out)
    }
}

enum UsageCommand {
    Record(UsageRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Fire-and-forget usage writer.
///
/// Records go through a bounded queue to a dedicated thread that appends them
/// to the [`UsageStore`]. A full queue or a failed write drops the record with
/// a warning; callers never wait on metering.
#[derive(Clone, Debug)]
pub struct UsageMeter {
    tx: mpsc::Sender<UsageCommand>,
}

impl UsageMeter {
    pub fn spawn(store: UsageStore, capacity: usize) -> WorldgraphResult<Self> {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        std::thread::Builder::new()
            .name("worldgraph_usage_meter".to_string())
            .spawn(move || {
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        UsageCommand::Record(record) => {
                            if let Err(err) = store.append(&record) {
                                tracing::warn!(
                                    actor_id = %record.actor_id,
                                    feature_id = %record.feature_id,
                                    error = %err,
                                    "failed to write usage record"
                                );
                            }
                        }
                        UsageCommand::Flush(ack) => {
                            let _ = ack.send(());
                        }
                        UsageCommand::Shutdown(ack) => {
                            rx.close();
                            while let Ok(queued) = rx.try_recv() {
                                match queued {
                                    UsageCommand::Record(record) => {
                                        if let Err(err) = store.append(&record) {
                                            tracing::warn!(error = %err, "failed to write usage record during shutdown");
                                        }
                                    }
                                    UsageCommand::Flush(waiter) | UsageCommand::Shutdown(waiter) => {
                                        let _ = waiter.send(());
                                    }
                                }
                            }
                            let _ = ack.send(());
                            break;
                        }
                    }
                }
                tracing::debug!("usage meter stopped");
            })?;
        Ok(Self { tx })
    }

    /// Queue a record. Returns false if it was dropped.
    pub fn record(&self, record: UsageRecord) -> bool {
        match self.tx.try_send(UsageCommand::Record(record)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(UsageCommand::Record(record))) => {
                tracing::warn!(
                    actor_id = %record.actor_id,
                    feature_id = %record.feature_id,
                    "usage queue full, dropping record"
                );
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "usage meter stopped, dropping record");
                false
            }
        }
    }

    /// Wait until every record queued before this call has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(UsageCommand::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Write whatever is queued and stop the worker. Later records are dropped.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(UsageCommand::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use worldgraph_core::db::{open_in_memory, share};

    fn store() -> UsageStore {
        UsageStore::open(share(open_in_memory().unwrap())).unwrap()
    }

    #[test]
    fn totals_sum_per_feature_since_cutoff() {
        let store = store();
        let now = Utc::now();
        let mut old = UsageRecord::new("t1", "search", 5);
        old.recorded_at = now - Duration::days(2);
        store.append(&old).unwrap();
        store.append(&UsageRecord::new("t1", "search", 1)).unwrap();
        store.append(&UsageRecord::new("t1", "search", 2)).unwrap();
        store
            .append(&UsageRecord::new("t1", "graph_update", 3).with_metadata(serde_json::json!({"world_id": "w1"})))
            .unwrap();
        store.append(&UsageRecord::new("t2", "search", 7)).unwrap();

        let totals = store.totals("t1", now - Duration::hours(1)).unwrap();
        assert_eq!(totals.get("search"), Some(&3));
        assert_eq!(totals.get("graph_update"), Some(&3));
        assert_eq!(totals.len(), 2);

        let records = store.records("t1").unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].metadata, Some(serde_json::json!({"world_id": "w1"})));
    }

    #[tokio::test]
    async fn meter_writes_queued_records_on_flush() {
        let store = store();
        let meter = UsageMeter::spawn(store.clone(), 16).unwrap();
        for _ in 0..5 {
            assert!(meter.record(UsageRecord::new("t1", "search", 1)));
        }
        meter.flush().await;
        assert_eq!(store.records("t1").unwrap().len(), 5);

        meter.shutdown().await;
        assert!(!meter.record(UsageRecord::new("t1", "search", 1)));
        assert_eq!(store.records("t1").unwrap().len(), 5);
    }

    #[tokio::test]
    async fn shutdown_drains_records_queued_behind_a_flush() {
        let store = store();
        let meter = UsageMeter::spawn(store.clone(), 64).unwrap();

        // Stall the worker so everything below is still queued at shutdown.
        let lock = store.conn.lock();
        for _ in 0..3 {
            assert!(meter.record(UsageRecord::new("t1", "search", 1)));
        }
        let stopper = tokio::spawn({
            let meter = meter.clone();
            async move { meter.shutdown().await }
        });
        tokio::task::yield_now().await;
        let flusher = tokio::spawn({
            let meter = meter.clone();
            async move { meter.flush().await }
        });
        tokio::task::yield_now().await;
        for _ in 0..4 {
            assert!(meter.record(UsageRecord::new("t1", "graph_update", 1)));
        }
        drop(lock);

        stopper.await.unwrap();
        flusher.await.unwrap();
        let totals = store.totals("t1", Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(totals.get("search"), Some(&3));
        assert_eq!(totals.get("graph_update"), Some(&4));
        assert!(!meter.record(UsageRecord::new("t1", "search", 1)));
    }
}
