use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

/// Maximum entries retained before the oldest is dropped. Not specified by
/// upstream; chosen so a neglected journal can't grow unbounded across a
/// long-running process that never gets its startup pass run.
const MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrphanSlRecord {
    pub sl_order_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only JSON-array file recording SL orders whose cancel failed
/// during cleanup. `StopManager` appends; a startup routine drains it.
pub struct OrphanSlJournal {
    path: PathBuf,
}

impl OrphanSlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Vec<OrphanSlRecord> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("orphan SL journal at {:?} unparseable: {}", self.path, e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    async fn write_all(&self, records: &[OrphanSlRecord]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string_pretty(records)?;
        fs::write(&self.path, body).await?;
        Ok(())
    }

    /// Record a failed SL cancel. Deduplicates by `sl_order_id`; drops the
    /// oldest entry once the journal exceeds `MAX_ENTRIES`.
    pub async fn record(&self, sl_order_id: &str, reason: &str) {
        let mut records = self.read_all().await;

        if records.iter().any(|r| r.sl_order_id == sl_order_id) {
            return;
        }

        records.push(OrphanSlRecord {
            sl_order_id: sl_order_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        if records.len() > MAX_ENTRIES {
            let drop_count = records.len() - MAX_ENTRIES;
            records.drain(0..drop_count);
        }

        if let Err(e) = self.write_all(&records).await {
            error!("failed to persist orphan SL journal: {}", e);
            return;
        }
        info!("recorded orphan SL candidate {} ({})", sl_order_id, reason);
    }

    /// Read all pending records without draining them.
    pub async fn pending(&self) -> Vec<OrphanSlRecord> {
        self.read_all().await
    }

    /// Remove a record once its cancel has been retried successfully.
    pub async fn remove(&self, sl_order_id: &str) {
        let mut records = self.read_all().await;
        let before = records.len();
        records.retain(|r| r.sl_order_id != sl_order_id);
        if records.len() != before && self.write_all(&records).await.is_err() {
            error!("failed to rewrite orphan SL journal after removing {}", sl_order_id);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("margin-core-test-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn records_and_dedups() {
        let path = temp_path("dedup");
        let journal = OrphanSlJournal::new(&path);

        journal.record("sl-1", "take_profit").await;
        journal.record("sl-1", "take_profit").await;

        let pending = journal.pending().await;
        assert_eq!(pending.len(), 1);

        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn remove_drains_matching_entry() {
        let path = temp_path("remove");
        let journal = OrphanSlJournal::new(&path);

        journal.record("sl-1", "manual").await;
        journal.record("sl-2", "manual").await;
        journal.remove("sl-1").await;

        let pending = journal.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sl_order_id, "sl-2");

        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn caps_at_max_entries_dropping_oldest() {
        let path = temp_path("cap");
        let journal = OrphanSlJournal::new(&path);

        for i in 0..(MAX_ENTRIES + 10) {
            journal.record(&format!("sl-{}", i), "manual").await;
        }

        let pending = journal.pending().await;
        assert_eq!(pending.len(), MAX_ENTRIES);
        assert_eq!(pending[0].sl_order_id, "sl-10");

        let _ = fs::remove_file(&path).await;
    }
}
