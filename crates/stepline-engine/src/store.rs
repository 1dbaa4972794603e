//! Execution store for terminal executions.
//!
//! This module defines the [`ExecutionStore`] trait so the engine can record
//! finished executions without caring where they live. The crate ships
//! [`InMemoryExecutionStore`]; retention is left to the implementation.
//!
//! # Example
//!
//! ```ignore
//! use stepline_engine::{ExecutionStore, InMemoryExecutionStore};
//!
//! let store = InMemoryExecutionStore::new();
//! store.save(&snapshot)?;
//! let latest = store.latest("fraud-training")?;
//! ```

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::execution::{ExecutionSnapshot, ExecutionStatus};

/// Storage for terminal execution snapshots.
///
/// All implementations must be `Send + Sync`; the engine saves from the task
/// that ran the execution.
pub trait ExecutionStore: Send + Sync {
    /// Persist a terminal execution. Stored records are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the snapshot is not terminal or its id is
    /// already recorded.
    fn save(&self, snapshot: &ExecutionSnapshot) -> Result<()>;

    /// Get an execution by id. Returns `Ok(None)` if it was never saved.
    fn get(&self, id: &str) -> Result<Option<ExecutionSnapshot>>;

    /// Most recent terminal execution of `pipeline`, of any status.
    fn latest(&self, pipeline: &str) -> Result<Option<ExecutionSnapshot>>;

    /// Most recent execution of `pipeline` that ended with `status`.
    fn latest_with_status(
        &self,
        pipeline: &str,
        status: ExecutionStatus,
    ) -> Result<Option<ExecutionSnapshot>>;

    /// Every stored execution of `pipeline`, most recent first.
    fn list(&self, pipeline: &str) -> Result<Vec<ExecutionSnapshot>>;
}

#[derive(Debug)]
struct Record {
    seq: u64,
    snapshot: ExecutionSnapshot,
}

/// Process-local [`ExecutionStore`].
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<Vec<Record>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Matching records, newest first. Ties on start time go to the later save.
    fn newest_first<F>(&self, filter: F) -> Vec<ExecutionSnapshot>
    where
        F: Fn(&ExecutionSnapshot) -> bool,
    {
        let records = self.records.read();
        let mut matching: Vec<&Record> = records.iter().filter(|r| filter(&r.snapshot)).collect();
        matching.sort_by(|a, b| {
            b.snapshot
                .started_at
                .cmp(&a.snapshot.started_at)
                .then(b.seq.cmp(&a.seq))
        });
        matching.into_iter().map(|r| r.snapshot.clone()).collect()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn save(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        if !snapshot.is_terminal() {
            return Err(EngineError::InvalidInput(format!(
                "execution {} is {}; only terminal executions are stored",
                snapshot.id, snapshot.status
            )));
        }

        let mut records = self.records.write();
        if records.iter().any(|r| r.snapshot.id == snapshot.id) {
            return Err(EngineError::InvalidInput(format!(
                "execution {} is already recorded",
                snapshot.id
            )));
        }
        let seq = records.iter().map(|r| r.seq + 1).max().unwrap_or(0);
        records.push(Record {
            seq,
            snapshot: snapshot.clone(),
        });
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ExecutionSnapshot>> {
        Ok(self
            .records
            .read()
            .iter()
            .find(|r| r.snapshot.id == id)
            .map(|r| r.snapshot.clone()))
    }

    fn latest(&self, pipeline: &str) -> Result<Option<ExecutionSnapshot>> {
        Ok(self
            .newest_first(|s| s.pipeline == pipeline)
            .into_iter()
            .next())
    }

    fn latest_with_status(
        &self,
        pipeline: &str,
        status: ExecutionStatus,
    ) -> Result<Option<ExecutionSnapshot>> {
        Ok(self
            .newest_first(|s| s.pipeline == pipeline && s.status == status)
            .into_iter()
            .next())
    }

    fn list(&self, pipeline: &str) -> Result<Vec<ExecutionSnapshot>> {
        Ok(self.newest_first(|s| s.pipeline == pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDocument;
    use crate::error::TerminalError;
    use crate::execution::Execution;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn snapshot(id: &str, pipeline: &str, status: ExecutionStatus, age_secs: i64) -> ExecutionSnapshot {
        let mut exec = Execution::with_id(id, pipeline, ContextDocument::new());
        match status {
            ExecutionStatus::Succeeded => exec.succeed(),
            ExecutionStatus::Failed => exec.fail(TerminalError::new("ConnectorFailure", "boom")),
            _ => {}
        }
        let mut snap = exec.snapshot();
        snap.started_at = Utc::now() - Duration::seconds(age_secs);
        snap
    }

    #[test]
    fn test_save_and_get() {
        let store = InMemoryExecutionStore::new();
        let mut snap = snapshot("e1", "p", ExecutionStatus::Succeeded, 0);
        snap.context = json!({"model": {"name": "m-1"}});
        store.save(&snap).unwrap();

        let fetched = store.get("e1").unwrap().unwrap();
        assert_eq!(fetched, snap);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_running_snapshot_rejected() {
        let store = InMemoryExecutionStore::new();
        let err = store
            .save(&snapshot("e1", "p", ExecutionStatus::Running, 0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_latest_is_most_recent_terminal() {
        let store = InMemoryExecutionStore::new();
        store.save(&snapshot("old", "p", ExecutionStatus::Succeeded, 300)).unwrap();
        store.save(&snapshot("new", "p", ExecutionStatus::Failed, 10)).unwrap();
        store.save(&snapshot("other", "q", ExecutionStatus::Succeeded, 0)).unwrap();

        assert_eq!(store.latest("p").unwrap().unwrap().id, "new");
        assert_eq!(
            store
                .latest_with_status("p", ExecutionStatus::Succeeded)
                .unwrap()
                .unwrap()
                .id,
            "old"
        );
        assert!(store.latest("none").unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let store = InMemoryExecutionStore::new();
        store.save(&snapshot("b", "p", ExecutionStatus::Succeeded, 60)).unwrap();
        store.save(&snapshot("c", "p", ExecutionStatus::Succeeded, 0)).unwrap();
        store.save(&snapshot("a", "p", ExecutionStatus::Succeeded, 120)).unwrap();

        let ids: Vec<String> = store.list("p").unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_resave_rejected() {
        let store = InMemoryExecutionStore::new();
        store.save(&snapshot("e1", "p", ExecutionStatus::Failed, 0)).unwrap();
        let err = store
            .save(&snapshot("e1", "p", ExecutionStatus::Succeeded, 0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(msg) if msg.contains("already recorded")));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("e1").unwrap().unwrap().status,
            ExecutionStatus::Failed
        );
    }
}
