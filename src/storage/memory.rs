//! In-process snapshot store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::Snapshot;
use crate::storage::{HistoryPolicy, SnapshotStore};

/// Snapshot store kept in memory for the lifetime of the process.
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
    policy: HistoryPolicy,
}

impl MemoryStore {
    pub fn new(policy: HistoryPolicy) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            policy,
        }
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, address: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(address).cloned())
    }

    async fn save(&self, address: &str, snapshot: &Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(address.to_string(), snapshot.clone());
        Ok(())
    }

    fn policy(&self) -> HistoryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityRecord;

    #[tokio::test]
    async fn test_get_unknown_is_empty() {
        let store = MemoryStore::new(HistoryPolicy::Replace);
        assert!(store.get("0xabc").await.unwrap().is_empty());
        assert!(store.load("0xabc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStore::new(HistoryPolicy::Bounded { cap: 2 });
        let snapshot = Snapshot::new(vec![
            ActivityRecord::new("c", "eth"),
            ActivityRecord::new("b", "eth"),
            ActivityRecord::new("a", "eth"),
        ]);

        let stored = store.put("0xabc", snapshot).await.unwrap();
        assert_eq!(stored.records.len(), 2);
        assert_eq!(store.get("0xabc").await.unwrap(), stored);
    }
}
