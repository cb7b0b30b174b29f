//! Snapshot persistence.
//!
//! One snapshot per wallet. Committing a new snapshot merges metadata tables
//! (newer entries win) and applies the configured record-history policy:
//!
//! - `Replace`: keep only the latest fetched window
//! - `Bounded`: prepend newly confirmed records, keep at most `cap`, oldest evicted first
//!
//! Backends only load and save whole snapshots; the merge lives here so
//! every backend commits the same way.

pub mod local;
pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{HistoryMode, Settings, Snapshot};

// Re-export for convenience
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Record-history policy applied on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPolicy {
    Replace,
    Bounded { cap: usize },
}

impl HistoryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.history {
            HistoryMode::Replace => Self::Replace,
            HistoryMode::Bounded => Self::Bounded {
                cap: settings.history_cap.max(1),
            },
        }
    }
}

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the stored snapshot for a wallet, if any.
    async fn load(&self, address: &str) -> Result<Option<Snapshot>>;

    /// Overwrite the stored snapshot for a wallet.
    async fn save(&self, address: &str, snapshot: &Snapshot) -> Result<()>;

    fn policy(&self) -> HistoryPolicy;

    /// Stored snapshot, or an empty one for an unseen wallet.
    async fn get(&self, address: &str) -> Result<Snapshot> {
        Ok(self.load(address).await?.unwrap_or_default())
    }

    /// Commit a freshly fetched snapshot and return what is now stored.
    async fn put(&self, address: &str, incoming: Snapshot) -> Result<Snapshot> {
        let previous = self.load(address).await?;
        let merged = merge_snapshot(previous, incoming, self.policy());
        self.save(address, &merged).await?;
        Ok(merged)
    }
}

/// Combine the stored snapshot with a newer one.
pub fn merge_snapshot(
    previous: Option<Snapshot>,
    incoming: Snapshot,
    policy: HistoryPolicy,
) -> Snapshot {
    let Some(mut stored) = previous else {
        let mut fresh = incoming;
        if let HistoryPolicy::Bounded { cap } = policy {
            fresh.records.truncate(cap);
        }
        return fresh;
    };

    stored.merge_metadata_from(&incoming);

    match policy {
        HistoryPolicy::Replace => {
            stored.records = incoming.records;
        }
        HistoryPolicy::Bounded { cap } => {
            let known: HashSet<&str> = stored.records.iter().map(|r| r.id.as_str()).collect();
            let mut records: Vec<_> = incoming
                .records
                .iter()
                .filter(|r| r.check().is_ok() && !known.contains(r.id.as_str()))
                .cloned()
                .collect();
            records.append(&mut stored.records);
            records.truncate(cap);
            stored.records = records;
        }
    }

    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityRecord, TokenInfo};

    fn records(ids: &[&str]) -> Vec<ActivityRecord> {
        ids.iter().map(|id| ActivityRecord::new(*id, "eth")).collect()
    }

    fn ids(snapshot: &Snapshot) -> Vec<String> {
        snapshot.records.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn test_first_commit_is_taken_as_is() {
        let merged = merge_snapshot(
            None,
            Snapshot::new(records(&["b", "a"])),
            HistoryPolicy::Bounded { cap: 40 },
        );
        assert_eq!(ids(&merged), vec!["b", "a"]);
    }

    #[test]
    fn test_replace_mode_keeps_latest_window() {
        let merged = merge_snapshot(
            Some(Snapshot::new(records(&["b", "a"]))),
            Snapshot::new(records(&["c", "b"])),
            HistoryPolicy::Replace,
        );
        assert_eq!(ids(&merged), vec!["c", "b"]);
    }

    #[test]
    fn test_bounded_mode_prepends_new_records() {
        let merged = merge_snapshot(
            Some(Snapshot::new(records(&["b", "a"]))),
            Snapshot::new(records(&["d", "c", "b"])),
            HistoryPolicy::Bounded { cap: 40 },
        );
        assert_eq!(ids(&merged), vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_bounded_mode_never_exceeds_cap() {
        let policy = HistoryPolicy::Bounded { cap: 40 };
        let mut stored: Option<Snapshot> = None;
        let mut next_id = 0;

        for _cycle in 0..20 {
            // Newest first, five new records per cycle.
            let batch: Vec<ActivityRecord> = (0..5)
                .rev()
                .map(|offset| ActivityRecord::new(format!("tx{:03}", next_id + offset), "eth"))
                .collect();
            next_id += 5;

            let merged = merge_snapshot(stored.take(), Snapshot::new(batch), policy);
            assert!(merged.records.len() <= 40);
            stored = Some(merged);
        }

        let kept = ids(stored.as_ref().unwrap());
        assert_eq!(kept.len(), 40);
        let expected: Vec<String> = (60..100).rev().map(|n| format!("tx{n:03}")).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_metadata_merges_across_commits() {
        let mut first = Snapshot::new(records(&["a"]));
        first.tokens.insert(
            "t1".into(),
            TokenInfo {
                symbol: "OLD".into(),
                ..TokenInfo::default()
            },
        );
        first.tokens.insert("t2".into(), TokenInfo::default());

        let mut second = Snapshot::new(records(&["a"]));
        second.tokens.insert(
            "t1".into(),
            TokenInfo {
                symbol: "NEW".into(),
                ..TokenInfo::default()
            },
        );

        let merged = merge_snapshot(Some(first), second, HistoryPolicy::Replace);
        assert_eq!(merged.tokens.len(), 2);
        assert_eq!(merged.tokens["t1"].symbol, "NEW");
    }

    #[test]
    fn test_policy_from_settings() {
        let mut settings = Settings::default();
        assert_eq!(
            HistoryPolicy::from_settings(&settings),
            HistoryPolicy::Bounded { cap: 40 }
        );
        settings.history = HistoryMode::Replace;
        assert_eq!(HistoryPolicy::from_settings(&settings), HistoryPolicy::Replace);
    }
}
