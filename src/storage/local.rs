//! Local filesystem snapshot store.
//!
//! Persists one JSON file per wallet so a restart resumes diffing from the
//! last committed snapshot instead of re-priming.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! └── snapshots/
//!     ├── 0xabc....json
//!     └── 0xdef....json
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Snapshot;
use crate::storage::{HistoryPolicy, SnapshotStore};

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
    policy: HistoryPolicy,
}

impl LocalStore {
    /// Create a LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>, policy: HistoryPolicy) -> Self {
        Self {
            root_dir: root_dir.into(),
            policy,
        }
    }

    /// File holding a wallet's snapshot. Addresses are case-insensitive.
    fn snapshot_path(&self, address: &str) -> PathBuf {
        let name: String = address
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.root_dir.join("snapshots").join(format!("{name}.json"))
    }
}

#[async_trait]
impl SnapshotStore for LocalStore {
    async fn load(&self, address: &str) -> Result<Option<Snapshot>> {
        let path = self.snapshot_path(address);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            // A torn or hand-edited file must not wedge the wallet forever.
            Err(e) => {
                log::warn!("Discarding unreadable snapshot {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Write to a sibling temp file, then rename over the old snapshot.
    async fn save(&self, address: &str, snapshot: &Snapshot) -> Result<()> {
        let path = self.snapshot_path(address);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn policy(&self) -> HistoryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityRecord, TokenInfo};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), HistoryPolicy::Replace);

        store.save("0xabc", &Snapshot::default()).await.unwrap();
        let path = store.snapshot_path("0xabc");
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), HistoryPolicy::Replace);

        assert!(store.load("0xabc").await.unwrap().is_none());
        assert!(store.get("0xabc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let policy = HistoryPolicy::Bounded { cap: 40 };

        let mut snapshot = Snapshot::new(vec![ActivityRecord::new("0x01", "eth")]);
        snapshot.tokens.insert(
            "eth".into(),
            TokenInfo {
                symbol: "ETH".into(),
                is_verified: Some(true),
                price: None,
            },
        );

        {
            let store = LocalStore::new(tmp.path(), policy);
            store.put("0xABC", snapshot.clone()).await.unwrap();
        }

        let reopened = LocalStore::new(tmp.path(), policy);
        assert_eq!(reopened.get("0xabc").await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), HistoryPolicy::Replace);

        let path = store.snapshot_path("0xabc");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(store.load("0xabc").await.unwrap().is_none());
    }

    #[test]
    fn test_snapshot_path_is_sanitized() {
        let store = LocalStore::new("/state", HistoryPolicy::Replace);
        assert_eq!(
            store.snapshot_path("0xAbC"),
            PathBuf::from("/state/snapshots/0xabc.json")
        );
        assert_eq!(
            store.snapshot_path("../x"),
            PathBuf::from("/state/snapshots/___x.json")
        );
    }
}
