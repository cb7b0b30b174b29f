// src/pipeline/poll.rs

//! Fixed-interval polling across all tracked identities.
//!
//! Each cycle fans out over identities with a bounded worker pool. Within one
//! identity the work is strictly sequential:
//!
//! ```text
//! Fetching -> Diffing -> Classifying -> Dispatching -> Updating
//! ```
//!
//! The store is only updated after every dispatch for the identity has been
//! attempted, so a crash in between re-sends rather than drops.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::error::FetchError;
use crate::models::{ProjectMetadata, Snapshot, TokenMetadata, TrackedIdentity, merge_metadata};
use crate::pipeline::classify::{Classifier, Label};
use crate::pipeline::diff::calculate_diff;
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::fetch::Fetcher;
use crate::pipeline::render::MessageContext;
use crate::storage::SnapshotStore;

/// Step of the per-identity sequence, used in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetching,
    Diffing,
    Classifying,
    Dispatching,
    Updating,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened to one identity during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// First snapshot stored as the baseline; nothing dispatched.
    Primed { records: usize },
    /// Nothing new; store left untouched.
    Unchanged,
    /// New records were classified and dispatched.
    Updated(UpdateSummary),
    /// Fetch failed; previous snapshot carried forward.
    Skipped(FetchError),
    /// Store could not be read or written.
    StoreFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub new_records: usize,
    pub normal: usize,
    pub spam: usize,
    pub failed: usize,
    pub delivered: usize,
    pub undelivered: usize,
    pub committed: bool,
}

/// Totals for one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub cycle: u64,
    pub elapsed: Duration,
    pub identities: usize,
    pub primed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub store_failures: usize,
    pub new_records: usize,
    pub spam: usize,
    pub failed: usize,
    pub delivered: usize,
    pub undelivered: usize,
}

impl CycleStats {
    fn record(&mut self, outcome: &IdentityOutcome) {
        match outcome {
            IdentityOutcome::Primed { .. } => self.primed += 1,
            IdentityOutcome::Unchanged => {}
            IdentityOutcome::Updated(summary) => {
                self.updated += 1;
                self.new_records += summary.new_records;
                self.spam += summary.spam;
                self.failed += summary.failed;
                self.delivered += summary.delivered;
                self.undelivered += summary.undelivered;
            }
            IdentityOutcome::Skipped(_) => self.skipped += 1,
            IdentityOutcome::StoreFailed(_) => self.store_failures += 1,
        }
    }
}

/// Drives the polling cycle.
pub struct Poller {
    identities: Vec<TrackedIdentity>,
    fetcher: Fetcher,
    store: Arc<dyn SnapshotStore>,
    classifier: Classifier,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    concurrency: usize,
}

impl Poller {
    pub fn new(
        identities: Vec<TrackedIdentity>,
        fetcher: Fetcher,
        store: Arc<dyn SnapshotStore>,
        classifier: Classifier,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            identities,
            fetcher,
            store,
            classifier,
            dispatcher,
            interval: Duration::from_secs(30),
            concurrency: 1,
        }
    }

    /// Pause between the end of one cycle and the start of the next.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Maximum identities processed at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn identities(&self) -> &[TrackedIdentity] {
        &self.identities
    }

    /// Poll forever. Only returns if the future is dropped.
    pub async fn run(&self) {
        let mut cycle = 1;
        loop {
            self.run_cycle(cycle).await;
            tokio::time::sleep(self.interval).await;
            cycle += 1;
        }
    }

    /// Run a single cycle over every identity.
    pub async fn run_cycle(&self, cycle: u64) -> CycleStats {
        let started = Instant::now();
        let mut stats = CycleStats {
            cycle,
            identities: self.identities.len(),
            ..CycleStats::default()
        };

        let mut outcomes = stream::iter(self.identities.iter())
            .map(|identity| async move { (identity, self.process_identity(identity).await) })
            .buffer_unordered(self.concurrency);

        while let Some((identity, outcome)) = outcomes.next().await {
            log::debug!("{}: {:?}", identity.short_address(), outcome);
            stats.record(&outcome);
        }

        stats.elapsed = started.elapsed();
        log::info!("Loop {} executed in {:.2} secs", cycle, stats.elapsed.as_secs_f64());
        log::info!(
            "Cycle {} summary: {} wallet(s), {} new record(s), {} spam, {} failed, {} delivered, {} undelivered, {} skipped",
            cycle,
            stats.identities,
            stats.new_records,
            stats.spam,
            stats.failed,
            stats.delivered,
            stats.undelivered,
            stats.skipped + stats.store_failures
        );
        stats
    }

    /// Fetch, diff, classify, dispatch and commit for one identity.
    pub async fn process_identity(&self, identity: &TrackedIdentity) -> IdentityOutcome {
        let address = identity.address.as_str();
        log::trace!("{} {}", identity.short_address(), Phase::Fetching);

        let fetched = match self.fetcher.fetch(identity).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Skipping {} this cycle: {}", identity, e);
                return IdentityOutcome::Skipped(e);
            }
        };
        if fetched.is_empty() {
            log::debug!("Empty history for {}, nothing to do", identity.short_address());
            return IdentityOutcome::Unchanged;
        }

        let stored = match self.store.load(address).await {
            Ok(stored) => stored,
            Err(e) => {
                log::error!("Failed to load snapshot for {}: {}", identity, e);
                return IdentityOutcome::StoreFailed(e.to_string());
            }
        };
        let Some(previous) = stored else {
            let records = fetched.records.len();
            return match self.store.put(address, fetched).await {
                Ok(_) => {
                    log::info!("Primed {} with {} record(s)", identity, records);
                    IdentityOutcome::Primed { records }
                }
                Err(e) => {
                    log::error!("Failed to store baseline for {}: {}", identity, e);
                    IdentityOutcome::StoreFailed(e.to_string())
                }
            };
        };

        log::trace!("{} {}", identity.short_address(), Phase::Diffing);
        let diff = calculate_diff(&previous.records, &fetched.records);
        if !diff.has_changes() {
            return IdentityOutcome::Unchanged;
        }

        let (tokens, projects) = merged_metadata(&previous, &fetched);
        let ctx = MessageContext {
            tokens: &tokens,
            projects: &projects,
        };
        let mut summary = UpdateSummary {
            new_records: diff.added.len(),
            ..UpdateSummary::default()
        };

        // Oldest first so destinations read chronologically.
        for record in diff.added.iter().rev() {
            log::trace!("{} {} {}", identity.short_address(), Phase::Classifying, record.short_id());
            let label = self.classifier.classify(record, &tokens);
            match label {
                Label::Normal => {
                    summary.normal += 1;
                    log::info!(target: "walletwatch::txns", "{} {} on {}", identity, record.id, record.chain);
                }
                Label::Spam => {
                    summary.spam += 1;
                    log::info!(target: "walletwatch::spam", "{} {} on {}", identity, record.id, record.chain);
                }
                Label::Failed => {
                    summary.failed += 1;
                    log::info!(target: "walletwatch::failed", "{} {} on {}", identity, record.id, record.chain);
                }
            }

            log::trace!("{} {} {}", identity.short_address(), Phase::Dispatching, record.short_id());
            let report = self.dispatcher.dispatch(record, identity, label, ctx).await;
            summary.delivered += report.delivered();
            summary.undelivered += report.failed();
        }

        log::trace!("{} {}", identity.short_address(), Phase::Updating);
        match self.store.put(address, fetched).await {
            Ok(_) => summary.committed = true,
            Err(e) => log::error!("Failed to commit snapshot for {}: {}", identity, e),
        }

        IdentityOutcome::Updated(summary)
    }
}

/// Stored metadata overlaid with the freshly fetched tables.
fn merged_metadata(previous: &Snapshot, fetched: &Snapshot) -> (TokenMetadata, ProjectMetadata) {
    let mut tokens = previous.tokens.clone();
    merge_metadata(&mut tokens, &fetched.tokens);
    let mut projects = previous.projects.clone();
    merge_metadata(&mut projects, &fetched.projects);
    (tokens, projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityRecord, TokenInfo, TokenMovement, TxStatus};
    use crate::pipeline::dispatch::RetryPolicy;
    use crate::pipeline::dispatch::tests::ScriptedMessenger;
    use crate::pipeline::fetch::tests::{CountingRotator, ScriptedSource};
    use crate::error::{AppError, Result};
    use crate::services::RotationController;
    use crate::storage::{HistoryPolicy, MemoryStore};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, Ordering};

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    /// Memory store whose writes can be switched off.
    struct FlakyStore {
        inner: MemoryStore,
        refuse_saves: AtomicBool,
    }

    #[async_trait]
    impl SnapshotStore for FlakyStore {
        async fn load(&self, address: &str) -> Result<Option<Snapshot>> {
            self.inner.load(address).await
        }

        async fn save(&self, address: &str, snapshot: &Snapshot) -> Result<()> {
            if self.refuse_saves.load(Ordering::SeqCst) {
                return Err(AppError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(address, snapshot).await
        }

        fn policy(&self) -> HistoryPolicy {
            self.inner.policy()
        }
    }

    struct Harness {
        poller: Poller,
        source: Arc<ScriptedSource>,
        rotator: Arc<CountingRotator>,
        store: Arc<FlakyStore>,
        messenger: Arc<ScriptedMessenger>,
    }

    fn harness(results: Vec<std::result::Result<Snapshot, FetchError>>) -> Harness {
        let source = Arc::new(ScriptedSource::new(results));
        let rotator = Arc::new(CountingRotator::new(Duration::from_secs(10)));
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(HistoryPolicy::Bounded { cap: 40 }),
            refuse_saves: AtomicBool::new(false),
        });
        let messenger = Arc::new(ScriptedMessenger::default());

        let fetcher = Fetcher::new(
            source.clone(),
            Arc::new(RotationController::new(rotator.clone())),
            20,
            Duration::from_secs(15),
        );
        let dispatcher = Dispatcher::new(
            messenger.clone(),
            RetryPolicy {
                retry_delay: Duration::from_secs(3),
                max_attempts: 10,
            },
        )
        .with_all_destination("all")
        .with_default_primary("alerts");

        let poller = Poller::new(
            vec![TrackedIdentity::new("0xabc", "Main", None)],
            fetcher,
            store.clone(),
            Classifier::default(),
            Arc::new(dispatcher),
        );

        Harness {
            poller,
            source,
            rotator,
            store,
            messenger,
        }
    }

    fn verified_receive(id: &str, status: TxStatus) -> ActivityRecord {
        let mut record = ActivityRecord::new(id, "eth");
        record.category = "receive".into();
        record.status = status;
        record.receives.push(TokenMovement::new(USDC, Decimal::from(100)));
        record
    }

    fn snapshot(records: Vec<ActivityRecord>) -> Snapshot {
        let mut snapshot = Snapshot::new(records);
        snapshot.tokens.insert(
            USDC.into(),
            TokenInfo {
                symbol: "USDC".into(),
                is_verified: Some(true),
                price: Some(Decimal::ONE),
            },
        );
        snapshot
    }

    fn stored_ids(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.records.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_failed_record_goes_to_all_only() {
        let h = harness(vec![Ok(snapshot(vec![
            verified_receive("b", TxStatus::Failed),
            verified_receive("a", TxStatus::Success),
        ]))]);
        h.store
            .put("0xabc", snapshot(vec![verified_receive("a", TxStatus::Success)]))
            .await
            .unwrap();

        let identity = &h.poller.identities()[0];
        let outcome = h.poller.process_identity(identity).await;

        let IdentityOutcome::Updated(summary) = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert_eq!(summary.new_records, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.committed);
        assert_eq!(h.messenger.chats(), vec!["all"]);

        let stored = h.store.get("0xabc").await.unwrap();
        assert_eq!(stored_ids(&stored), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_spam_record_goes_to_all_only() {
        let mut spam = ActivityRecord::new("b", "eth");
        spam.category = "execute".into();
        spam.status = TxStatus::Success;

        let h = harness(vec![Ok(snapshot(vec![
            spam,
            verified_receive("a", TxStatus::Success),
        ]))]);
        h.store
            .put("0xabc", snapshot(vec![verified_receive("a", TxStatus::Success)]))
            .await
            .unwrap();

        let outcome = h.poller.process_identity(&h.poller.identities()[0]).await;
        assert!(matches!(outcome, IdentityOutcome::Updated(UpdateSummary { spam: 1, .. })));
        assert_eq!(h.messenger.chats(), vec!["all"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_fetch_completes_cycle() {
        let h = harness(vec![
            Err(FetchError::Throttled),
            Err(FetchError::Throttled),
            Ok(snapshot(vec![
                verified_receive("b", TxStatus::Success),
                verified_receive("a", TxStatus::Success),
            ])),
        ]);
        h.store
            .put("0xabc", snapshot(vec![verified_receive("a", TxStatus::Success)]))
            .await
            .unwrap();

        let stats = h.poller.run_cycle(1).await;

        assert_eq!(h.rotator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.new_records, 1);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.delivered, 2);
        assert_eq!(h.messenger.chats(), vec!["all", "alerts"]);
    }

    #[tokio::test]
    async fn test_first_fetch_primes_without_dispatch() {
        let h = harness(vec![Ok(snapshot(vec![verified_receive("a", TxStatus::Success)]))]);

        let outcome = h.poller.process_identity(&h.poller.identities()[0]).await;

        assert_eq!(outcome, IdentityOutcome::Primed { records: 1 });
        assert!(h.messenger.chats().is_empty());
        assert_eq!(stored_ids(&h.store.get("0xabc").await.unwrap()), vec!["a"]);
    }

    #[tokio::test]
    async fn test_unreachable_carries_snapshot_forward() {
        let h = harness(vec![Err(FetchError::unreachable("timeout"))]);
        let baseline = snapshot(vec![verified_receive("a", TxStatus::Success)]);
        h.store.put("0xabc", baseline.clone()).await.unwrap();

        let stats = h.poller.run_cycle(1).await;

        assert_eq!(stats.skipped, 1);
        assert!(h.messenger.chats().is_empty());
        assert_eq!(h.store.get("0xabc").await.unwrap(), baseline);
    }

    #[tokio::test]
    async fn test_empty_fetch_is_not_a_deletion() {
        let h = harness(vec![Ok(Snapshot::default())]);
        let baseline = snapshot(vec![verified_receive("a", TxStatus::Success)]);
        h.store.put("0xabc", baseline.clone()).await.unwrap();

        let outcome = h.poller.process_identity(&h.poller.identities()[0]).await;

        assert_eq!(outcome, IdentityOutcome::Unchanged);
        assert_eq!(h.store.get("0xabc").await.unwrap(), baseline);
    }

    #[tokio::test]
    async fn test_metadata_from_previous_cycle_is_used() {
        let mut fetched = Snapshot::new(vec![
            verified_receive("b", TxStatus::Success),
            verified_receive("a", TxStatus::Success),
        ]);
        fetched.tokens.clear();

        let h = harness(vec![Ok(fetched)]);
        h.store
            .put("0xabc", snapshot(vec![verified_receive("a", TxStatus::Success)]))
            .await
            .unwrap();

        h.poller.process_identity(&h.poller.identities()[0]).await;

        let sent = h.messenger.sent.lock().unwrap();
        assert!(sent[0].1.contains(">USDC</a>"));
    }

    #[tokio::test]
    async fn test_failed_commit_redelivers_next_cycle() {
        let fetched = || -> std::result::Result<Snapshot, FetchError> {
            Ok(snapshot(vec![
                verified_receive("b", TxStatus::Success),
                verified_receive("a", TxStatus::Success),
            ]))
        };
        let h = harness(vec![fetched(), fetched()]);
        let baseline = snapshot(vec![verified_receive("a", TxStatus::Success)]);
        h.store.put("0xabc", baseline.clone()).await.unwrap();
        h.store.refuse_saves.store(true, Ordering::SeqCst);

        let identity = &h.poller.identities()[0];
        let IdentityOutcome::Updated(first) = h.poller.process_identity(identity).await else {
            panic!("expected update");
        };
        assert_eq!(first.delivered, 2);
        assert!(!first.committed);
        assert_eq!(h.store.get("0xabc").await.unwrap(), baseline);

        h.store.refuse_saves.store(false, Ordering::SeqCst);
        let IdentityOutcome::Updated(second) = h.poller.process_identity(identity).await else {
            panic!("expected update");
        };
        assert_eq!(second.new_records, 1);
        assert!(second.committed);
        assert_eq!(h.messenger.chats(), vec!["all", "alerts", "all", "alerts"]);
        assert_eq!(stored_ids(&h.store.get("0xabc").await.unwrap()), vec!["b", "a"]);
    }
}
