//! Pipeline stages for the wallet watcher.
//!
//! - `fetch`: throttle-aware fetching through identity rotation
//! - `diff`: new-record detection against the stored snapshot
//! - `classify`: normal / spam / failed labelling
//! - `render` and `dispatch`: message formatting and delivery
//! - `poll`: the fixed-interval cycle tying the stages together
//! - `watch`: assembly from configuration and the process lifecycle
//! - `query`: one-shot listing of the latest records per wallet

pub mod classify;
pub mod diff;
pub mod dispatch;
pub mod exit;
pub mod fetch;
pub mod poll;
pub mod query;
pub mod render;
pub mod watch;

pub use classify::{Classifier, Label};
pub use diff::{DiffResult, calculate_diff, new_records};
pub use dispatch::{DeliveryOutcome, DispatchReport, DispatchTarget, Dispatcher, RetryPolicy};
pub use exit::ExitNotifier;
pub use fetch::Fetcher;
pub use poll::{CycleStats, IdentityOutcome, Poller};
pub use query::{WalletListing, query_latest, run_query};
pub use watch::{build_watcher, run_watcher};
