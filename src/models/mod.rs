// src/models/mod.rs

//! Domain models for the wallet watcher.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
pub mod identity;
mod record;
mod snapshot;

// Re-export all public types
pub use config::{Config, HistoryMode, Secrets, Settings};
pub use identity::{TrackedIdentity, WalletEntry};
pub use record::{ActivityRecord, ApprovalInfo, TokenMovement, TxStatus};
pub use snapshot::{
    ProjectInfo, ProjectMetadata, Snapshot, TokenInfo, TokenMetadata, merge_metadata,
};
