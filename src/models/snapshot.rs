// src/models/snapshot.rs

//! Per-wallet snapshots and the metadata tables that travel with them.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ActivityRecord;

/// Token details keyed by token id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub symbol: String,

    /// `None` when upstream did not say either way
    #[serde(default)]
    pub is_verified: Option<bool>,

    /// USD price per unit
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Project (protocol) details keyed by project id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: String,
}

pub type TokenMetadata = HashMap<String, TokenInfo>;
pub type ProjectMetadata = HashMap<String, ProjectInfo>;

/// Everything observed for one wallet at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Newest first
    #[serde(default)]
    pub records: Vec<ActivityRecord>,

    #[serde(default)]
    pub tokens: TokenMetadata,

    #[serde(default)]
    pub projects: ProjectMetadata,
}

impl Snapshot {
    pub fn new(records: Vec<ActivityRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge `newer`'s metadata tables into this snapshot's.
    pub fn merge_metadata_from(&mut self, newer: &Snapshot) {
        merge_metadata(&mut self.tokens, &newer.tokens);
        merge_metadata(&mut self.projects, &newer.projects);
    }
}

/// Union of two metadata tables; `newer` wins on key collision.
pub fn merge_metadata<V: Clone>(base: &mut HashMap<String, V>, newer: &HashMap<String, V>) {
    for (key, value) in newer {
        base.insert(key.clone(), value.clone());
    }
}
