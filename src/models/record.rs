// src/models/record.rs

//! Activity records observed for a wallet.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::MalformedRecord;

/// Execution status of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    #[default]
    Unknown,
    Success,
    Failed,
}

impl TxStatus {
    /// Map the upstream numeric status (`0` = failed, anything else = success).
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(0) => Self::Failed,
            Some(_) => Self::Success,
            None => Self::Unknown,
        }
    }
}

/// One token leg of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMovement {
    pub token_id: String,
    pub amount: Decimal,
}

impl TokenMovement {
    pub fn new(token_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            amount,
        }
    }
}

/// Token targeted by an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalInfo {
    pub token_id: String,
}

/// A transaction-like event belonging to a tracked wallet.
///
/// Two records are the same record when their `id` matches; other fields
/// are allowed to drift between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Transaction hash, stable across cycles
    pub id: String,

    /// Short chain tag (eth, arb, bsc, ...)
    pub chain: String,

    /// When the transaction happened, if known
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,

    /// The address the wallet interacted with
    #[serde(default)]
    pub counterparty: String,

    /// Free-text type, e.g. `swap`, `approve`, `receive`
    #[serde(default)]
    pub category: String,

    /// Upstream project key, resolved through the project metadata
    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default)]
    pub sends: Vec<TokenMovement>,

    #[serde(default)]
    pub receives: Vec<TokenMovement>,

    #[serde(default)]
    pub status: TxStatus,

    #[serde(default)]
    pub approval: Option<ApprovalInfo>,
}

impl ActivityRecord {
    /// Minimal record with the given id, used as a builder starting point.
    pub fn new(id: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chain: chain.into(),
            occurred_at: None,
            counterparty: String::new(),
            category: String::new(),
            project_id: None,
            sends: Vec::new(),
            receives: Vec::new(),
            status: TxStatus::Unknown,
            approval: None,
        }
    }

    /// Check that the record can take part in diffing.
    pub fn check(&self) -> Result<(), MalformedRecord> {
        if self.id.trim().is_empty() {
            return Err(MalformedRecord::MissingId {
                chain: self.chain.clone(),
            });
        }
        Ok(())
    }

    pub fn has_transfers(&self) -> bool {
        !self.sends.is_empty() || !self.receives.is_empty()
    }

    /// All token legs, sends first.
    pub fn transfers(&self) -> impl Iterator<Item = &TokenMovement> {
        self.sends.iter().chain(self.receives.iter())
    }

    /// Shortened hash for display, e.g. `0xc43c...37ea`.
    pub fn short_id(&self) -> String {
        crate::models::identity::shorten(&self.id, 6, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_code() {
        assert_eq!(TxStatus::from_code(Some(0)), TxStatus::Failed);
        assert_eq!(TxStatus::from_code(Some(1)), TxStatus::Success);
        assert_eq!(TxStatus::from_code(None), TxStatus::Unknown);
    }

    #[test]
    fn test_check_rejects_blank_id() {
        let record = ActivityRecord::new("  ", "eth");
        assert!(record.check().is_err());
        assert!(ActivityRecord::new("0xabc", "eth").check().is_ok());
    }

    #[test]
    fn test_transfers_order() {
        let mut record = ActivityRecord::new("0x1", "eth");
        record.receives.push(TokenMovement::new("in", Decimal::ONE));
        record.sends.push(TokenMovement::new("out", Decimal::TWO));

        let ids: Vec<_> = record.transfers().map(|t| t.token_id.as_str()).collect();
        assert_eq!(ids, vec!["out", "in"]);
        assert!(record.has_transfers());
    }
}
