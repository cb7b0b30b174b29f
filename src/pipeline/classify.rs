//! Spam / failure classification of new records.
//!
//! Rules are evaluated top to bottom and the first match wins. New rules go
//! at the end of `Rule::ORDER`; moving an existing rule changes labels for
//! records that match more than one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ActivityRecord, TokenMetadata, TokenMovement, TxStatus};

/// Length of a canonical `0x`-prefixed EVM address.
pub const ADDRESS_LEN: usize = 42;

/// Classification of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Normal,
    Spam,
    Failed,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Label::Normal => "normal",
            Label::Spam => "spam",
            Label::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// The rule that decided a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    FailedStatus,
    PureApproval,
    UnverifiedToken,
    DenyListed,
    NoTransfers,
    Fallthrough,
}

impl Rule {
    pub const ORDER: [Rule; 6] = [
        Rule::FailedStatus,
        Rule::PureApproval,
        Rule::UnverifiedToken,
        Rule::DenyListed,
        Rule::NoTransfers,
        Rule::Fallthrough,
    ];
}

/// Deterministic rule-based classifier.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    /// Lower-cased spam campaign markers
    markers: Vec<String>,
}

impl Classifier {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// Label a record.
    pub fn classify(&self, record: &ActivityRecord, tokens: &TokenMetadata) -> Label {
        self.evaluate(record, tokens).0
    }

    /// Label a record and report which rule decided it.
    pub fn evaluate(&self, record: &ActivityRecord, tokens: &TokenMetadata) -> (Label, Rule) {
        for rule in Rule::ORDER {
            if let Some(label) = self.apply(rule, record, tokens) {
                return (label, rule);
            }
        }
        (Label::Normal, Rule::Fallthrough)
    }

    fn apply(&self, rule: Rule, record: &ActivityRecord, tokens: &TokenMetadata) -> Option<Label> {
        let matched = match rule {
            Rule::FailedStatus => return (record.status == TxStatus::Failed).then_some(Label::Failed),
            Rule::PureApproval => is_pure_approval(record),
            Rule::UnverifiedToken => record.transfers().any(|t| fails_verification(t, tokens)),
            Rule::DenyListed => self.is_deny_listed(record, tokens),
            Rule::NoTransfers => !record.has_transfers(),
            Rule::Fallthrough => return Some(Label::Normal),
        };
        matched.then_some(Label::Spam)
    }

    fn is_deny_listed(&self, record: &ActivityRecord, tokens: &TokenMetadata) -> bool {
        if self.markers.is_empty() {
            return false;
        }
        let category = record.category.to_lowercase();
        if self.markers.iter().any(|m| category.contains(m.as_str())) {
            return true;
        }
        record.transfers().any(|t| {
            let id = t.token_id.to_lowercase();
            let symbol = tokens
                .get(&t.token_id)
                .map(|info| info.symbol.to_lowercase())
                .unwrap_or_default();
            self.markers
                .iter()
                .any(|m| id.contains(m.as_str()) || (!symbol.is_empty() && symbol.contains(m.as_str())))
        })
    }
}

/// An approval with nothing moving in either direction.
fn is_pure_approval(record: &ActivityRecord) -> bool {
    if record.has_transfers() {
        return false;
    }
    record.approval.is_some() || record.category.to_lowercase().contains("approv")
}

/// A token explicitly marked unverified, or an id shaped like a spam NFT.
///
/// Tokens absent from the metadata are not treated as unverified: metadata
/// is often missing for a cycle and shows up on the next one.
fn fails_verification(movement: &TokenMovement, tokens: &TokenMetadata) -> bool {
    if is_short_address_like(&movement.token_id) {
        return true;
    }
    matches!(
        tokens.get(&movement.token_id).and_then(|info| info.is_verified),
        Some(false)
    )
}

/// Hex identifier that is shorter than a canonical address.
///
/// Native-asset ids such as `eth` or `matic` are not hex and never match.
pub fn is_short_address_like(token_id: &str) -> bool {
    if token_id.len() >= ADDRESS_LEN {
        return false;
    }
    let (prefixed, body) = match token_id.strip_prefix("0x") {
        Some(rest) => (true, rest),
        None => (false, token_id),
    };
    let hex = !body.is_empty() && body.chars().all(|c| c.is_ascii_hexdigit());
    hex && (prefixed || body.len() >= 16)
}
