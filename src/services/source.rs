// src/services/source.rs

//! History source adapter.
//!
//! Fetches the latest activity window for a wallet and normalizes transport
//! and payload problems into a `FetchError`.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::FetchError;
use crate::models::{
    ActivityRecord, ApprovalInfo, ProjectInfo, Snapshot, TokenInfo, TokenMovement,
    TrackedIdentity, TxStatus,
};
use crate::utils::age::{from_epoch_secs, resolve_timestamp};

/// Anything that can produce the latest activity window for a wallet.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn fetch(
        &self,
        identity: &TrackedIdentity,
        max_records: usize,
    ) -> Result<Snapshot, FetchError>;
}

/// Source backed by the public history API.
pub struct HistoryApiSource {
    client: Client,
    api_base: String,
}

impl HistoryApiSource {
    /// The client is expected to carry the request timeout and proxy.
    pub fn new(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }

    fn history_url(&self, address: &str, max_records: usize) -> Result<Url, FetchError> {
        let base = format!("{}/history/list", self.api_base.trim_end_matches('/'));
        let count = max_records.to_string();
        Url::parse_with_params(
            &base,
            &[
                ("page_count", count.as_str()),
                ("start_time", "0"),
                ("token_id", ""),
                ("user_addr", address),
            ],
        )
        .map_err(|e| FetchError::unreachable(format!("bad history URL {base}: {e}")))
    }
}

#[async_trait]
impl ActivitySource for HistoryApiSource {
    async fn fetch(
        &self,
        identity: &TrackedIdentity,
        max_records: usize,
    ) -> Result<Snapshot, FetchError> {
        let url = self.history_url(&identity.address, max_records)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Throttled);
        }
        if !status.is_success() {
            return Err(FetchError::unreachable(format!("HTTP {status}")));
        }

        let body = response.text().await?;
        let mut snapshot = parse_history(&body, Utc::now())?;
        snapshot.records.truncate(max_records);
        Ok(snapshot)
    }
}

/// Parse a history payload captured at `captured_at`.
///
/// Only the envelope is strict. A record or token entry that does not fit the
/// wire format is logged and dropped so one bad entry cannot hide the rest of
/// the window.
pub fn parse_history(body: &str, captured_at: DateTime<Utc>) -> Result<Snapshot, FetchError> {
    let envelope: HistoryEnvelope = serde_json::from_str(body).map_err(FetchError::malformed)?;

    if envelope.error_code != 0 {
        return Err(FetchError::malformed(format!(
            "error_code {}: {}",
            envelope.error_code,
            envelope.error_msg.unwrap_or_default()
        )));
    }

    let data = envelope
        .data
        .ok_or_else(|| FetchError::malformed("missing data object"))?;
    let history = data
        .history_list
        .ok_or_else(|| FetchError::malformed("missing data.history_list"))?;

    let records = history
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<RawRecord>(value) {
            Ok(raw) => Some(raw.into_record(captured_at)),
            Err(e) => {
                log::warn!("Dropping unreadable history record #{}: {}", index, e);
                None
            }
        })
        .collect();

    let tokens = data
        .token_dict
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(id, value)| match serde_json::from_value::<RawToken>(value) {
            Ok(raw) => {
                let info = raw.into_info(&id);
                Some((id, info))
            }
            Err(e) => {
                log::warn!("Dropping unreadable token metadata {}: {}", id, e);
                None
            }
        })
        .collect();

    let projects = data
        .project_dict
        .unwrap_or_default()
        .into_iter()
        .map(|(id, value)| {
            let name = value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (id, ProjectInfo { name })
        })
        .collect();

    Ok(Snapshot {
        records,
        tokens,
        projects,
    })
}

// --- Wire format ---

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(default)]
    data: Option<HistoryData>,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    history_list: Option<Vec<Value>>,
    #[serde(default)]
    token_dict: Option<HashMap<String, Value>>,
    #[serde(default)]
    project_dict: Option<HashMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTime {
    Epoch(f64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawTx {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawMovement {
    #[serde(default)]
    token_id: Option<String>,
    #[serde(default)]
    amount: Option<Value>,
}

impl RawMovement {
    fn into_movement(self) -> TokenMovement {
        let token_id = self.token_id.unwrap_or_default();
        let amount = match self.amount.as_ref().map(lenient_decimal) {
            Some(Lenient::Exact(amount)) => amount,
            Some(Lenient::Saturated(amount)) => {
                log::warn!("Amount of {} out of range, saturated to {}", token_id, amount);
                amount
            }
            Some(Lenient::Invalid) => {
                log::warn!("Unreadable amount of {}, treated as zero", token_id);
                Decimal::ZERO
            }
            None => Decimal::ZERO,
        };
        TokenMovement::new(token_id, amount)
    }
}

#[derive(Debug, Deserialize)]
struct RawApproval {
    #[serde(default)]
    token_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    chain: Option<String>,
    #[serde(default)]
    time_at: Option<RawTime>,
    #[serde(default)]
    other_addr: Option<String>,
    #[serde(default)]
    cate_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    tx: Option<RawTx>,
    #[serde(default)]
    sends: Option<Vec<RawMovement>>,
    #[serde(default)]
    receives: Option<Vec<RawMovement>>,
    #[serde(default)]
    token_approve: Option<RawApproval>,
}

impl RawRecord {
    fn into_record(self, captured_at: DateTime<Utc>) -> ActivityRecord {
        let tx = self.tx.unwrap_or_default();
        let category = tx
            .name
            .filter(|n| !n.trim().is_empty())
            .or(self.cate_id)
            .unwrap_or_default();

        let occurred_at = match self.time_at {
            Some(RawTime::Epoch(secs)) => from_epoch_secs(secs),
            Some(RawTime::Text(text)) => match resolve_timestamp(&text, captured_at) {
                Ok(at) => Some(at),
                Err(e) => {
                    log::debug!("Unparseable time_at on {:?}: {}", self.id, e);
                    None
                }
            },
            None => None,
        };

        let movements = |list: Option<Vec<RawMovement>>| -> Vec<TokenMovement> {
            list.unwrap_or_default()
                .into_iter()
                .map(RawMovement::into_movement)
                .collect()
        };

        ActivityRecord {
            id: self.id.unwrap_or_default(),
            chain: self.chain.unwrap_or_default(),
            occurred_at,
            counterparty: self.other_addr.unwrap_or_default(),
            category,
            project_id: self.project_id.filter(|p| !p.is_empty()),
            sends: movements(self.sends),
            receives: movements(self.receives),
            status: TxStatus::from_code(tx.status),
            approval: self
                .token_approve
                .and_then(|a| a.token_id)
                .filter(|id| !id.is_empty())
                .map(|token_id| ApprovalInfo { token_id }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawToken {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    optimized_symbol: Option<String>,
    #[serde(default)]
    is_verified: Option<bool>,
    #[serde(default)]
    price: Option<Value>,
}

impl RawToken {
    fn into_info(self, id: &str) -> TokenInfo {
        let symbol = self
            .optimized_symbol
            .filter(|s| !s.is_empty())
            .or(self.symbol)
            .unwrap_or_default();
        // An unusable price only costs the USD column.
        let price = match self.price.as_ref().map(lenient_decimal) {
            Some(Lenient::Exact(price)) => Some(price),
            Some(Lenient::Saturated(_) | Lenient::Invalid) => {
                log::warn!("Ignoring unusable price for token {}", id);
                None
            }
            None => None,
        };
        TokenInfo {
            symbol,
            is_verified: self.is_verified,
            price,
        }
    }
}

/// A wire number read into a `Decimal`.
#[derive(Debug, PartialEq)]
enum Lenient {
    Exact(Decimal),
    /// Finite but beyond `Decimal`'s range; clamped to `MAX` or `MIN`.
    Saturated(Decimal),
    Invalid,
}

fn lenient_decimal(value: &Value) -> Lenient {
    let text = match value {
        Value::Null => return Lenient::Exact(Decimal::ZERO),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Lenient::Invalid,
    };

    if let Ok(exact) = Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)) {
        return Lenient::Exact(exact);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() && f.is_sign_negative() => Lenient::Saturated(Decimal::MIN),
        Ok(f) if f.is_finite() => Lenient::Saturated(Decimal::MAX),
        _ => Lenient::Invalid,
    }
}
