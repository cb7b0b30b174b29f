//! Application configuration structures.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{TrackedIdentity, WalletEntry};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Polling, retry, and classification tuning
    #[serde(default)]
    pub settings: Settings,

    /// Wallets to screen, keyed by address
    #[serde(default)]
    pub wallets: BTreeMap<String, WalletEntry>,

    /// Tokens and chat ids, never read from the JSON blob
    #[serde(skip)]
    pub secrets: Secrets,
}

impl Config {
    /// Tracked identities derived from `wallets`.
    pub fn identities(&self) -> Vec<TrackedIdentity> {
        TrackedIdentity::from_wallets(&self.wallets)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.wallets.is_empty() {
            return Err(AppError::validation("No wallets defined"));
        }
        let mut seen = HashSet::new();
        for (address, entry) in &self.wallets {
            if address.trim().is_empty() {
                return Err(AppError::validation("wallet address is empty"));
            }
            // Snapshots are keyed case-insensitively; one file, one owner.
            if !seen.insert(address.trim().to_ascii_lowercase()) {
                return Err(AppError::validation(format!(
                    "wallet {address} is listed more than once (addresses are case-insensitive)"
                )));
            }
            if entry.name.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "wallet {address} has an empty name"
                )));
            }
        }
        self.settings.validate()?;
        if self.secrets.bot_token.trim().is_empty() {
            return Err(AppError::validation("TOKEN is not set"));
        }
        Ok(())
    }
}

/// How the snapshot store replaces record history on commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    /// Keep only the latest fetched window.
    Replace,
    /// Prepend newly confirmed records and cap the total.
    #[default]
    Bounded,
}

/// Polling, retry, and classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Sleep between the end of one cycle and the start of the next
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request timeout for upstream and bot API calls
    #[serde(default = "defaults::request_timeout")]
    pub request_timeout_secs: u64,

    /// Records requested per wallet per cycle
    #[serde(default = "defaults::max_records")]
    pub max_records: usize,

    /// Total time allowed for throttle evasion before giving up on a wallet
    #[serde(default = "defaults::throttle_budget")]
    pub throttle_budget_secs: u64,

    #[serde(default)]
    pub history: HistoryMode,

    /// Maximum retained records per wallet in bounded mode
    #[serde(default = "defaults::history_cap")]
    pub history_cap: usize,

    /// Fixed delay between delivery attempts
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_secs: u64,

    /// Attempts per message before logging a permanent failure
    #[serde(default = "defaults::max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Wallets fetched in parallel (0 = available parallelism)
    #[serde(default)]
    pub max_concurrent: usize,

    /// Known spam campaign markers matched against categories and tokens
    #[serde(default)]
    pub spam_markers: Vec<String>,

    /// Proxy for upstream requests, e.g. `socks5h://127.0.0.1:9050`
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Control endpoint used to rotate the egress identity, e.g. `127.0.0.1:9051`
    #[serde(default)]
    pub tor_control_addr: Option<String>,

    /// Persist snapshots here so a restart resumes instead of re-priming
    #[serde(default)]
    pub state_dir: Option<String>,

    /// Pin messages delivered to a wallet's primary chat
    #[serde(default)]
    pub pin_primary: bool,

    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    #[serde(default = "defaults::bot_api_base")]
    pub bot_api_base: String,

    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn throttle_budget(&self) -> Duration {
        Duration::from_secs(self.throttle_budget_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Worker count for the fetch fan-out.
    pub fn concurrency(&self) -> usize {
        if self.max_concurrent > 0 {
            return self.max_concurrent;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(AppError::validation("poll_interval_secs must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::validation("request_timeout_secs must be > 0"));
        }
        if self.max_records == 0 {
            return Err(AppError::validation("max_records must be > 0"));
        }
        if self.history_cap == 0 {
            return Err(AppError::validation("history_cap must be > 0"));
        }
        if self.max_delivery_attempts == 0 {
            return Err(AppError::validation("max_delivery_attempts must be > 0"));
        }
        if self.api_base.trim().is_empty() || self.bot_api_base.trim().is_empty() {
            return Err(AppError::validation("API base URLs must not be empty"));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::poll_interval(),
            request_timeout_secs: defaults::request_timeout(),
            max_records: defaults::max_records(),
            throttle_budget_secs: defaults::throttle_budget(),
            history: HistoryMode::default(),
            history_cap: defaults::history_cap(),
            retry_delay_secs: defaults::retry_delay(),
            max_delivery_attempts: defaults::max_delivery_attempts(),
            max_concurrent: 0,
            spam_markers: Vec::new(),
            proxy_url: None,
            tor_control_addr: None,
            state_dir: None,
            pin_primary: false,
            api_base: defaults::api_base(),
            bot_api_base: defaults::bot_api_base(),
            user_agent: defaults::user_agent(),
        }
    }
}

/// Credentials and chat ids loaded from the environment.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// `TOKEN`: bot API token
    pub bot_token: String,
    /// `CHAT_ID_ALERTS`: default primary chat
    pub chat_alerts: String,
    /// `CHAT_ID_ALERTS_ALL`: receives every new record
    pub chat_alerts_all: String,
    /// `CHAT_ID_DEBUG`: receives the exit notification
    pub chat_debug: String,
    /// `TOR_PASSWORD`: control port credential
    pub tor_password: String,
}

impl Secrets {
    /// Read secrets through a lookup function (usually `std::env::var`).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();
        Self {
            bot_token: get("TOKEN"),
            chat_alerts: get("CHAT_ID_ALERTS"),
            chat_alerts_all: get("CHAT_ID_ALERTS_ALL"),
            chat_debug: get("CHAT_ID_DEBUG"),
            tor_password: get("TOR_PASSWORD"),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

mod defaults {
    pub fn poll_interval() -> u64 {
        30
    }
    pub fn request_timeout() -> u64 {
        10
    }
    pub fn max_records() -> usize {
        20
    }
    pub fn throttle_budget() -> u64 {
        15
    }
    pub fn history_cap() -> usize {
        40
    }
    pub fn retry_delay() -> u64 {
        3
    }
    pub fn max_delivery_attempts() -> u32 {
        10
    }
    pub fn api_base() -> String {
        "https://api.debank.com".into()
    }
    pub fn bot_api_base() -> String {
        "https://api.telegram.org".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; walletwatch/0.1)".into()
    }
}
