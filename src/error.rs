// src/error.rs

//! Unified error handling for the wallet watcher.
//!
//! `AppError` covers set-up and infrastructure failures. The per-stage error
//! types (`FetchError`, `RotationError`, `DeliveryError`) stay narrow so each
//! stage can decide its own recovery policy without matching on unrelated cases.

use std::fmt;

use thiserror::Error;

/// Result type alias for application operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Identity rotation failed
    #[error(transparent)]
    Rotation(#[from] RotationError),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Outcome of a failed upstream fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream asked us to slow down (HTTP 429).
    #[error("throttled by upstream")]
    Throttled,

    /// Timeout, connection failure, or an exhausted throttle budget.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// Payload did not parse or lacked the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl FetchError {
    pub fn unreachable(message: impl fmt::Display) -> Self {
        Self::Unreachable(message.to_string())
    }

    pub fn malformed(message: impl fmt::Display) -> Self {
        Self::MalformedResponse(message.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::malformed(e)
        } else {
            Self::unreachable(e)
        }
    }
}

/// Failure while asking the control endpoint for a new egress identity.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("control port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control port rejected authentication: {0}")]
    Authentication(String),

    #[error("unexpected control port reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error("control port closed the connection")]
    Closed,
}

/// Failure to deliver a notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth retrying: transport hiccup or a well-formed "not ok" reply.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Gave up, or the request can never succeed.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn transient(message: impl fmt::Display) -> Self {
        Self::Transient(message.to_string())
    }

    pub fn permanent(message: impl fmt::Display) -> Self {
        Self::Permanent(message.to_string())
    }

    /// Same failure, marked as no longer worth retrying.
    pub fn into_permanent(self) -> Self {
        match self {
            Self::Transient(m) | Self::Permanent(m) => Self::Permanent(m),
        }
    }
}

/// A record that cannot take part in diffing or classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("record has no id (chain {chain:?})")]
    MissingId { chain: String },
}
