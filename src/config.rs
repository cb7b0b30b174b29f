// src/config.rs

//! Configuration loading.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. optional TOML file (`[settings]` and `[wallets.<address>]` tables)
//! 3. JSON blob given on the command line (`{"settings": {...}, "wallets": {...}}`)
//!
//! Secrets (bot token, chat ids, control port password) only come from the
//! environment, optionally populated from a `.env` file.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::models::{Config, Secrets};

/// Load a `.env` file from the working directory or its parents, if any.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => log::debug!("No .env file found"),
        Err(e) => log::warn!("Failed to read .env file: {}", e),
    }
}

/// Load configuration with secrets taken from the process environment.
pub fn load_config(blob: Option<&str>, settings_file: Option<&Path>) -> Result<Config> {
    load_config_with(blob, settings_file, Secrets::from_env())
}

/// Load configuration with explicit secrets.
pub fn load_config_with(
    blob: Option<&str>,
    settings_file: Option<&Path>,
    secrets: Secrets,
) -> Result<Config> {
    let mut merged = match settings_file {
        Some(path) => read_toml_layer(path)?,
        None => Map::new(),
    };

    if let Some(blob) = blob.filter(|b| !b.trim().is_empty()) {
        let layer = parse_blob(blob)?;
        overlay(&mut merged, layer);
    }

    let mut config: Config = serde_json::from_value(Value::Object(merged))
        .map_err(|e| AppError::config(format!("Invalid configuration: {e}")))?;
    config.secrets = secrets;
    Ok(config)
}

/// Parse the command-line JSON blob into a top-level object.
pub fn parse_blob(blob: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(blob)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::config(format!(
            "Configuration blob must be a JSON object, got {}",
            kind(&other)
        ))),
    }
}

fn read_toml_layer(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    let table: toml::Table = toml::from_str(&text)?;
    match serde_json::to_value(table)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Overlay `layer` on `base`. `settings` is merged key by key; every other
/// top-level key (notably `wallets`) is replaced wholesale.
fn overlay(base: &mut Map<String, Value>, layer: Map<String, Value>) {
    for (key, value) in layer {
        let merge = key == "settings"
            && value.is_object()
            && matches!(base.get(&key), Some(Value::Object(_)));
        if !merge {
            base.insert(key, value);
            continue;
        }
        if let (Some(Value::Object(existing)), Value::Object(incoming)) = (base.get_mut(&key), value) {
            existing.extend(incoming);
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
