// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;
use crate::models::Settings;

/// Create the client used for upstream history requests.
///
/// Routed through `proxy_url` when one is configured so that identity
/// rotation on the control endpoint changes the egress address.
pub fn create_source_client(settings: &Settings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(&settings.user_agent)
        .timeout(Duration::from_secs(settings.request_timeout_secs));

    if let Some(proxy) = settings.proxy_url.as_deref().filter(|p| !p.is_empty()) {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    Ok(builder.build()?)
}

/// Create the client used for bot API calls (never proxied).
pub fn create_bot_client(settings: &Settings) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .build()?;
    Ok(client)
}
