// src/pipeline/watch.rs

//! Watcher assembly and process lifecycle.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{Config, Settings, TrackedIdentity};
use crate::pipeline::classify::Classifier;
use crate::pipeline::dispatch::{Dispatcher, RetryPolicy};
use crate::pipeline::exit::ExitNotifier;
use crate::pipeline::fetch::Fetcher;
use crate::pipeline::poll::Poller;
use crate::services::{
    BackoffOnly, HistoryApiSource, IdentityRotator, NEWNYM_COOLDOWN, RotationController,
    TelegramClient, TorControl,
};
use crate::storage::{HistoryPolicy, LocalStore, MemoryStore, SnapshotStore};
use crate::utils::http;

const PROGRAM: &str = env!("CARGO_PKG_NAME");

/// A fully wired poller plus its exit hook.
pub struct Watcher {
    pub poller: Poller,
    pub exit: ExitNotifier,
}

/// Build every collaborator from a validated configuration.
pub fn build_watcher(config: &Config) -> Result<Watcher> {
    let settings = &config.settings;
    let secrets = &config.secrets;

    let fetcher = build_fetcher(config, settings.max_records)?;

    let messenger = TelegramClient::new(
        http::create_bot_client(settings)?,
        &settings.bot_api_base,
        &secrets.bot_token,
    );
    let dispatcher = Arc::new(
        Dispatcher::new(Arc::new(messenger), RetryPolicy::from_settings(settings))
            .with_all_destination(&secrets.chat_alerts_all)
            .with_default_primary(&secrets.chat_alerts)
            .with_pin_primary(settings.pin_primary),
    );

    let poller = Poller::new(
        config.identities(),
        fetcher,
        build_store(settings),
        Classifier::new(&settings.spam_markers),
        Arc::clone(&dispatcher),
    )
    .with_interval(settings.poll_interval())
    .with_concurrency(settings.concurrency());

    let exit = ExitNotifier::new(dispatcher, &secrets.chat_debug, PROGRAM);

    Ok(Watcher { poller, exit })
}

/// Fetcher over the history API asking for `max_records` per wallet.
pub(crate) fn build_fetcher(config: &Config, max_records: usize) -> Result<Fetcher> {
    let settings = &config.settings;
    let source = HistoryApiSource::new(http::create_source_client(settings)?, &settings.api_base);
    let rotation = RotationController::new(build_rotator(config));
    Ok(Fetcher::new(
        Arc::new(source),
        Arc::new(rotation),
        max_records,
        settings.throttle_budget(),
    ))
}

fn build_rotator(config: &Config) -> Arc<dyn IdentityRotator> {
    match config.settings.tor_control_addr.as_deref().filter(|a| !a.trim().is_empty()) {
        Some(addr) => {
            log::info!("Rotating egress identity through control port {}", addr);
            Arc::new(TorControl::new(
                addr.trim(),
                &config.secrets.tor_password,
                config.settings.request_timeout(),
            ))
        }
        None => {
            log::info!("No control port configured, throttling falls back to plain backoff");
            Arc::new(BackoffOnly::new(NEWNYM_COOLDOWN))
        }
    }
}

fn build_store(settings: &Settings) -> Arc<dyn SnapshotStore> {
    let policy = HistoryPolicy::from_settings(settings);
    match settings.state_dir.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            log::info!("Persisting snapshots under {}", dir);
            Arc::new(LocalStore::new(dir.trim(), policy))
        }
        None => Arc::new(MemoryStore::new(policy)),
    }
}

/// Log the wallets being screened and where their alerts go.
pub fn log_wallet_table(identities: &[TrackedIdentity], default_chat: &str) {
    log::info!("Screening {} wallet(s):", identities.len());
    log::info!("{:<16} {:<24} {}", "Address", "Name", "Chat");
    for identity in identities {
        let chat = identity.destination_id.as_deref().unwrap_or(default_chat);
        log::info!("{:<16} {:<24} {}", identity.short_address(), identity.display_name, chat);
    }
}

/// Validate, build and run the watcher until shutdown.
///
/// With `once` a single cycle runs and the process exits afterwards. Either
/// way the exit warning is sent exactly once.
pub async fn run_watcher(config: &Config, once: bool) -> Result<()> {
    config.validate()?;
    let watcher = build_watcher(config)?;
    log_wallet_table(watcher.poller.identities(), &config.secrets.chat_alerts);

    let poller = &watcher.poller;
    let work = async {
        if once {
            poller.run_cycle(1).await;
            "single cycle finished"
        } else {
            poller.run().await;
            "poller stopped"
        }
    };

    // Dropping `work` cancels any in-flight fetch, retry or sleep.
    let reason = tokio::select! {
        reason = work => reason,
        reason = shutdown_signal() => reason,
    };

    log::info!("Shutting down: {}", reason);
    watcher.exit.notify(reason).await;
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "interrupted",
        _ = terminate => "terminated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WalletEntry;

    fn config() -> Config {
        let mut config = Config::default();
        config.wallets.insert(
            "0xabc".into(),
            WalletEntry {
                name: "Main".into(),
                chat_id: None,
            },
        );
        config.secrets.bot_token = "123:abc".into();
        config
    }

    #[test]
    fn test_build_watcher_from_defaults() {
        let watcher = build_watcher(&config()).unwrap();
        assert_eq!(watcher.poller.identities().len(), 1);
        assert_eq!(watcher.poller.identities()[0].display_name, "Main");
    }

    #[test]
    fn test_build_watcher_with_state_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = config();
        config.settings.state_dir = Some(tmp.path().display().to_string());
        config.settings.tor_control_addr = Some("127.0.0.1:9051".into());
        assert!(build_watcher(&config).is_ok());
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let mut config = config();
        config.secrets.bot_token.clear();
        assert!(run_watcher(&config, true).await.is_err());
    }
}
