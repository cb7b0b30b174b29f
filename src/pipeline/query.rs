//! One-shot listing of the latest records per wallet.
//!
//! Nothing is diffed, stored or sent; each record is classified and rendered
//! the same way a live notification would be.

use futures::stream::{self, StreamExt};

use crate::error::{AppError, FetchError, Result};
use crate::models::{Config, TrackedIdentity};
use crate::pipeline::classify::Classifier;
use crate::pipeline::fetch::Fetcher;
use crate::pipeline::render::{MessageContext, render_message};
use crate::pipeline::watch::build_fetcher;
use crate::utils::profile_link;

/// Rendered records for one wallet, or why they could not be fetched.
#[derive(Debug)]
pub struct WalletListing {
    pub identity: TrackedIdentity,
    pub result: std::result::Result<Vec<String>, FetchError>,
}

impl WalletListing {
    /// Plain-text block printed for the wallet.
    pub fn to_text(&self) -> String {
        let header = format!("Address: {}, {}", self.identity.address, self.identity.display_name);
        match &self.result {
            Ok(messages) if messages.is_empty() => format!("{header}\nNo activity found"),
            Ok(messages) => format!("{header}\n{}", messages.join("\n\n")),
            Err(e) => format!(
                "{header}\nCan not query history at this time ({e}), try {}",
                profile_link(&self.identity.address)
            ),
        }
    }
}

/// Fetch and render the latest `count` records of every identity, in input order.
pub async fn query_latest(
    fetcher: &Fetcher,
    classifier: &Classifier,
    identities: &[TrackedIdentity],
    count: usize,
    concurrency: usize,
) -> Vec<WalletListing> {
    stream::iter(identities.iter().cloned())
        .map(|identity| async move {
            let result = fetcher.fetch(&identity).await.map(|snapshot| {
                let ctx = MessageContext {
                    tokens: &snapshot.tokens,
                    projects: &snapshot.projects,
                };
                snapshot
                    .records
                    .iter()
                    .filter(|r| r.check().is_ok())
                    .take(count)
                    .map(|r| render_message(r, &identity, classifier.classify(r, &snapshot.tokens), ctx))
                    .collect()
            });
            WalletListing { identity, result }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Print the latest `count` records per configured wallet to stdout.
pub async fn run_query(config: &Config, count: usize) -> Result<()> {
    if config.wallets.is_empty() {
        return Err(AppError::validation("No wallets defined"));
    }
    if count == 0 {
        return Err(AppError::validation("query count must be > 0"));
    }
    config.settings.validate()?;

    let fetcher = build_fetcher(config, count)?;
    let classifier = Classifier::new(&config.settings.spam_markers);
    let listings = query_latest(
        &fetcher,
        &classifier,
        &config.identities(),
        count,
        config.settings.concurrency(),
    )
    .await;

    println!("Latest {count} transaction(s):\n");
    for listing in &listings {
        println!("{}\n", listing.to_text());
    }
    Ok(())
}
