// src/models/identity.rs

//! Tracked wallet identities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A wallet address whose activity is polled every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedIdentity {
    /// Wallet address (e.g. `0x63dhf6...9vs5`)
    pub address: String,

    /// Human-readable wallet name used in messages
    pub display_name: String,

    /// Primary chat for this wallet; falls back to the default alerts chat
    pub destination_id: Option<String>,
}

/// Per-wallet entry as supplied in the CLI JSON blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletEntry {
    pub name: String,

    #[serde(default)]
    pub chat_id: Option<String>,
}

impl TrackedIdentity {
    pub fn new(
        address: impl Into<String>,
        display_name: impl Into<String>,
        destination_id: Option<String>,
    ) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
            destination_id,
        }
    }

    /// Build identities from the `wallets` map, in address order.
    ///
    /// Empty `chat_id` strings are treated as absent.
    pub fn from_wallets(wallets: &BTreeMap<String, WalletEntry>) -> Vec<Self> {
        wallets
            .iter()
            .map(|(address, entry)| {
                let destination = entry
                    .chat_id
                    .as_ref()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty());
                Self::new(address.trim(), entry.name.trim(), destination)
            })
            .collect()
    }

    /// Shortened address for display, e.g. `0x63dh...9vs5`.
    pub fn short_address(&self) -> String {
        shorten(&self.address, 6, 4)
    }
}

impl std::fmt::Display for TrackedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.display_name, self.address)
    }
}

/// Keep the first `head` and last `tail` characters, joined by `...`.
pub fn shorten(value: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= head + tail {
        return value.to_string();
    }
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{start}...{end}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wallets() {
        let mut wallets = BTreeMap::new();
        wallets.insert(
            "0xbbb".to_string(),
            WalletEntry {
                name: "Bob".into(),
                chat_id: Some("".into()),
            },
        );
        wallets.insert(
            "0xaaa".to_string(),
            WalletEntry {
                name: " Alice ".into(),
                chat_id: Some("-100123".into()),
            },
        );

        let identities = TrackedIdentity::from_wallets(&wallets);
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].display_name, "Alice");
        assert_eq!(identities[0].destination_id.as_deref(), Some("-100123"));
        assert_eq!(identities[1].destination_id, None);
    }

    #[test]
    fn test_shorten() {
        assert_eq!(
            shorten("0xc43c1a2b3c4d5e6f7a8b9c0d37ea", 6, 4),
            "0xc43c...37ea"
        );
        assert_eq!(shorten("0xabc", 6, 4), "0xabc");
    }
}
