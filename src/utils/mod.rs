//! Utility functions and helpers.

pub mod age;
pub mod http;

use url::Url;

/// Block explorers for the chains upstream reports.
const EXPLORERS: &[(&str, &str)] = &[
    ("eth", "https://etherscan.io"),
    ("op", "https://optimistic.etherscan.io"),
    ("arb", "https://arbiscan.io"),
    ("bsc", "https://bscscan.com"),
    ("avax", "https://snowtrace.io"),
    ("matic", "https://polygonscan.com"),
    ("aurora", "https://aurorascan.dev"),
    ("cro", "https://cronoscan.com"),
    ("heco", "https://www.hecoinfo.com/en-us"),
    ("doge", "https://explorer.dogechain.dog"),
    ("canto", "https://evm.explorer.canto.io"),
];

/// Explorer base URL for a chain tag, if known.
pub fn explorer_for(chain: &str) -> Option<&'static str> {
    EXPLORERS
        .iter()
        .find(|(tag, _)| tag.eq_ignore_ascii_case(chain))
        .map(|(_, base)| *base)
}

/// Web search link used when a chain has no known explorer.
pub fn search_link(chain: &str, term: &str) -> String {
    let query = format!("{chain} {term}");
    Url::parse_with_params("https://www.google.com/search", &[("q", query.as_str())])
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("https://www.google.com/search?q={chain}+{term}"))
}

/// Link to a transaction on the chain's explorer.
pub fn tx_link(chain: &str, hash: &str) -> String {
    match explorer_for(chain) {
        Some(base) => format!("{base}/tx/{hash}"),
        None => search_link(chain, hash),
    }
}

/// Link to an address (account, contract, or token) on the chain's explorer.
pub fn address_link(chain: &str, address: &str) -> String {
    match explorer_for(chain) {
        Some(base) => format!("{base}/address/{address}"),
        None => search_link(chain, address),
    }
}

/// Link to a wallet's history page.
pub fn profile_link(address: &str) -> String {
    format!("https://debank.com/profile/{address}/history")
}

/// Title-case a free-text category (`contract interaction` -> `Contract Interaction`).
pub fn title_case(text: &str) -> String {
    text.split(|c: char| c == ' ' || c == '_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Escape text for the bot API's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a value for a quoted HTML attribute such as `href`.
pub fn escape_attr(text: &str) -> String {
    escape_html(text)
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
