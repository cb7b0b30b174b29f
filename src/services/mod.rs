//! Service layer for the wallet watcher.
//!
//! This module contains the network-facing collaborators:
//! - History fetching (`ActivitySource`, `HistoryApiSource`)
//! - Egress identity rotation (`RotationController`, `TorControl`)
//! - Notification delivery (`Messenger`, `TelegramClient`)

mod rotation;
mod source;
mod telegram;

pub use rotation::{
    BackoffOnly, IdentityRotator, NEWNYM_COOLDOWN, Rotation, RotationController, TorControl,
};
pub use source::{ActivitySource, HistoryApiSource, parse_history};
pub use telegram::{BotReply, Messenger, TelegramClient};
