//! Notification dispatch with per-destination retry.
//!
//! Every record goes to the "all activity" destination. Only records labelled
//! normal also go to the identity's primary destination; spam and failed
//! records stay in the unfiltered feed. Retry rules:
//!
//! - well-formed refusal (`ok == false`): wait `retry_delay`, retry up to `max_attempts`
//! - transport failure: one retry, then give up
//!
//! A destination that exhausts its attempts is reported as failed and logged;
//! it never aborts the rest of the cycle.

use std::sync::Arc;
use std::time::Duration;

use crate::error::DeliveryError;
use crate::models::{ActivityRecord, Settings, TrackedIdentity};
use crate::pipeline::classify::Label;
use crate::pipeline::render::{MessageContext, render_message};
use crate::services::Messenger;

/// Transport failures tolerated per destination before giving up.
const MAX_TRANSPORT_FAILURES: u32 = 2;

/// Retry behaviour for message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry_delay: settings.retry_delay(),
            max_attempts: settings.max_delivery_attempts.max(1),
        }
    }
}

/// Which destination a message was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Unfiltered feed of every record
    All,
    /// Filtered destination of the identity
    Primary,
}

/// A single destination and the body to send there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    pub audience: Audience,
    pub destination_id: String,
    pub message_body: String,
}

/// Result of delivering to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        message_id: Option<i64>,
        attempts: u32,
    },
    Failed {
        attempts: u32,
        error: DeliveryError,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Per-destination outcomes for one record.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub deliveries: Vec<(DispatchTarget, DeliveryOutcome)>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|(_, o)| o.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.deliveries.len() - self.delivered()
    }
}

/// Sends rendered records to their destinations.
pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
    policy: RetryPolicy,
    all_destination: Option<String>,
    default_primary: Option<String>,
    pin_primary: bool,
}

impl Dispatcher {
    pub fn new(messenger: Arc<dyn Messenger>, policy: RetryPolicy) -> Self {
        Self {
            messenger,
            policy,
            all_destination: None,
            default_primary: None,
            pin_primary: false,
        }
    }

    /// Destination receiving every record, spam included.
    pub fn with_all_destination(mut self, chat_id: impl Into<String>) -> Self {
        self.all_destination = non_empty(chat_id.into());
        self
    }

    /// Primary destination for identities without their own.
    pub fn with_default_primary(mut self, chat_id: impl Into<String>) -> Self {
        self.default_primary = non_empty(chat_id.into());
        self
    }

    pub fn with_pin_primary(mut self, pin: bool) -> Self {
        self.pin_primary = pin;
        self
    }

    /// Resolve the destinations for a record with the given label.
    ///
    /// The same chat is never targeted twice for one record.
    pub fn targets(&self, identity: &TrackedIdentity, label: Label, body: &str) -> Vec<DispatchTarget> {
        let mut targets = Vec::with_capacity(2);

        if let Some(all) = &self.all_destination {
            targets.push(DispatchTarget {
                audience: Audience::All,
                destination_id: all.clone(),
                message_body: body.to_string(),
            });
        }

        if label == Label::Normal {
            let primary = identity
                .destination_id
                .as_ref()
                .or(self.default_primary.as_ref());
            if let Some(primary) = primary {
                if self.all_destination.as_ref() != Some(primary) {
                    targets.push(DispatchTarget {
                        audience: Audience::Primary,
                        destination_id: primary.clone(),
                        message_body: body.to_string(),
                    });
                }
            }
        }

        targets
    }

    /// Render and deliver one record to all of its destinations.
    pub async fn dispatch(
        &self,
        record: &ActivityRecord,
        identity: &TrackedIdentity,
        label: Label,
        ctx: MessageContext<'_>,
    ) -> DispatchReport {
        let body = render_message(record, identity, label, ctx);
        let mut report = DispatchReport::default();

        for target in self.targets(identity, label, &body) {
            let outcome = self.deliver(&target.destination_id, &target.message_body).await;
            match &outcome {
                DeliveryOutcome::Delivered { message_id, attempts } => {
                    log::debug!(
                        "Delivered {} to {} after {} attempt(s)",
                        record.short_id(),
                        target.destination_id,
                        attempts
                    );
                    if target.audience == Audience::Primary && self.pin_primary {
                        if let Some(id) = message_id {
                            self.pin(&target.destination_id, *id).await;
                        }
                    }
                }
                DeliveryOutcome::Failed { attempts, error } => {
                    log::error!(
                        "Giving up on {} for {} after {} attempt(s): {}",
                        record.short_id(),
                        target.destination_id,
                        attempts,
                        error
                    );
                }
            }
            report.deliveries.push((target, outcome));
        }

        report
    }

    /// Deliver a message to one destination under the retry policy.
    pub async fn deliver(&self, chat_id: &str, text: &str) -> DeliveryOutcome {
        let mut attempts = 0;
        let mut transport_failures = 0;

        loop {
            attempts += 1;
            let last_error = match self.messenger.send_message(chat_id, text).await {
                Ok(reply) if reply.ok => {
                    return DeliveryOutcome::Delivered {
                        message_id: reply.message_id,
                        attempts,
                    };
                }
                Ok(reply) => {
                    let reason = reply.description.unwrap_or_else(|| "not ok".to_string());
                    log::warn!("Delivery to {} refused (attempt {}): {}", chat_id, attempts, reason);
                    DeliveryError::transient(reason)
                }
                Err(e) => {
                    transport_failures += 1;
                    log::warn!("Delivery to {} failed (attempt {}): {}", chat_id, attempts, e);
                    if transport_failures >= MAX_TRANSPORT_FAILURES {
                        return DeliveryOutcome::Failed {
                            attempts,
                            error: e.into_permanent(),
                        };
                    }
                    e
                }
            };

            if attempts >= self.policy.max_attempts {
                return DeliveryOutcome::Failed {
                    attempts,
                    error: last_error.into_permanent(),
                };
            }
            tokio::time::sleep(self.policy.retry_delay).await;
        }
    }

    async fn pin(&self, chat_id: &str, message_id: i64) {
        match self.messenger.pin_message(chat_id, message_id).await {
            Ok(reply) if reply.ok => log::debug!("Pinned message {} in {}", message_id, chat_id),
            Ok(reply) => log::warn!(
                "Pin refused in {}: {}",
                chat_id,
                reply.description.unwrap_or_default()
            ),
            Err(e) => log::warn!("Pin failed in {}: {}", chat_id, e),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ProjectMetadata, TokenMetadata};
    use crate::services::BotReply;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Messenger replaying scripted replies and recording every call.
    #[derive(Default)]
    pub(crate) struct ScriptedMessenger {
        replies: Mutex<VecDeque<Result<BotReply, DeliveryError>>>,
        pub(crate) sent: Mutex<Vec<(String, String)>>,
        pub(crate) pinned: Mutex<Vec<(String, i64)>>,
    }

    impl ScriptedMessenger {
        pub(crate) fn with_replies(replies: Vec<Result<BotReply, DeliveryError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        pub(crate) fn chats(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }
    }

    pub(crate) fn ok_reply(id: i64) -> BotReply {
        BotReply {
            ok: true,
            message_id: Some(id),
            description: None,
        }
    }

    fn refused() -> BotReply {
        BotReply {
            ok: false,
            message_id: None,
            description: Some("Too Many Requests".into()),
        }
    }

    #[async_trait]
    impl Messenger for ScriptedMessenger {
        async fn send_message(&self, chat_id: &str, text: &str) -> Result<BotReply, DeliveryError> {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok_reply(1)))
        }

        async fn pin_message(&self, chat_id: &str, message_id: i64) -> Result<BotReply, DeliveryError> {
            self.pinned
                .lock()
                .unwrap()
                .push((chat_id.to_string(), message_id));
            Ok(ok_reply(message_id))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_delay: Duration::from_secs(3),
            max_attempts: 10,
        }
    }

    fn dispatcher(messenger: Arc<ScriptedMessenger>) -> Dispatcher {
        Dispatcher::new(messenger, policy())
            .with_all_destination("all")
            .with_default_primary("alerts")
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusals_are_retried_until_ok() {
        let messenger = Arc::new(ScriptedMessenger::with_replies(vec![
            Ok(refused()),
            Ok(refused()),
            Ok(refused()),
            Ok(ok_reply(42)),
        ]));
        let dispatcher = dispatcher(messenger.clone());

        let started = tokio::time::Instant::now();
        let outcome = dispatcher.deliver("alerts", "hello").await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                message_id: Some(42),
                attempts: 4
            }
        );
        assert_eq!(messenger.sent.lock().unwrap().len(), 4);
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusals_stop_at_max_attempts() {
        let messenger = Arc::new(ScriptedMessenger::with_replies(
            (0..20).map(|_| Ok(refused())).collect(),
        ));
        let dispatcher = Dispatcher::new(
            messenger.clone(),
            RetryPolicy {
                retry_delay: Duration::from_secs(1),
                max_attempts: 3,
            },
        );

        let outcome = dispatcher.deliver("alerts", "hello").await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 3, .. }));
        assert_eq!(messenger.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_retried_once() {
        let messenger = Arc::new(ScriptedMessenger::with_replies(vec![
            Err(DeliveryError::transient("connection reset")),
            Err(DeliveryError::transient("connection reset")),
            Ok(ok_reply(7)),
        ]));
        let dispatcher = dispatcher(messenger.clone());

        let outcome = dispatcher.deliver("alerts", "hello").await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed {
                attempts: 2,
                error: DeliveryError::Permanent(_)
            }
        ));
        assert_eq!(messenger.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_transport_failure_recovers() {
        let messenger = Arc::new(ScriptedMessenger::with_replies(vec![
            Err(DeliveryError::transient("timeout")),
            Ok(ok_reply(7)),
        ]));
        let outcome = dispatcher(messenger).deliver("alerts", "hello").await;
        assert!(outcome.is_delivered());
    }

    #[test]
    fn test_failed_goes_to_all_only() {
        let dispatcher = dispatcher(Arc::new(ScriptedMessenger::default()));
        let identity = TrackedIdentity::new("0xabc", "Main", Some("own".into()));

        let targets = dispatcher.targets(&identity, Label::Failed, "x");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].audience, Audience::All);
    }

    #[test]
    fn test_spam_goes_to_all_only() {
        let dispatcher = dispatcher(Arc::new(ScriptedMessenger::default()));
        let identity = TrackedIdentity::new("0xabc", "Main", Some("own".into()));

        let spam: Vec<_> = dispatcher
            .targets(&identity, Label::Spam, "x")
            .into_iter()
            .map(|t| t.destination_id)
            .collect();
        assert_eq!(spam, vec!["all"]);

        let normal: Vec<_> = dispatcher
            .targets(&identity, Label::Normal, "x")
            .into_iter()
            .map(|t| t.destination_id)
            .collect();
        assert_eq!(normal, vec!["all", "own"]);
    }

    #[test]
    fn test_primary_falls_back_to_default() {
        let dispatcher = dispatcher(Arc::new(ScriptedMessenger::default()));
        let identity = TrackedIdentity::new("0xabc", "Main", None);

        let targets = dispatcher.targets(&identity, Label::Normal, "x");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].audience, Audience::Primary);
        assert_eq!(targets[1].destination_id, "alerts");
    }

    #[test]
    fn test_same_chat_not_targeted_twice() {
        let dispatcher = Dispatcher::new(Arc::new(ScriptedMessenger::default()), policy())
            .with_all_destination("same")
            .with_default_primary("same");
        let identity = TrackedIdentity::new("0xabc", "Main", None);

        assert_eq!(dispatcher.targets(&identity, Label::Normal, "x").len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_pins_primary_only() {
        let messenger = Arc::new(ScriptedMessenger::with_replies(vec![
            Ok(ok_reply(10)),
            Ok(ok_reply(11)),
        ]));
        let dispatcher = dispatcher(messenger.clone()).with_pin_primary(true);
        let identity = TrackedIdentity::new("0xabc", "Main", None);
        let tokens = TokenMetadata::new();
        let projects = ProjectMetadata::new();
        let ctx = MessageContext {
            tokens: &tokens,
            projects: &projects,
        };

        let report = dispatcher
            .dispatch(&ActivityRecord::new("0x01", "eth"), &identity, Label::Normal, ctx)
            .await;

        assert_eq!(report.delivered(), 2);
        assert_eq!(messenger.chats(), vec!["all", "alerts"]);
        assert_eq!(*messenger.pinned.lock().unwrap(), vec![("alerts".to_string(), 11)]);
    }
}
