//! One-shot warning sent when the watcher stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::pipeline::dispatch::{DeliveryOutcome, Dispatcher};
use crate::pipeline::render::render_exit_warning;

pub struct ExitNotifier {
    dispatcher: Arc<Dispatcher>,
    destination: Option<String>,
    program: String,
    fired: AtomicBool,
}

impl ExitNotifier {
    pub fn new(dispatcher: Arc<Dispatcher>, destination: impl Into<String>, program: impl Into<String>) -> Self {
        let destination = destination.into();
        Self {
            dispatcher,
            destination: (!destination.trim().is_empty()).then(|| destination.trim().to_string()),
            program: program.into(),
            fired: AtomicBool::new(false),
        }
    }

    /// Send the stop warning. Only the first call does anything.
    ///
    /// Returns whether a message was delivered by this call.
    pub async fn notify(&self, reason: &str) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(destination) = &self.destination else {
            log::debug!("No debug destination configured, skipping exit warning");
            return false;
        };

        let text = render_exit_warning(&self.program, reason);
        match self.dispatcher.deliver(destination, &text).await {
            DeliveryOutcome::Delivered { .. } => {
                log::info!("Exit warning sent ({})", reason);
                true
            }
            DeliveryOutcome::Failed { error, .. } => {
                log::error!("Exit warning not delivered: {}", error);
                false
            }
        }
    }
}
