//! Fetching under throttling.
//!
//! A throttled fetch asks the rotation controller for a fresh egress identity
//! and retries. The whole exchange for one identity is capped by the throttle
//! budget; once the next wait would overrun it the fetch is reported as
//! unreachable and the identity is skipped until the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::FetchError;
use crate::models::{Snapshot, TrackedIdentity};
use crate::services::{ActivitySource, RotationController};

/// Pause after a failed rotation before fetching again.
pub const ROTATION_FAILURE_BACKOFF: Duration = Duration::from_secs(2);

/// Source fetcher that rotates egress identity when throttled.
pub struct Fetcher {
    source: Arc<dyn ActivitySource>,
    rotation: Arc<RotationController>,
    max_records: usize,
    budget: Duration,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        rotation: Arc<RotationController>,
        max_records: usize,
        budget: Duration,
    ) -> Self {
        Self {
            source,
            rotation,
            max_records,
            budget,
        }
    }

    /// Fetch the latest window for an identity, rotating while throttled.
    pub async fn fetch(&self, identity: &TrackedIdentity) -> Result<Snapshot, FetchError> {
        let started = Instant::now();
        let mut throttled = 0u32;

        loop {
            match self.source.fetch(identity, self.max_records).await {
                Err(FetchError::Throttled) => throttled += 1,
                other => return other,
            }

            let wait = match self.rotation.obtain_fresh_identity().await {
                Ok(rotation) => rotation.wait(),
                Err(e) => {
                    log::warn!("Identity rotation failed for {}: {}", identity.short_address(), e);
                    ROTATION_FAILURE_BACKOFF
                }
            };

            let elapsed = started.elapsed();
            if elapsed + wait > self.budget {
                log::warn!(
                    "Throttled {} time(s) fetching {}, giving up after {:.1}s",
                    throttled,
                    identity.short_address(),
                    elapsed.as_secs_f64()
                );
                return Err(FetchError::unreachable(format!(
                    "throttle budget of {}s exhausted",
                    self.budget.as_secs()
                )));
            }

            if !wait.is_zero() {
                log::debug!(
                    "Waiting {:.1}s before refetching {}",
                    wait.as_secs_f64(),
                    identity.short_address()
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}
