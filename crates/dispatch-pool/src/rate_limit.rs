//! Per-identity minimum-interval gate
//!
//! Each identity owns its own slot (interval + last-call timestamp behind its
//! own lock). The slot map itself is built once and never mutated, so
//! acquiring for one identity never contends with another.

use std::collections::HashMap;
use std::time::Duration;

use provider::ResourceIdentity;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};

/// Minimum spacing between calls for a requests-per-minute quota.
///
/// A zero quota is treated as one request per minute.
pub fn min_interval(requests_per_minute: u32) -> Duration {
    Duration::from_secs_f64(60.0 / f64::from(requests_per_minute.max(1)))
}

#[derive(Debug)]
struct Slot {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

/// Spaces out calls per identity.
#[derive(Debug)]
pub struct RateLimiter {
    slots: HashMap<ResourceIdentity, Slot>,
}

impl RateLimiter {
    /// Build a limiter for a fixed set of identities and their intervals.
    pub fn new(limits: impl IntoIterator<Item = (ResourceIdentity, Duration)>) -> Self {
        let slots = limits
            .into_iter()
            .map(|(identity, interval)| {
                (
                    identity,
                    Slot {
                        interval,
                        last_call: Mutex::new(None),
                    },
                )
            })
            .collect();
        Self { slots }
    }

    /// Wait until `identity` may issue its next call, then record the call.
    ///
    /// The first call for an identity goes through immediately. Returns
    /// `Error::Cancelled` without recording anything if `cancel` fires
    /// before the slot opens.
    pub async fn acquire(&self, identity: ResourceIdentity, cancel: &CancellationToken) -> Result<()> {
        let slot = self
            .slots
            .get(&identity)
            .ok_or(Error::UnknownIdentity(identity))?;

        let mut last_call = slot.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + slot.interval;
            if ready_at > Instant::now() {
                trace!(%identity, wait_ms = (ready_at - Instant::now()).as_millis() as u64, "waiting for rate-limit slot");
                tokio::select! {
                    _ = sleep_until(ready_at) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        *last_call = Some(Instant::now());
        Ok(())
    }

    /// Configured spacing for `identity`.
    pub fn min_interval(&self, identity: ResourceIdentity) -> Option<Duration> {
        self.slots.get(&identity).map(|s| s.interval)
    }
}
