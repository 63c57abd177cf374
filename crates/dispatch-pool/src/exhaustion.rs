//! Per-identity quota exhaustion flags
//!
//! Flags only ever go from `false` to `true` during a run. The identity set
//! is fixed at construction, so each flag is a plain `AtomicBool` and no
//! table-wide lock is needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use provider::ResourceIdentity;
use tracing::{info, warn};

#[derive(Debug)]
pub struct ExhaustionTracker {
    flags: HashMap<ResourceIdentity, AtomicBool>,
}

impl ExhaustionTracker {
    pub fn new(identities: impl IntoIterator<Item = ResourceIdentity>) -> Self {
        Self {
            flags: identities
                .into_iter()
                .map(|id| (id, AtomicBool::new(false)))
                .collect(),
        }
    }

    /// Retire `identity` for the rest of the run.
    ///
    /// Idempotent. Returns `true` only for the call that flipped the flag.
    pub fn mark_exhausted(&self, identity: ResourceIdentity) -> bool {
        match self.flags.get(&identity) {
            Some(flag) => {
                let newly = !flag.swap(true, Ordering::AcqRel);
                if newly {
                    info!(%identity, "identity exhausted, retired for this run");
                }
                newly
            }
            None => {
                warn!(%identity, "mark_exhausted for unknown identity ignored");
                false
            }
        }
    }

    pub fn is_exhausted(&self, identity: ResourceIdentity) -> bool {
        self.flags
            .get(&identity)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// True once every privileged-tier identity is exhausted.
    ///
    /// False when no privileged identity exists. Pure read: deciding what to
    /// do about it is the dispatcher's call.
    pub fn all_high_tier_exhausted(&self) -> bool {
        let mut privileged = self
            .flags
            .iter()
            .filter(|(id, _)| id.tier.is_privileged())
            .peekable();
        if privileged.peek().is_none() {
            return false;
        }
        privileged.all(|(_, flag)| flag.load(Ordering::Acquire))
    }

    /// Exhausted identities, sorted.
    pub fn exhausted(&self) -> Vec<ResourceIdentity> {
        let mut ids: Vec<_> = self
            .flags
            .iter()
            .filter(|(_, flag)| flag.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::ServiceTier;

    fn tracker(credentials: usize) -> ExhaustionTracker {
        ExhaustionTracker::new(ResourceIdentity::all(credentials, &ServiceTier::ALL))
    }

    #[test]
    fn starts_unexhausted() {
        let t = tracker(2);
        assert!(!t.is_exhausted(ResourceIdentity::new(0, ServiceTier::Pro)));
        assert!(t.exhausted().is_empty());
        assert!(!t.all_high_tier_exhausted());
    }

    #[test]
    fn mark_is_idempotent_and_monotonic() {
        let t = tracker(1);
        let id = ResourceIdentity::new(0, ServiceTier::Flash);

        assert!(t.mark_exhausted(id));
        assert!(!t.mark_exhausted(id), "second mark reports no change");
        for _ in 0..3 {
            assert!(t.is_exhausted(id));
        }
    }

    #[test]
    fn identities_are_independent() {
        let t = tracker(2);
        t.mark_exhausted(ResourceIdentity::new(0, ServiceTier::Pro));

        assert!(!t.is_exhausted(ResourceIdentity::new(1, ServiceTier::Pro)));
        assert!(!t.is_exhausted(ResourceIdentity::new(0, ServiceTier::Flash)));
    }

    #[test]
    fn high_tier_signal_needs_every_pro_identity() {
        let t = tracker(3);
        t.mark_exhausted(ResourceIdentity::new(0, ServiceTier::Pro));
        t.mark_exhausted(ResourceIdentity::new(1, ServiceTier::Pro));
        assert!(!t.all_high_tier_exhausted());

        t.mark_exhausted(ResourceIdentity::new(2, ServiceTier::Pro));
        assert!(t.all_high_tier_exhausted());

        // Standard-tier state does not affect the signal, and it stays set.
        t.mark_exhausted(ResourceIdentity::new(0, ServiceTier::Flash));
        assert!(t.all_high_tier_exhausted());
    }

    #[test]
    fn flash_exhaustion_alone_does_not_trigger_fallback() {
        let t = tracker(1);
        t.mark_exhausted(ResourceIdentity::new(0, ServiceTier::Flash));
        assert!(!t.all_high_tier_exhausted());
    }

    #[test]
    fn no_privileged_identities_means_no_signal() {
        let t = ExhaustionTracker::new(ResourceIdentity::all(2, &[ServiceTier::Flash]));
        t.mark_exhausted(ResourceIdentity::new(0, ServiceTier::Flash));
        t.mark_exhausted(ResourceIdentity::new(1, ServiceTier::Flash));
        assert!(!t.all_high_tier_exhausted());
    }

    #[test]
    fn unknown_identity_is_ignored() {
        let t = ExhaustionTracker::new(ResourceIdentity::all(1, &[ServiceTier::Pro]));
        let stranger = ResourceIdentity::new(5, ServiceTier::Pro);
        assert!(!t.mark_exhausted(stranger));
        assert!(!t.is_exhausted(stranger));
    }

    #[test]
    fn exhausted_list_is_sorted() {
        let t = tracker(2);
        t.mark_exhausted(ResourceIdentity::new(1, ServiceTier::Flash));
        t.mark_exhausted(ResourceIdentity::new(0, ServiceTier::Pro));
        assert_eq!(
            t.exhausted(),
            vec![
                ResourceIdentity::new(0, ServiceTier::Pro),
                ResourceIdentity::new(1, ServiceTier::Flash),
            ]
        );
    }
}
