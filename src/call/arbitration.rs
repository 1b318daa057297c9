//! Offer arbitration
//!
//! Who offers to whom is decided by the session's host: every non-host
//! participant offers to every other participant, the host never offers.
//! For any host/non-host pair exactly one side offers, so the two sides never
//! offer to each other at the same time.

use std::collections::HashSet;

use super::session::CallSession;

/// Whether `self_id` initiates the offer to `peer_id`
pub fn should_offer(self_id: &str, peer_id: &str, session: &CallSession) -> bool {
    if peer_id == self_id {
        return false;
    }
    session.host.is_some() && !session.is_host(self_id)
}

/// Outstanding offers, keyed by the ordered pair `(self, peer)`
#[derive(Debug, Default)]
pub struct OfferGuard {
    outstanding: HashSet<(String, String)>,
}

impl OfferGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pair. Returns false if an offer is already outstanding.
    pub fn try_acquire(&mut self, self_id: &str, peer_id: &str) -> bool {
        self.outstanding
            .insert((self_id.to_string(), peer_id.to_string()))
    }

    /// Release the pair so a later session update can offer again
    pub fn release(&mut self, self_id: &str, peer_id: &str) -> bool {
        self.outstanding
            .remove(&(self_id.to_string(), peer_id.to_string()))
    }

    pub fn contains(&self, self_id: &str, peer_id: &str) -> bool {
        self.outstanding
            .contains(&(self_id.to_string(), peer_id.to_string()))
    }

    pub fn clear(&mut self) {
        self.outstanding.clear();
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Peers to offer to now, claiming their guard pairs
///
/// Peers are returned in participant order.
pub fn plan_offers(self_id: &str, session: &CallSession, guard: &mut OfferGuard) -> Vec<String> {
    if !session.active {
        return Vec::new();
    }
    session
        .others(self_id)
        .filter(|peer| should_offer(self_id, peer, session))
        .filter(|peer| guard.try_acquire(self_id, peer))
        .map(str::to_string)
        .collect()
}
