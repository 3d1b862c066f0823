//! Peer Registry
//!
//! Tracks every nearby device the radio has seen and the state of the link
//! to it. Exactly one [`PeerLink`] exists per address. Reads hand out
//! copies, so a fan-out loop never observes discovery churn mid-iteration.
//!
//! Disconnected peers are kept for a grace period before being pruned, which
//! absorbs quick disconnect/reconnect flaps without a fresh discovery cycle.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::transport::PeerAddress;
use crate::protocol::monotonic_now;

/// State of the link to a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    /// Advertisement seen, no link attempted yet
    Discovered,
    /// Link establishment in progress
    Connecting,
    /// Link up, alerts can be exchanged
    Connected,
    /// Link lost or torn down, pending reconnect or pruning
    Disconnected,
}

/// A tracked peer
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub address: PeerAddress,
    pub state: LinkState,
    /// When the link last entered `Connected`
    pub established_at: Option<Instant>,
    /// When `state` last changed
    pub state_changed_at: Instant,
    /// Last time discovery or the radio reported this peer
    pub last_seen: Instant,
}

/// Outcome of an [`PeerRegistry::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerUpdate {
    /// First time this address was seen
    Inserted,
    /// State moved from one value to another
    Changed { from: LinkState, to: LinkState },
    /// Same state, or a re-discovery of a linked peer; only `last_seen` moved
    Refreshed,
}

/// Registry of peer links, safe to share across tasks
#[derive(Debug, Default)]
pub struct PeerRegistry {
    links: RwLock<BTreeMap<PeerAddress, PeerLink>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer or move it to `state`
    ///
    /// Re-discovering a peer that is already `Connecting` or `Connected`
    /// only refreshes it; a scan result never downgrades a live link.
    pub fn upsert(&self, address: &PeerAddress, state: LinkState) -> PeerUpdate {
        self.upsert_at(address, state, monotonic_now())
    }

    pub(crate) fn upsert_at(&self, address: &PeerAddress, state: LinkState, now: Instant) -> PeerUpdate {
        let mut links = self.links.write();
        match links.get_mut(address) {
            None => {
                links.insert(
                    address.clone(),
                    PeerLink {
                        address: address.clone(),
                        state,
                        established_at: (state == LinkState::Connected).then_some(now),
                        state_changed_at: now,
                        last_seen: now,
                    },
                );
                debug!(peer = %address, ?state, "peers: inserted");
                PeerUpdate::Inserted
            }
            Some(link) => {
                link.last_seen = now;
                let keeps_live_link = state == LinkState::Discovered
                    && matches!(link.state, LinkState::Connecting | LinkState::Connected);
                if link.state == state || keeps_live_link {
                    trace!(peer = %address, state = ?link.state, "peers: refreshed");
                    return PeerUpdate::Refreshed;
                }
                let from = link.state;
                apply_state(link, state, now);
                debug!(peer = %address, ?from, to = ?state, "peers: state changed");
                PeerUpdate::Changed { from, to: state }
            }
        }
    }

    /// Move an existing peer to `state`; returns the previous state
    ///
    /// Unknown addresses are ignored.
    pub fn mark(&self, address: &PeerAddress, state: LinkState) -> Option<LinkState> {
        self.mark_at(address, state, monotonic_now())
    }

    pub(crate) fn mark_at(&self, address: &PeerAddress, state: LinkState, now: Instant) -> Option<LinkState> {
        let mut links = self.links.write();
        let link = links.get_mut(address)?;
        let previous = link.state;
        link.last_seen = now;
        if previous != state {
            apply_state(link, state, now);
            debug!(peer = %address, from = ?previous, to = ?state, "peers: marked");
        }
        Some(previous)
    }

    /// Remove a peer outright (explicit teardown)
    pub fn remove(&self, address: &PeerAddress) -> Option<PeerLink> {
        let removed = self.links.write().remove(address);
        if removed.is_some() {
            debug!(peer = %address, "peers: removed");
        }
        removed
    }

    /// Snapshot of every peer currently `Connected`
    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        self.links
            .read()
            .values()
            .filter(|link| link.state == LinkState::Connected)
            .map(|link| link.address.clone())
            .collect()
    }

    /// Snapshot of every peer with a link up or being established
    pub fn linked_peers(&self) -> Vec<PeerAddress> {
        self.links
            .read()
            .values()
            .filter(|link| matches!(link.state, LinkState::Connecting | LinkState::Connected))
            .map(|link| link.address.clone())
            .collect()
    }

    pub fn get(&self, address: &PeerAddress) -> Option<PeerLink> {
        self.links.read().get(address).cloned()
    }

    pub fn state(&self, address: &PeerAddress) -> Option<LinkState> {
        self.links.read().get(address).map(|link| link.state)
    }

    /// Copy of every tracked link
    pub fn snapshot(&self) -> Vec<PeerLink> {
        self.links.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.read().is_empty()
    }

    /// Drop idle peers the radio has not reported for at least `grace`
    ///
    /// Covers `Disconnected` links as well as `Discovered` entries that never
    /// progressed, so rotating or departed addresses do not accumulate.
    pub fn prune_stale(&self, now: Instant, grace: Duration) -> Vec<PeerAddress> {
        let mut links = self.links.write();
        let stale: Vec<PeerAddress> = links
            .values()
            .filter(|link| {
                matches!(link.state, LinkState::Discovered | LinkState::Disconnected)
                    && now.saturating_duration_since(link.last_seen) >= grace
            })
            .map(|link| link.address.clone())
            .collect();
        for address in &stale {
            links.remove(address);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "peers: pruned stale peers");
        }
        stale
    }
}

fn apply_state(link: &mut PeerLink, state: LinkState, now: Instant) {
    link.state = state;
    link.state_changed_at = now;
    if state == LinkState::Connected {
        link.established_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> PeerAddress {
        PeerAddress::new(s)
    }

    #[test]
    fn test_single_link_per_address() {
        let peers = PeerRegistry::new();
        assert_eq!(peers.upsert(&addr("A"), LinkState::Discovered), PeerUpdate::Inserted);
        assert_eq!(
            peers.upsert(&addr("A"), LinkState::Connecting),
            PeerUpdate::Changed {
                from: LinkState::Discovered,
                to: LinkState::Connecting
            }
        );
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_rediscovery_of_connected_peer_is_refresh() {
        let peers = PeerRegistry::new();
        peers.upsert(&addr("A"), LinkState::Connected);
        let established = peers.get(&addr("A")).unwrap().established_at;

        assert_eq!(peers.upsert(&addr("A"), LinkState::Discovered), PeerUpdate::Refreshed);
        let link = peers.get(&addr("A")).unwrap();
        assert_eq!(link.state, LinkState::Connected);
        assert_eq!(link.established_at, established);
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_rediscovery_of_disconnected_peer_moves_to_discovered() {
        let peers = PeerRegistry::new();
        peers.upsert(&addr("A"), LinkState::Disconnected);
        assert_eq!(
            peers.upsert(&addr("A"), LinkState::Discovered),
            PeerUpdate::Changed {
                from: LinkState::Disconnected,
                to: LinkState::Discovered
            }
        );
    }

    #[test]
    fn test_connected_peers_snapshot() {
        let peers = PeerRegistry::new();
        peers.upsert(&addr("A"), LinkState::Connected);
        peers.upsert(&addr("B"), LinkState::Connected);
        peers.upsert(&addr("C"), LinkState::Connecting);
        peers.upsert(&addr("D"), LinkState::Disconnected);

        let snapshot = peers.connected_peers();
        assert_eq!(snapshot, vec![addr("A"), addr("B")]);

        // Mutations after the snapshot do not affect it
        peers.remove(&addr("A"));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(peers.connected_peers(), vec![addr("B")]);
        assert_eq!(peers.linked_peers(), vec![addr("B"), addr("C")]);
    }

    #[test]
    fn test_mark_ignores_unknown_peer() {
        let peers = PeerRegistry::new();
        assert_eq!(peers.mark(&addr("X"), LinkState::Disconnected), None);
        assert!(peers.is_empty());

        peers.upsert(&addr("A"), LinkState::Connected);
        assert_eq!(peers.mark(&addr("A"), LinkState::Disconnected), Some(LinkState::Connected));
        assert_eq!(peers.state(&addr("A")), Some(LinkState::Disconnected));
    }

    #[test]
    fn test_prune_after_grace_period() {
        let peers = PeerRegistry::new();
        let t0 = Instant::now();
        let grace = Duration::from_secs(30);
        peers.upsert_at(&addr("A"), LinkState::Connected, t0);
        peers.mark_at(&addr("A"), LinkState::Disconnected, t0);
        peers.upsert_at(&addr("B"), LinkState::Connected, t0);

        assert!(peers.prune_stale(t0 + Duration::from_secs(10), grace).is_empty());
        assert_eq!(peers.len(), 2);

        let pruned = peers.prune_stale(t0 + grace, grace);
        assert_eq!(pruned, vec![addr("A")]);
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_reconnect_within_grace_keeps_entry() {
        let peers = PeerRegistry::new();
        let t0 = Instant::now();
        let grace = Duration::from_secs(30);
        peers.upsert_at(&addr("A"), LinkState::Connected, t0);
        peers.mark_at(&addr("A"), LinkState::Disconnected, t0);
        peers.mark_at(&addr("A"), LinkState::Connected, t0 + Duration::from_secs(5));

        assert!(peers.prune_stale(t0 + Duration::from_secs(60), grace).is_empty());
        let link = peers.get(&addr("A")).unwrap();
        assert_eq!(link.established_at, Some(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_prune_drops_unseen_discovered_peer() {
        let peers = PeerRegistry::new();
        let t0 = Instant::now();
        let grace = Duration::from_secs(30);
        peers.upsert_at(&addr("A"), LinkState::Discovered, t0);
        peers.upsert_at(&addr("B"), LinkState::Discovered, t0);
        peers.upsert_at(&addr("B"), LinkState::Discovered, t0 + Duration::from_secs(20));

        let pruned = peers.prune_stale(t0 + grace, grace);
        assert_eq!(pruned, vec![addr("A")]);
        assert_eq!(peers.state(&addr("B")), Some(LinkState::Discovered));
    }

    #[test]
    fn test_prune_keeps_disconnected_peer_still_advertising() {
        let peers = PeerRegistry::new();
        let t0 = Instant::now();
        let grace = Duration::from_secs(30);
        peers.upsert_at(&addr("A"), LinkState::Disconnected, t0);
        assert_eq!(
            peers.upsert_at(&addr("A"), LinkState::Disconnected, t0 + Duration::from_secs(25)),
            PeerUpdate::Refreshed
        );

        assert!(peers.prune_stale(t0 + grace, grace).is_empty());
        assert_eq!(peers.prune_stale(t0 + Duration::from_secs(55), grace), vec![addr("A")]);
    }
}
