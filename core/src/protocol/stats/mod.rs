//! Stats & Monitoring API for the relay service
//!
//! Read-only views of relay state:
//! - stats: counters, cache and peer totals
//! - list_peers: per-peer link details

mod types;

pub use types::{PeerInfo, RelayStats};

use crate::network::peers::LinkState;
use crate::network::relay::RelayCounters;
use crate::network::transport::RadioTransport;

use super::core::RelayService;
use super::types::monotonic_now;

impl<T: RadioTransport> RelayService<T> {
    /// Get relay statistics
    pub fn stats(&self) -> RelayStats {
        let counters = self.engine.counters();
        let links = self.peers.snapshot();
        RelayStats {
            originated: RelayCounters::load(&counters.originated),
            received: RelayCounters::load(&counters.received),
            duplicates: RelayCounters::load(&counters.duplicates),
            malformed: RelayCounters::load(&counters.malformed),
            relayed: RelayCounters::load(&counters.relayed),
            sends_ok: RelayCounters::load(&counters.sends_ok),
            sends_failed: RelayCounters::load(&counters.sends_failed),
            dedup_entries: self.dedup.len(),
            peers_known: links.len(),
            peers_connected: links
                .iter()
                .filter(|link| link.state == LinkState::Connected)
                .count(),
            health: self.health(),
        }
    }

    /// List every tracked peer
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        let now = monotonic_now();
        self.peers
            .snapshot()
            .into_iter()
            .map(|link| PeerInfo {
                address: link.address.to_string(),
                state: link.state,
                connected_secs: (link.state == LinkState::Connected)
                    .then(|| link.established_at)
                    .flatten()
                    .map(|at| now.saturating_duration_since(at).as_secs()),
                last_seen_secs: now.saturating_duration_since(link.last_seen).as_secs(),
            })
            .collect()
    }
}
