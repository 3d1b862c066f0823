//! Stats types for monitoring the relay
//!
//! Plain serializable snapshots; nothing here holds a lock.

use serde::{Deserialize, Serialize};

use crate::network::discovery::HealthStatus;
use crate::network::peers::LinkState;

/// Overall relay statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Alerts composed on this device
    pub originated: u64,
    /// Payloads received from peers (including duplicates and garbage)
    pub received: u64,
    /// Received alerts dropped as already seen
    pub duplicates: u64,
    /// Received payloads that failed to decode
    pub malformed: u64,
    /// Received alerts that were new and forwarded
    pub relayed: u64,
    /// Successful per-peer writes
    pub sends_ok: u64,
    /// Failed per-peer writes
    pub sends_failed: u64,
    /// Alert ids currently remembered
    pub dedup_entries: usize,
    /// Peers tracked by the registry
    pub peers_known: usize,
    /// Peers with a live link
    pub peers_connected: usize,
    /// Latest radio health signal
    pub health: HealthStatus,
}

/// One tracked peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Link-layer address
    pub address: String,
    pub state: LinkState,
    /// Seconds since the link came up (connected peers only)
    pub connected_secs: Option<u64>,
    /// Seconds since the peer was last reported
    pub last_seen_secs: u64,
}
