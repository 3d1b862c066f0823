//! Relay events for the application layer
//!
//! The presentation layer subscribes to these to show alerts and service
//! health. Events are delivered best-effort: a slow or absent consumer never
//! stalls relaying.

use crate::network::discovery::HealthStatus;
use crate::network::peers::LinkState;
use crate::network::transport::PeerAddress;
use crate::protocol::Alert;

/// Events emitted by the relay service
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// An alert composed on this device was accepted and sent out
    AlertOriginated(Alert),
    /// A new alert arrived from a peer (duplicates are not reported)
    AlertReceived(ReceivedAlert),
    /// A peer link came up or went down
    PeerLinkChanged(PeerLinkEvent),
    /// Radio health changed
    HealthChanged(HealthStatus),
}

/// An alert received over the mesh
#[derive(Debug, Clone)]
pub struct ReceivedAlert {
    pub alert: Alert,
    /// The neighbour that delivered it (not necessarily the originator)
    pub from: PeerAddress,
}

/// A peer link transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLinkEvent {
    pub peer: PeerAddress,
    pub state: LinkState,
}
