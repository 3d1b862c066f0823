//! Alert payload handler
//!
//! Hands one received payload to the relay engine and logs the outcome.
//! Errors stop here: a bad payload from one peer never affects the others.

use tracing::{debug, trace};

use crate::network::relay::{ReceiveOutcome, RelayEngine};
use crate::network::transport::{PeerAddress, RadioTransport};
use crate::protocol::{RelayError, RelayService};

impl<T: RadioTransport> RelayService<T> {
    /// Process a single received payload
    pub(crate) async fn handle_alert_payload(engine: &RelayEngine<T>, peer: &PeerAddress, bytes: &[u8]) {
        match engine.on_received(peer, bytes).await {
            Ok(ReceiveOutcome::Relayed { alert, report }) => {
                trace!(
                    alert = %alert.id().short(),
                    peer = %peer,
                    forwarded = report.delivered.len(),
                    "payload relayed"
                );
            }
            Ok(ReceiveOutcome::Duplicate(id)) => {
                trace!(alert = %id.short(), peer = %peer, "payload was a duplicate");
            }
            Err(RelayError::Decode(e)) => {
                debug!(peer = %peer, error = %e, "payload discarded");
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "payload handling failed");
            }
        }
    }
}
