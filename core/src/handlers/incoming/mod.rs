//! Incoming transport event handler
//!
//! Drains the transport callback channel. Routes by event kind:
//! - BytesReceived: alert payloads, handled on their own task
//! - everything else: discovery inputs, forwarded to the discovery driver

mod alert;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::network::relay::RelayEngine;
use crate::network::transport::{RadioTransport, TransportEvent, TransportEventReceiver};

use crate::protocol::RelayService;

impl<T: RadioTransport> RelayService<T> {
    /// Run the incoming event handler
    ///
    /// Receiving is never blocked on relaying: each payload is processed on
    /// a spawned task so the transport's callback channel keeps draining.
    pub(crate) async fn run_incoming_handler(
        engine: RelayEngine<T>,
        mut transport_events: TransportEventReceiver,
        discovery_tx: mpsc::Sender<TransportEvent>,
        shutdown: CancellationToken,
    ) {
        info!("Incoming handler started");
        let mut payloads = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = payloads.join_next() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "alert payload task panicked");
                        }
                    }
                }
                event = transport_events.recv() => {
                    let Some(event) = event else {
                        // Transport dropped its sender
                        debug!("transport event channel closed");
                        break;
                    };

                    match event {
                        TransportEvent::BytesReceived { peer, bytes } => {
                            trace!(peer = %peer, len = bytes.len(), "payload received");
                            let engine = engine.clone();
                            payloads.spawn(async move {
                                Self::handle_alert_payload(&engine, &peer, &bytes).await;
                            });
                        }
                        other => {
                            if discovery_tx.send(other).await.is_err() {
                                debug!("discovery driver gone");
                                break;
                            }
                        }
                    }
                }
            }
        }

        // In-flight payloads finish relaying before the handler exits
        while payloads.join_next().await.is_some() {}
        info!("Incoming handler stopped");
    }
}
