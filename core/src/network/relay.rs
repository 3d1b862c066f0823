//! Relay engine
//!
//! Store-and-forward flooding. A locally composed alert is recorded in the
//! dedup cache and written to every connected peer. A received alert is
//! decoded, checked against the dedup cache and, if new, surfaced to the
//! presentation layer and forwarded byte-for-byte to every connected peer
//! except the one it came from.
//!
//! The dedup check-and-record is atomic, so each device forwards a given
//! alert at most once per retention window; that bounds the flood to at
//! most one transmission per (device, link) pair and guarantees termination
//! on any topology, cyclic or not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::codec;
use super::peers::{LinkState, PeerRegistry};
use super::transport::{PeerAddress, RadioTransport, TransportError};
use crate::protocol::{monotonic_now, Alert, AlertId, ReceivedAlert, RelayError, RelayEvent};
use crate::resilience::DedupCache;

/// Result of writing one alert to a set of peers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    pub delivered: Vec<PeerAddress>,
    pub failed: Vec<(PeerAddress, TransportError)>,
}

impl FanOutReport {
    /// Number of peers a send was attempted to
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// What happened to a received payload
#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    /// New alert; surfaced and forwarded
    Relayed { alert: Alert, report: FanOutReport },
    /// Already seen; dropped
    Duplicate(AlertId),
}

/// Running totals kept by the engine
#[derive(Debug, Default)]
pub struct RelayCounters {
    pub originated: AtomicU64,
    pub received: AtomicU64,
    pub duplicates: AtomicU64,
    pub malformed: AtomicU64,
    pub relayed: AtomicU64,
    pub sends_ok: AtomicU64,
    pub sends_failed: AtomicU64,
}

impl RelayCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// The relay engine, shared by every task that handles alerts
pub struct RelayEngine<T: RadioTransport> {
    transport: Arc<T>,
    dedup: Arc<DedupCache>,
    peers: Arc<PeerRegistry>,
    event_tx: mpsc::Sender<RelayEvent>,
    counters: Arc<RelayCounters>,
    send_timeout: Duration,
}

impl<T: RadioTransport> Clone for RelayEngine<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            dedup: self.dedup.clone(),
            peers: self.peers.clone(),
            event_tx: self.event_tx.clone(),
            counters: self.counters.clone(),
            send_timeout: self.send_timeout,
        }
    }
}

impl<T: RadioTransport> RelayEngine<T> {
    pub fn new(
        transport: Arc<T>,
        dedup: Arc<DedupCache>,
        peers: Arc<PeerRegistry>,
        event_tx: mpsc::Sender<RelayEvent>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            dedup,
            peers,
            event_tx,
            counters: Arc::new(RelayCounters::default()),
            send_timeout,
        }
    }

    pub fn counters(&self) -> &RelayCounters {
        &self.counters
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Send a locally composed alert to every connected peer
    ///
    /// Records the id first so the alert is never re-forwarded when it
    /// echoes back from the mesh.
    pub async fn submit_local(&self, alert: Alert) -> Result<FanOutReport, RelayError> {
        if !self.dedup.observe(alert.id(), monotonic_now()) {
            debug!(alert = %alert.id().short(), "relay: local alert already seen");
            return Err(RelayError::AlreadySeen(alert.id()));
        }
        RelayCounters::bump(&self.counters.originated, 1);

        let bytes = codec::encode(&alert);
        let report = self.fan_out(alert.id(), &bytes, None).await;
        info!(
            alert = %alert.id().short(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "relay: originated alert"
        );

        self.emit(RelayEvent::AlertOriginated(alert));
        Ok(report)
    }

    /// Handle a payload received from `from`
    pub async fn on_received(&self, from: &PeerAddress, bytes: &[u8]) -> Result<ReceiveOutcome, RelayError> {
        RelayCounters::bump(&self.counters.received, 1);

        let alert = match codec::decode(bytes) {
            Ok(alert) => alert,
            Err(e) => {
                RelayCounters::bump(&self.counters.malformed, 1);
                warn!(peer = %from, len = bytes.len(), error = %e, "relay: dropping undecodable payload");
                return Err(RelayError::Decode(e));
            }
        };

        let id = alert.id();
        if !self.dedup.observe(id, monotonic_now()) {
            RelayCounters::bump(&self.counters.duplicates, 1);
            trace!(alert = %id.short(), peer = %from, "relay: duplicate dropped");
            return Ok(ReceiveOutcome::Duplicate(id));
        }

        info!(alert = %id.short(), peer = %from, "relay: new alert");
        self.emit(RelayEvent::AlertReceived(ReceivedAlert {
            alert: alert.clone(),
            from: from.clone(),
        }));

        // Forward the exact received bytes
        let report = self.fan_out(id, bytes, Some(from)).await;
        RelayCounters::bump(&self.counters.relayed, 1);
        debug!(
            alert = %id.short(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "relay: forwarded"
        );

        Ok(ReceiveOutcome::Relayed { alert, report })
    }

    /// Connected peers an alert goes to, excluding the sender
    pub fn fan_out_targets(&self, exclude: Option<&PeerAddress>) -> Vec<PeerAddress> {
        let mut targets = self.peers.connected_peers();
        if let Some(exclude) = exclude {
            targets.retain(|peer| peer != exclude);
        }
        targets
    }

    async fn fan_out(&self, id: AlertId, bytes: &[u8], exclude: Option<&PeerAddress>) -> FanOutReport {
        let targets = self.fan_out_targets(exclude);
        if targets.is_empty() {
            trace!(alert = %id.short(), "relay: no peers to send to");
            return FanOutReport::default();
        }

        let transport = &self.transport;
        let send_timeout = self.send_timeout;
        let sends = targets.into_iter().map(|peer| async move {
            let result = match tokio::time::timeout(send_timeout, transport.send(&peer, bytes)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            (peer, result)
        });

        let mut report = FanOutReport::default();
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(peer),
                Err(reason) => {
                    if reason == TransportError::NotConnected
                        && self.peers.mark(&peer, LinkState::Disconnected).is_some()
                    {
                        debug!(error = %RelayError::ConnectionLost(peer.clone()), "relay: link gone");
                    }
                    let err = RelayError::SendFailure {
                        peer: peer.clone(),
                        reason: reason.clone(),
                    };
                    warn!(alert = %id.short(), error = %err, "relay: send failed");
                    report.failed.push((peer, reason));
                }
            }
        }

        RelayCounters::bump(&self.counters.sends_ok, report.delivered.len() as u64);
        RelayCounters::bump(&self.counters.sends_failed, report.failed.len() as u64);
        report
    }

    fn emit(&self, event: RelayEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            trace!(error = %e, "relay: event not delivered to presentation layer");
        }
    }
}
