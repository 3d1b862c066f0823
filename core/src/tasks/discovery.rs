//! Discovery driver
//!
//! Owns the [`DiscoveryStateMachine`] and performs its actions against the
//! radio. Every radio command and backoff timer runs as a task in a
//! `JoinSet` whose output feeds straight back into the machine, so the
//! machine itself never awaits. On shutdown the in-flight set is aborted
//! before advertising, scanning and every link are torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::network::discovery::{
    DiscoveryAction, DiscoveryState, DiscoveryStateMachine, HealthStatus, RadioOp,
};
use crate::network::peers::LinkState;
use crate::network::transport::{PeerAddress, RadioTransport, TransportError, TransportEvent};
use crate::protocol::{monotonic_now, PeerLinkEvent, RelayEvent, RelayService};

/// Result of one in-flight discovery task
#[derive(Debug)]
enum Completion {
    Radio(RadioOp, Result<(), TransportError>),
    Connect(PeerAddress, Result<(), TransportError>),
    RetryDue(RadioOp),
    Released,
}

/// Shared handles the driver writes to
pub(crate) struct DiscoveryDriver<T: RadioTransport> {
    pub transport: Arc<T>,
    pub event_tx: mpsc::Sender<RelayEvent>,
    pub radio_available: Arc<AtomicBool>,
    pub health: Arc<RwLock<HealthStatus>>,
    pub connect_timeout: Duration,
    pub sweep_interval: Duration,
}

impl<T: RadioTransport> DiscoveryDriver<T> {
    fn emit(&self, event: RelayEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            trace!(error = %e, "discovery: event not delivered to presentation layer");
        }
    }

    fn emit_link(&self, peer: &PeerAddress, state: LinkState) {
        self.emit(RelayEvent::PeerLinkChanged(PeerLinkEvent {
            peer: peer.clone(),
            state,
        }));
    }

    /// Start every action as a task; the results arrive through `in_flight`
    fn execute(&self, actions: Vec<DiscoveryAction>, in_flight: &mut JoinSet<Completion>) {
        for action in actions {
            let transport = self.transport.clone();
            match action {
                DiscoveryAction::StartAdvertising => {
                    in_flight.spawn(async move {
                        Completion::Radio(RadioOp::Advertise, transport.start_advertising().await)
                    });
                }
                DiscoveryAction::StartScanning => {
                    in_flight.spawn(async move {
                        Completion::Radio(RadioOp::Scan, transport.start_scanning().await)
                    });
                }
                DiscoveryAction::StopAdvertising => {
                    in_flight.spawn(async move {
                        transport.stop_advertising().await;
                        Completion::Released
                    });
                }
                DiscoveryAction::StopScanning => {
                    in_flight.spawn(async move {
                        transport.stop_scanning().await;
                        Completion::Released
                    });
                }
                DiscoveryAction::Connect(peer) => {
                    let timeout = self.connect_timeout;
                    in_flight.spawn(async move {
                        let result = match tokio::time::timeout(timeout, transport.connect(&peer)).await {
                            Ok(result) => result,
                            Err(_) => Err(TransportError::Timeout),
                        };
                        Completion::Connect(peer, result)
                    });
                }
                DiscoveryAction::Disconnect(peer) => {
                    in_flight.spawn(async move {
                        transport.disconnect(&peer).await;
                        Completion::Released
                    });
                }
                DiscoveryAction::RetryAfter { op, delay } => {
                    in_flight.spawn(async move {
                        tokio::time::sleep(delay).await;
                        Completion::RetryDue(op)
                    });
                }
                DiscoveryAction::Health(status) => {
                    *self.health.write() = status;
                    self.emit(RelayEvent::HealthChanged(status));
                }
            }
        }
    }

    /// Perform teardown actions inline, waiting for each
    async fn release(&self, actions: Vec<DiscoveryAction>) {
        for action in actions {
            match action {
                DiscoveryAction::StopAdvertising => self.transport.stop_advertising().await,
                DiscoveryAction::StopScanning => self.transport.stop_scanning().await,
                DiscoveryAction::Disconnect(peer) => {
                    self.transport.disconnect(&peer).await;
                    self.emit_link(&peer, LinkState::Disconnected);
                }
                other => debug!(action = ?other, "discovery: ignoring action during shutdown"),
            }
        }
    }
}

impl<T: RadioTransport> RelayService<T> {
    /// Run the discovery loop until shutdown
    ///
    /// `inputs` carries every transport event except received payloads.
    pub(crate) async fn run_discovery_loop(
        driver: DiscoveryDriver<T>,
        mut machine: DiscoveryStateMachine,
        mut inputs: mpsc::Receiver<TransportEvent>,
        shutdown: CancellationToken,
    ) {
        info!("Discovery loop started");

        let mut in_flight: JoinSet<Completion> = JoinSet::new();
        let mut sweep = tokio::time::interval(driver.sweep_interval);
        sweep.tick().await;

        driver.execute(machine.start(), &mut in_flight);

        loop {
            let actions = tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = inputs.recv() => {
                    let now = monotonic_now();
                    match event {
                        TransportEvent::PeerDiscovered(peer) => machine.on_peer_discovered(&peer, now),
                        TransportEvent::LinkStateChanged { peer, state } => {
                            if matches!(state, LinkState::Connected | LinkState::Disconnected) {
                                driver.emit_link(&peer, state);
                            }
                            machine.on_link_state_changed(&peer, state)
                        }
                        TransportEvent::AdvertiseFailed(e) => {
                            machine.on_radio_failed(RadioOp::Advertise, &e, now)
                        }
                        TransportEvent::ScanFailed(e) => machine.on_radio_failed(RadioOp::Scan, &e, now),
                        TransportEvent::BytesReceived { .. } => Vec::new(),
                    }
                }
                Some(joined) = in_flight.join_next() => {
                    let now = monotonic_now();
                    match joined {
                        Ok(Completion::Radio(op, Ok(()))) => machine.on_radio_started(op),
                        Ok(Completion::Radio(op, Err(e))) => machine.on_radio_failed(op, &e, now),
                        Ok(Completion::Connect(peer, result)) => {
                            let connected = result.is_ok() && machine.state() != DiscoveryState::Idle;
                            let actions = machine.on_connect_result(&peer, result, now);
                            if connected {
                                driver.emit_link(&peer, LinkState::Connected);
                            }
                            actions
                        }
                        Ok(Completion::RetryDue(op)) => machine.on_retry_due(op),
                        Ok(Completion::Released) => Vec::new(),
                        Err(e) => {
                            if e.is_panic() {
                                warn!(error = %e, "discovery task panicked");
                            }
                            Vec::new()
                        }
                    }
                }
                _ = sweep.tick() => {
                    let forgotten = machine.retain_known_peers();
                    if forgotten > 0 {
                        debug!(forgotten, "discovery: dropped retry state for pruned peers");
                    }
                    Vec::new()
                }
            };

            driver
                .radio_available
                .store(machine.state() != DiscoveryState::Suspended, Ordering::SeqCst);
            driver.execute(actions, &mut in_flight);
        }

        // Cancel pending radio commands and timers, then release everything
        in_flight.shutdown().await;
        driver.release(machine.stop()).await;

        info!("Discovery loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;

    fn driver(event_tx: mpsc::Sender<RelayEvent>) -> DiscoveryDriver<MemoryTransport> {
        DiscoveryDriver {
            transport: Arc::new(MemoryTransport::new("local")),
            event_tx,
            radio_available: Arc::new(AtomicBool::new(true)),
            health: Arc::new(RwLock::new(HealthStatus::Healthy)),
            connect_timeout: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_full_event_channel_still_updates_health() {
        let (event_tx, mut event_rx) = mpsc::channel(1);
        let driver = driver(event_tx);
        let mut in_flight = JoinSet::new();

        let degraded = HealthStatus::Degraded { consecutive_failures: 5 };
        driver.execute(
            vec![
                DiscoveryAction::Health(degraded),
                DiscoveryAction::Health(HealthStatus::Healthy),
                DiscoveryAction::Health(degraded),
            ],
            &mut in_flight,
        );

        // Only the first event fit; the rest were dropped without blocking
        assert!(matches!(event_rx.try_recv(), Ok(RelayEvent::HealthChanged(s)) if s == degraded));
        assert!(event_rx.try_recv().is_err());
        assert_eq!(*driver.health.read(), degraded);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_release_reports_dropped_links() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let driver = driver(event_tx);
        let peer = PeerAddress::new("A");

        driver
            .release(vec![
                DiscoveryAction::StopScanning,
                DiscoveryAction::Disconnect(peer.clone()),
            ])
            .await;

        match event_rx.try_recv() {
            Ok(RelayEvent::PeerLinkChanged(event)) => {
                assert_eq!(event.peer, peer);
                assert_eq!(event.state, LinkState::Disconnected);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
