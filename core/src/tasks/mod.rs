//! Background tasks for the relay service
//!
//! This module contains the long-running background tasks:
//! - Incoming handler (routes transport callbacks; see `handlers/`)
//! - Discovery loop (advertise, scan, connect, retry)
//! - Maintenance loop (dedup eviction, peer pruning)

mod discovery;
mod maintenance;

use tokio::sync::mpsc;
use tracing::info;

use crate::network::discovery::DiscoveryStateMachine;
use crate::network::transport::{RadioTransport, TransportEventReceiver};

use crate::protocol::RelayService;

use discovery::DiscoveryDriver;

impl<T: RadioTransport> RelayService<T> {
    /// Start background tasks (incoming handler, discovery, maintenance)
    pub(crate) fn start_background_tasks(&self, transport_events: TransportEventReceiver) {
        let mut tasks = self.tasks.lock();
        let (discovery_tx, discovery_rx) = mpsc::channel(self.config.event_channel_capacity.max(1));

        // 1. Incoming handler (payloads to the relay engine, the rest to discovery)
        let engine = self.engine.clone();
        let shutdown = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            Self::run_incoming_handler(engine, transport_events, discovery_tx, shutdown).await;
        }));

        // 2. Discovery loop
        let machine = DiscoveryStateMachine::new(
            self.peers.clone(),
            self.config.retry_policy(),
            self.config.unhealthy_after_failures,
        );
        let driver = DiscoveryDriver {
            transport: self.transport.clone(),
            event_tx: self.event_tx.clone(),
            radio_available: self.radio_available.clone(),
            health: self.health.clone(),
            connect_timeout: self.config.connect_timeout(),
            sweep_interval: self.config.maintenance_interval(),
        };
        let shutdown = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            Self::run_discovery_loop(driver, machine, discovery_rx, shutdown).await;
        }));

        // 3. Maintenance loop
        let dedup = self.dedup.clone();
        let peers = self.peers.clone();
        let interval = self.config.maintenance_interval();
        let peer_grace = self.config.peer_grace_period();
        let shutdown = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            Self::run_maintenance_loop(dedup, peers, interval, peer_grace, shutdown).await;
        }));

        info!(count = tasks.len(), "Background tasks started");
    }
}
