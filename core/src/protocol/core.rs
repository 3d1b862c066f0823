//! Main relay service
//!
//! Owns the shared relay state and the background tasks. Implementation is
//! split across:
//! - `protocol/` (this module): service struct, start/stop, public methods
//! - `handlers/`: routing of radio callbacks
//! - `tasks/`: discovery driver and maintenance loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::network::discovery::HealthStatus;
use crate::network::peers::{PeerLink, PeerRegistry};
use crate::network::relay::RelayEngine;
use crate::network::transport::{PeerAddress, RadioTransport, TransportEventReceiver};
use crate::resilience::DedupCache;

use super::config::RelayConfig;
use super::error::RelayError;
use super::events::RelayEvent;
use super::types::Alert;

/// How long `stop` waits for each background task before aborting it
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The alert relay service
///
/// Entry point for the host application: submit alerts, subscribe to
/// events, inspect peers and stats.
pub struct RelayService<T: RadioTransport> {
    /// Configuration
    pub(crate) config: RelayConfig,
    /// Radio commands
    pub(crate) transport: Arc<T>,
    /// Flooding logic
    pub(crate) engine: RelayEngine<T>,
    /// Peer links (written by discovery, read by the engine)
    pub(crate) peers: Arc<PeerRegistry>,
    /// Seen alert ids
    pub(crate) dedup: Arc<DedupCache>,
    /// Event sender
    pub(crate) event_tx: mpsc::Sender<RelayEvent>,
    /// Event receiver, handed out once
    event_rx: Arc<RwLock<Option<mpsc::Receiver<RelayEvent>>>>,
    /// Cleared while discovery is suspended on an unavailable radio
    pub(crate) radio_available: Arc<AtomicBool>,
    /// Last health signal from discovery
    pub(crate) health: Arc<RwLock<HealthStatus>>,
    /// Running flag
    running: AtomicBool,
    /// Background tasks
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Shutdown signal
    pub(crate) shutdown: CancellationToken,
}

impl<T: RadioTransport> RelayService<T> {
    /// Start the relay service
    ///
    /// `transport_events` is the receiving half of the channel the transport
    /// pushes its callbacks into (see
    /// [`transport_channel`](crate::network::transport::transport_channel)).
    /// Discovery begins immediately.
    pub async fn start(
        config: RelayConfig,
        transport: Arc<T>,
        transport_events: TransportEventReceiver,
    ) -> Result<Self, RelayError> {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let dedup = Arc::new(DedupCache::with_config(config.dedup_config()));
        let peers = Arc::new(PeerRegistry::new());
        let engine = RelayEngine::new(
            transport.clone(),
            dedup.clone(),
            peers.clone(),
            event_tx.clone(),
            config.send_timeout(),
        );

        let service = Self {
            config,
            transport,
            engine,
            peers,
            dedup,
            event_tx,
            event_rx: Arc::new(RwLock::new(Some(event_rx))),
            radio_available: Arc::new(AtomicBool::new(true)),
            health: Arc::new(RwLock::new(HealthStatus::Healthy)),
            running: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        };

        service.start_background_tasks(transport_events);

        info!(
            dedup_retention_secs = service.config.dedup_retention_secs,
            dedup_capacity = service.config.dedup_capacity,
            "Relay service started"
        );
        Ok(service)
    }

    /// Stop the service
    ///
    /// Cancels discovery, releases every link and waits for the background
    /// tasks to finish. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping relay service...");
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!("background task did not stop in time, aborting");
                task.abort();
            }
        }

        info!("Relay service stopped");
    }

    /// Get the event receiver
    ///
    /// Can only be called once - subsequent calls return None.
    pub fn events(&self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.write().take()
    }

    /// Compose an alert and send it to every connected peer
    ///
    /// The alert gets a fresh id and timestamp. Returns the alert as sent.
    pub async fn submit_alert(
        &self,
        text: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Alert, RelayError> {
        self.check_running()?;
        let alert = Alert::new(text, latitude, longitude)?;
        if !self.radio_available.load(Ordering::SeqCst) {
            return Err(RelayError::TransportUnavailable);
        }
        self.engine.submit_local(alert.clone()).await?;
        Ok(alert)
    }

    /// Copy of every tracked peer link
    pub fn peers(&self) -> Vec<PeerLink> {
        self.peers.snapshot()
    }

    /// Addresses of every currently connected peer
    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        self.peers.connected_peers()
    }

    /// Latest radio health signal
    pub fn health(&self) -> HealthStatus {
        *self.health.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Check if the service is running
    pub(crate) fn check_running(&self) -> Result<(), RelayError> {
        if !self.is_running() {
            return Err(RelayError::NotRunning);
        }
        Ok(())
    }
}
