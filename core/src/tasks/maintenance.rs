//! Maintenance tasks
//!
//! Periodic eviction of expired dedup entries and pruning of peers that have
//! stayed disconnected past the grace period.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::network::peers::PeerRegistry;
use crate::network::transport::{PeerAddress, RadioTransport};
use crate::protocol::{monotonic_now, RelayService};
use crate::resilience::DedupCache;

/// What one maintenance pass removed
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct MaintenanceReport {
    pub evicted_alerts: usize,
    pub pruned_peers: Vec<PeerAddress>,
}

/// Run one maintenance pass at `now`
pub(crate) fn run_maintenance_pass(
    dedup: &DedupCache,
    peers: &PeerRegistry,
    now: Instant,
    peer_grace: Duration,
) -> MaintenanceReport {
    MaintenanceReport {
        evicted_alerts: dedup.evict(now),
        pruned_peers: peers.prune_stale(now, peer_grace),
    }
}

impl<T: RadioTransport> RelayService<T> {
    /// Run the maintenance loop until shutdown
    pub(crate) async fn run_maintenance_loop(
        dedup: Arc<DedupCache>,
        peers: Arc<PeerRegistry>,
        interval: Duration,
        peer_grace: Duration,
        shutdown: CancellationToken,
    ) {
        info!(interval_secs = interval.as_secs(), "Maintenance loop started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = run_maintenance_pass(&dedup, &peers, monotonic_now(), peer_grace);
            if report.evicted_alerts > 0 || !report.pruned_peers.is_empty() {
                debug!(
                    evicted_alerts = report.evicted_alerts,
                    pruned_peers = report.pruned_peers.len(),
                    "Maintenance: cleaned up"
                );
            } else {
                trace!("Maintenance: nothing to clean");
            }
        }

        info!("Maintenance loop stopped");
    }
}
