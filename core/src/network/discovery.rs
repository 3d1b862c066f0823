//! Discovery state machine
//!
//! Drives the advertise/scan cycle that finds nearby devices and brings up
//! links to them. The machine is synchronous and performs no IO: every input
//! returns a list of [`DiscoveryAction`]s for the driver task to execute
//! against the radio, and the driver feeds the results back in.
//!
//! ```text
//! Idle --start--> Discovering (advertise + scan)
//!                   | peer seen      -> Connecting -> Connected
//!                   | link lost      -> Disconnected, keep scanning
//!                   | radio failure  -> retry that sub-operation with backoff
//!                   | radio missing  -> Suspended --backoff--> Discovering
//! any --stop--> Idle
//! ```
//!
//! There is no terminal state. Radio failures are always retried; after
//! enough consecutive failures a [`HealthStatus::Degraded`] signal is raised
//! for the host, and cleared again on the next success.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::peers::{LinkState, PeerRegistry, PeerUpdate};
use super::transport::{PeerAddress, TransportError};

/// Top-level discovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Not running
    Idle,
    /// Advertising and scanning (either may be restarting after a failure)
    Discovering,
    /// Radio unavailable; waiting to restart everything
    Suspended,
}

/// Radio sub-operations that can be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioOp {
    Advertise,
    Scan,
    /// Restart both after the radio was unavailable
    Restart,
}

/// Service health signal surfaced to the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    /// The radio has failed this many times in a row
    Degraded { consecutive_failures: u32 },
}

/// Work the driver must perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryAction {
    StartAdvertising,
    StopAdvertising,
    StartScanning,
    StopScanning,
    Connect(PeerAddress),
    Disconnect(PeerAddress),
    /// Feed [`DiscoveryStateMachine::on_retry_due`] back after `delay`
    RetryAfter { op: RadioOp, delay: Duration },
    /// Report a health change to the host
    Health(HealthStatus),
}

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2x, 4x, ... capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Retry bookkeeping for one operation or peer
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Consecutive failed attempts
    pub attempts: u32,
    /// Earliest time the next attempt is allowed
    not_before: Option<Instant>,
}

impl RetryState {
    pub fn ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| now >= t)
    }

    /// Record a failure; returns the delay before the next attempt
    pub fn record_failure(&mut self, now: Instant, policy: &RetryPolicy) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let delay = policy.delay_for(self.attempts);
        self.not_before = Some(now + delay);
        delay
    }

    pub fn record_success(&mut self) {
        self.attempts = 0;
        self.not_before = None;
    }
}

/// The discovery state machine
///
/// Link state is written to the shared [`PeerRegistry`]; everything else is
/// owned here and touched only by the driver task.
#[derive(Debug)]
pub struct DiscoveryStateMachine {
    state: DiscoveryState,
    peers: Arc<PeerRegistry>,
    policy: RetryPolicy,
    unhealthy_after: u32,
    advertising: bool,
    scanning: bool,
    radio_retries: HashMap<RadioOp, RetryState>,
    restart_pending: bool,
    peer_retries: HashMap<PeerAddress, RetryState>,
    consecutive_failures: u32,
    degraded: bool,
}

impl DiscoveryStateMachine {
    pub fn new(peers: Arc<PeerRegistry>, policy: RetryPolicy, unhealthy_after: u32) -> Self {
        Self {
            state: DiscoveryState::Idle,
            peers,
            policy,
            unhealthy_after: unhealthy_after.max(1),
            advertising: false,
            scanning: false,
            radio_retries: HashMap::new(),
            restart_pending: false,
            peer_retries: HashMap::new(),
            consecutive_failures: 0,
            degraded: false,
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn health(&self) -> HealthStatus {
        if self.degraded {
            HealthStatus::Degraded {
                consecutive_failures: self.consecutive_failures,
            }
        } else {
            HealthStatus::Healthy
        }
    }

    /// Begin advertising and scanning
    pub fn start(&mut self) -> Vec<DiscoveryAction> {
        if self.state == DiscoveryState::Discovering {
            return Vec::new();
        }
        info!("discovery: starting advertise + scan");
        self.state = DiscoveryState::Discovering;
        self.restart_pending = false;
        vec![DiscoveryAction::StartAdvertising, DiscoveryAction::StartScanning]
    }

    /// Stop everything and release every link
    pub fn stop(&mut self) -> Vec<DiscoveryAction> {
        if self.state == DiscoveryState::Idle {
            return Vec::new();
        }
        info!("discovery: stopping");
        self.state = DiscoveryState::Idle;
        self.advertising = false;
        self.scanning = false;
        self.restart_pending = false;
        self.radio_retries.clear();
        self.peer_retries.clear();

        let mut actions = vec![DiscoveryAction::StopAdvertising, DiscoveryAction::StopScanning];
        for peer in self.peers.linked_peers() {
            self.peers.mark(&peer, LinkState::Disconnected);
            actions.push(DiscoveryAction::Disconnect(peer));
        }
        actions
    }

    /// A radio sub-operation started successfully
    pub fn on_radio_started(&mut self, op: RadioOp) -> Vec<DiscoveryAction> {
        if self.state == DiscoveryState::Idle {
            // Completed after a stop; undo it
            return match op {
                RadioOp::Advertise => vec![DiscoveryAction::StopAdvertising],
                RadioOp::Scan => vec![DiscoveryAction::StopScanning],
                RadioOp::Restart => Vec::new(),
            };
        }

        match op {
            RadioOp::Advertise => self.advertising = true,
            RadioOp::Scan => self.scanning = true,
            RadioOp::Restart => {}
        }
        debug!(?op, "discovery: radio operation started");
        self.radio_retries.remove(&op);
        self.radio_retries.remove(&RadioOp::Restart);
        self.consecutive_failures = 0;

        if self.degraded {
            self.degraded = false;
            info!("discovery: radio recovered");
            vec![DiscoveryAction::Health(HealthStatus::Healthy)]
        } else {
            Vec::new()
        }
    }

    /// A radio sub-operation failed to start, or stopped with an error
    pub fn on_radio_failed(
        &mut self,
        op: RadioOp,
        error: &TransportError,
        now: Instant,
    ) -> Vec<DiscoveryAction> {
        if self.state == DiscoveryState::Idle {
            return Vec::new();
        }

        match op {
            RadioOp::Advertise => self.advertising = false,
            RadioOp::Scan => self.scanning = false,
            RadioOp::Restart => {}
        }

        let mut actions = Vec::new();
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if *error == TransportError::Unavailable || op == RadioOp::Restart {
            self.state = DiscoveryState::Suspended;
            self.advertising = false;
            self.scanning = false;
            if !self.restart_pending {
                self.restart_pending = true;
                let delay = self
                    .radio_retries
                    .entry(RadioOp::Restart)
                    .or_default()
                    .record_failure(now, &self.policy);
                warn!(?op, %error, delay_ms = delay.as_millis() as u64, "discovery: radio unavailable, suspending");
                actions.push(DiscoveryAction::RetryAfter {
                    op: RadioOp::Restart,
                    delay,
                });
            }
        } else {
            let delay = self
                .radio_retries
                .entry(op)
                .or_default()
                .record_failure(now, &self.policy);
            warn!(?op, %error, delay_ms = delay.as_millis() as u64, "discovery: radio operation failed, retrying");
            actions.push(DiscoveryAction::RetryAfter { op, delay });
        }

        if self.consecutive_failures >= self.unhealthy_after && !self.degraded {
            self.degraded = true;
            warn!(
                failures = self.consecutive_failures,
                "discovery: radio persistently failing"
            );
            actions.push(DiscoveryAction::Health(HealthStatus::Degraded {
                consecutive_failures: self.consecutive_failures,
            }));
        }
        actions
    }

    /// A scheduled retry has come due
    pub fn on_retry_due(&mut self, op: RadioOp) -> Vec<DiscoveryAction> {
        match (self.state, op) {
            (DiscoveryState::Suspended, RadioOp::Restart) => {
                debug!("discovery: restarting after suspension");
                self.state = DiscoveryState::Discovering;
                self.restart_pending = false;
                vec![DiscoveryAction::StartAdvertising, DiscoveryAction::StartScanning]
            }
            (DiscoveryState::Discovering, RadioOp::Advertise) if !self.advertising => {
                vec![DiscoveryAction::StartAdvertising]
            }
            (DiscoveryState::Discovering, RadioOp::Scan) if !self.scanning => {
                vec![DiscoveryAction::StartScanning]
            }
            _ => Vec::new(),
        }
    }

    /// A scan reported a peer advertisement
    pub fn on_peer_discovered(&mut self, peer: &PeerAddress, now: Instant) -> Vec<DiscoveryAction> {
        if self.state != DiscoveryState::Discovering {
            return Vec::new();
        }

        let backing_off = self
            .peer_retries
            .get(peer)
            .is_some_and(|retry| !retry.ready(now));
        if backing_off {
            // Stays Disconnected so maintenance can prune it once it goes quiet
            self.peers.upsert(peer, LinkState::Disconnected);
            trace!(%peer, "discovery: peer in connect backoff");
            return Vec::new();
        }

        if self.peers.upsert(peer, LinkState::Discovered) == PeerUpdate::Refreshed
            && matches!(
                self.peers.state(peer),
                Some(LinkState::Connecting | LinkState::Connected)
            )
        {
            return Vec::new();
        }

        self.peers.upsert(peer, LinkState::Connecting);
        debug!(%peer, "discovery: connecting to peer");
        vec![DiscoveryAction::Connect(peer.clone())]
    }

    /// Outcome of a [`DiscoveryAction::Connect`]
    pub fn on_connect_result(
        &mut self,
        peer: &PeerAddress,
        result: Result<(), TransportError>,
        now: Instant,
    ) -> Vec<DiscoveryAction> {
        match result {
            Ok(()) if self.state == DiscoveryState::Idle => {
                vec![DiscoveryAction::Disconnect(peer.clone())]
            }
            Ok(()) => {
                self.peers.upsert(peer, LinkState::Connected);
                self.peer_retries.remove(peer);
                info!(%peer, "discovery: peer connected");
                Vec::new()
            }
            Err(error) => {
                self.peers.upsert(peer, LinkState::Disconnected);
                let delay = self
                    .peer_retries
                    .entry(peer.clone())
                    .or_default()
                    .record_failure(now, &self.policy);
                warn!(
                    %peer,
                    %error,
                    retry_in_ms = delay.as_millis() as u64,
                    "discovery: connect failed"
                );
                Vec::new()
            }
        }
    }

    /// The radio reported a link state change
    ///
    /// Covers links the remote side initiated as well as link loss.
    pub fn on_link_state_changed(&mut self, peer: &PeerAddress, state: LinkState) -> Vec<DiscoveryAction> {
        match state {
            LinkState::Connected if self.state == DiscoveryState::Idle => {
                vec![DiscoveryAction::Disconnect(peer.clone())]
            }
            LinkState::Connected => {
                self.peers.upsert(peer, LinkState::Connected);
                self.peer_retries.remove(peer);
                info!(%peer, "discovery: link up");
                Vec::new()
            }
            LinkState::Disconnected => {
                if self.peers.mark(peer, LinkState::Disconnected).is_some() {
                    info!(%peer, "discovery: link lost");
                }
                // A fresh advertisement may reconnect right away
                self.peer_retries.remove(peer);
                Vec::new()
            }
            other => {
                self.peers.upsert(peer, other);
                Vec::new()
            }
        }
    }

    /// Forget retry state for peers the registry has pruned
    pub fn retain_known_peers(&mut self) -> usize {
        let before = self.peer_retries.len();
        let peers = &self.peers;
        self.peer_retries.retain(|addr, _| peers.get(addr).is_some());
        before - self.peer_retries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }

    fn machine() -> (DiscoveryStateMachine, Arc<PeerRegistry>) {
        let peers = Arc::new(PeerRegistry::new());
        (DiscoveryStateMachine::new(peers.clone(), policy(), 3), peers)
    }

    fn started() -> (DiscoveryStateMachine, Arc<PeerRegistry>) {
        let (mut m, peers) = machine();
        m.start();
        m.on_radio_started(RadioOp::Advertise);
        m.on_radio_started(RadioOp::Scan);
        (m, peers)
    }

    fn addr(s: &str) -> PeerAddress {
        PeerAddress::new(s)
    }

    #[test]
    fn test_retry_policy_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(40), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_state_gates_attempts() {
        let p = policy();
        let t0 = Instant::now();
        let mut retry = RetryState::default();
        assert!(retry.ready(t0));

        assert_eq!(retry.record_failure(t0, &p), Duration::from_secs(1));
        assert!(!retry.ready(t0));
        assert!(retry.ready(t0 + Duration::from_secs(1)));

        retry.record_success();
        assert_eq!(retry.attempts, 0);
        assert!(retry.ready(t0));
    }

    #[test]
    fn test_start_advertises_and_scans_together() {
        let (mut m, _) = machine();
        assert_eq!(m.state(), DiscoveryState::Idle);
        assert_eq!(
            m.start(),
            vec![DiscoveryAction::StartAdvertising, DiscoveryAction::StartScanning]
        );
        assert_eq!(m.state(), DiscoveryState::Discovering);
        // Idempotent
        assert!(m.start().is_empty());

        m.on_radio_started(RadioOp::Advertise);
        m.on_radio_started(RadioOp::Scan);
        assert!(m.is_advertising());
        assert!(m.is_scanning());
    }

    #[test]
    fn test_discovered_peer_connects_once() {
        let (mut m, peers) = started();
        let now = Instant::now();
        let a = addr("A");

        assert_eq!(m.on_peer_discovered(&a, now), vec![DiscoveryAction::Connect(a.clone())]);
        assert_eq!(peers.state(&a), Some(LinkState::Connecting));

        // Repeated scan results while connecting do not re-dial
        assert!(m.on_peer_discovered(&a, now).is_empty());

        m.on_connect_result(&a, Ok(()), now);
        assert_eq!(peers.state(&a), Some(LinkState::Connected));
        assert!(m.on_peer_discovered(&a, now).is_empty());
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_connect_failure_backs_off_per_peer() {
        let (mut m, peers) = started();
        let t0 = Instant::now();
        let a = addr("A");

        m.on_peer_discovered(&a, t0);
        m.on_connect_result(&a, Err(TransportError::Timeout), t0);
        assert_eq!(peers.state(&a), Some(LinkState::Disconnected));

        // Within backoff: ignored
        assert!(m.on_peer_discovered(&a, t0 + Duration::from_millis(500)).is_empty());
        // Other peers unaffected
        assert_eq!(
            m.on_peer_discovered(&addr("B"), t0),
            vec![DiscoveryAction::Connect(addr("B"))]
        );
        // After backoff: retried
        assert_eq!(
            m.on_peer_discovered(&a, t0 + Duration::from_secs(1)),
            vec![DiscoveryAction::Connect(a.clone())]
        );

        // Second failure doubles the wait
        m.on_connect_result(&a, Err(TransportError::Timeout), t0 + Duration::from_secs(1));
        assert!(m.on_peer_discovered(&a, t0 + Duration::from_secs(2)).is_empty());
        assert_eq!(
            m.on_peer_discovered(&a, t0 + Duration::from_secs(3)),
            vec![DiscoveryAction::Connect(a)]
        );
    }

    #[test]
    fn test_rescan_during_backoff_leaves_peer_prunable() {
        let (mut m, peers) = started();
        let t0 = Instant::now();
        let a = addr("A");

        m.on_peer_discovered(&a, t0);
        m.on_connect_result(&a, Err(TransportError::Timeout), t0);
        assert!(m.on_peer_discovered(&a, t0 + Duration::from_millis(100)).is_empty());
        assert_eq!(peers.state(&a), Some(LinkState::Disconnected));

        // The peer leaves range; nothing pins it in the registry
        let later = Instant::now() + Duration::from_secs(24 * 3600);
        assert_eq!(peers.prune_stale(later, Duration::from_secs(30)), vec![a.clone()]);
        assert!(peers.is_empty());
        assert_eq!(m.retain_known_peers(), 1);
    }

    #[test]
    fn test_radio_failure_retries_only_that_operation() {
        let (mut m, _) = started();
        let now = Instant::now();

        let actions = m.on_radio_failed(RadioOp::Scan, &TransportError::Busy, now);
        assert_eq!(
            actions,
            vec![DiscoveryAction::RetryAfter {
                op: RadioOp::Scan,
                delay: Duration::from_secs(1)
            }]
        );
        assert!(m.is_advertising());
        assert!(!m.is_scanning());
        assert_eq!(m.state(), DiscoveryState::Discovering);

        assert_eq!(m.on_retry_due(RadioOp::Scan), vec![DiscoveryAction::StartScanning]);
        assert!(m.on_retry_due(RadioOp::Advertise).is_empty());
    }

    #[test]
    fn test_unavailable_suspends_and_restarts() {
        let (mut m, _) = machine();
        let now = Instant::now();
        m.start();

        let actions = m.on_radio_failed(RadioOp::Advertise, &TransportError::Unavailable, now);
        assert_eq!(
            actions,
            vec![DiscoveryAction::RetryAfter {
                op: RadioOp::Restart,
                delay: Duration::from_secs(1)
            }]
        );
        assert_eq!(m.state(), DiscoveryState::Suspended);

        // The concurrent scan start fails too; only one restart is scheduled
        assert!(m
            .on_radio_failed(RadioOp::Scan, &TransportError::Unavailable, now)
            .is_empty());

        // Scan results while suspended are ignored
        assert!(m.on_peer_discovered(&addr("A"), now).is_empty());

        assert_eq!(
            m.on_retry_due(RadioOp::Restart),
            vec![DiscoveryAction::StartAdvertising, DiscoveryAction::StartScanning]
        );
        assert_eq!(m.state(), DiscoveryState::Discovering);
    }

    #[test]
    fn test_persistent_failure_raises_health_signal_once() {
        let (mut m, _) = started();
        let now = Instant::now();

        m.on_radio_failed(RadioOp::Advertise, &TransportError::Busy, now);
        m.on_radio_failed(RadioOp::Advertise, &TransportError::Busy, now);
        let actions = m.on_radio_failed(RadioOp::Advertise, &TransportError::Busy, now);
        assert!(actions.contains(&DiscoveryAction::Health(HealthStatus::Degraded {
            consecutive_failures: 3
        })));
        assert!(matches!(m.health(), HealthStatus::Degraded { .. }));

        let actions = m.on_radio_failed(RadioOp::Advertise, &TransportError::Busy, now);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, DiscoveryAction::Health(_))));
        // Backoff keeps growing to the cap
        assert!(actions.contains(&DiscoveryAction::RetryAfter {
            op: RadioOp::Advertise,
            delay: Duration::from_secs(8)
        }));

        assert_eq!(
            m.on_radio_started(RadioOp::Advertise),
            vec![DiscoveryAction::Health(HealthStatus::Healthy)]
        );
        assert_eq!(m.health(), HealthStatus::Healthy);
    }

    #[test]
    fn test_link_loss_marks_disconnected_and_allows_reconnect() {
        let (mut m, peers) = started();
        let now = Instant::now();
        let a = addr("A");

        m.on_peer_discovered(&a, now);
        m.on_connect_result(&a, Ok(()), now);
        m.on_link_state_changed(&a, LinkState::Disconnected);
        assert_eq!(peers.state(&a), Some(LinkState::Disconnected));

        assert_eq!(m.on_peer_discovered(&a, now), vec![DiscoveryAction::Connect(a)]);
    }

    #[test]
    fn test_inbound_link_registers_connected() {
        let (mut m, peers) = started();
        let b = addr("B");
        assert!(m.on_link_state_changed(&b, LinkState::Connected).is_empty());
        assert_eq!(peers.connected_peers(), vec![b]);
    }

    #[test]
    fn test_stop_releases_links() {
        let (mut m, peers) = started();
        let now = Instant::now();
        m.on_peer_discovered(&addr("A"), now);
        m.on_connect_result(&addr("A"), Ok(()), now);
        m.on_peer_discovered(&addr("B"), now);

        let actions = m.stop();
        assert_eq!(
            actions,
            vec![
                DiscoveryAction::StopAdvertising,
                DiscoveryAction::StopScanning,
                DiscoveryAction::Disconnect(addr("A")),
                DiscoveryAction::Disconnect(addr("B")),
            ]
        );
        assert_eq!(m.state(), DiscoveryState::Idle);
        assert!(peers.connected_peers().is_empty());
        assert!(m.stop().is_empty());
    }

    #[test]
    fn test_retry_state_dropped_for_pruned_peers() {
        let (mut m, peers) = started();
        let t0 = Instant::now();
        let a = addr("A");
        m.on_peer_discovered(&a, t0);
        m.on_connect_result(&a, Err(TransportError::Timeout), t0);

        assert_eq!(m.retain_known_peers(), 0);
        peers.remove(&a);
        assert_eq!(m.retain_known_peers(), 1);
        // No backoff left for a peer seen afresh
        assert_eq!(m.on_peer_discovered(&a, t0), vec![DiscoveryAction::Connect(a)]);
    }

    #[test]
    fn test_late_completions_after_stop_are_undone() {
        let (mut m, _) = machine();
        m.start();
        m.stop();
        assert_eq!(
            m.on_radio_started(RadioOp::Scan),
            vec![DiscoveryAction::StopScanning]
        );
        assert_eq!(
            m.on_connect_result(&addr("A"), Ok(()), Instant::now()),
            vec![DiscoveryAction::Disconnect(addr("A"))]
        );
        assert!(m.on_retry_due(RadioOp::Restart).is_empty());
    }
}
