//! Test network - simulates a mesh of relay devices
//!
//! Each device gets its own relay engine over a [`MemoryTransport`]; every
//! transport writes to one shared [`Air`] queue and the network delivers
//! queued frames to their addressees until the air is quiet. Delivery is
//! sequential and deterministic, which makes flood behaviour easy to assert.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::debug;

use super::transport::{Air, MemoryTransport};
use crate::network::peers::{LinkState, PeerRegistry};
use crate::network::relay::RelayEngine;
use crate::network::transport::PeerAddress;
use crate::protocol::{Alert, AlertId, RelayConfig, RelayError, RelayEvent};
use crate::resilience::DedupCache;

/// Upper bound on deliveries per `run_until_quiet`, far above any flood
const MAX_DELIVERIES: usize = 1_000_000;

/// How devices are linked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// 0 - 1 - 2 - ... - n-1
    Chain,
    /// A chain whose ends are also linked
    Ring,
    /// Every device linked to every other
    Mesh,
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chain" => Ok(Topology::Chain),
            "ring" => Ok(Topology::Ring),
            "mesh" => Ok(Topology::Mesh),
            other => Err(format!("unknown topology '{}' (chain, ring, mesh)", other)),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Chain => write!(f, "chain"),
            Topology::Ring => write!(f, "ring"),
            Topology::Mesh => write!(f, "mesh"),
        }
    }
}

/// One simulated device
pub struct TestDevice {
    pub address: PeerAddress,
    pub transport: Arc<MemoryTransport>,
    pub engine: RelayEngine<MemoryTransport>,
    events: mpsc::Receiver<RelayEvent>,
}

impl TestDevice {
    /// Drain every presentation event emitted so far
    pub fn drain_events(&mut self) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn has_seen(&self, id: &AlertId) -> bool {
        self.engine.dedup().contains(id, Instant::now())
    }
}

/// A simulated network of relay devices
pub struct TestNetwork {
    config: RelayConfig,
    air: Air,
    devices: Vec<TestDevice>,
    index: HashMap<PeerAddress, usize>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(RelayConfig::for_testing())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            config,
            air: Air::default(),
            devices: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Create `count` devices linked according to `topology`
    pub fn with_topology(count: usize, topology: Topology) -> Self {
        let mut network = Self::new();
        network.build_topology(count, topology);
        network
    }

    pub fn build_topology(&mut self, count: usize, topology: Topology) {
        let first = self.devices.len();
        for _ in 0..count {
            self.add_device();
        }
        let ids: Vec<usize> = (first..first + count).collect();
        match topology {
            Topology::Chain | Topology::Ring => {
                for pair in ids.windows(2) {
                    self.link(pair[0], pair[1]);
                }
                if topology == Topology::Ring && count > 2 {
                    self.link(ids[count - 1], ids[0]);
                }
            }
            Topology::Mesh => {
                for (i, &a) in ids.iter().enumerate() {
                    for &b in &ids[i + 1..] {
                        self.link(a, b);
                    }
                }
            }
        }
    }

    /// Add a new device; returns its index
    pub fn add_device(&mut self) -> usize {
        let id = self.devices.len();
        let address = PeerAddress::new(format!("dev-{}", id));
        let transport = Arc::new(MemoryTransport::on_air(address.as_str(), self.air.clone()));
        let (event_tx, events) = mpsc::channel(self.config.event_channel_capacity.max(1));
        let engine = RelayEngine::new(
            transport.clone(),
            Arc::new(DedupCache::with_config(self.config.dedup_config())),
            Arc::new(PeerRegistry::new()),
            event_tx,
            self.config.send_timeout(),
        );
        self.index.insert(address.clone(), id);
        self.devices.push(TestDevice {
            address,
            transport,
            engine,
            events,
        });
        id
    }

    /// Bring up a link between two devices (both directions)
    pub fn link(&mut self, a: usize, b: usize) {
        let (addr_a, addr_b) = (self.devices[a].address.clone(), self.devices[b].address.clone());
        self.devices[a].transport.link(&addr_b);
        self.devices[a].engine.peers().upsert(&addr_b, LinkState::Connected);
        self.devices[b].transport.link(&addr_a);
        self.devices[b].engine.peers().upsert(&addr_a, LinkState::Connected);
    }

    /// Tear down a link between two devices
    pub fn unlink(&mut self, a: usize, b: usize) {
        let (addr_a, addr_b) = (self.devices[a].address.clone(), self.devices[b].address.clone());
        self.devices[a].transport.unlink(&addr_b);
        self.devices[a].engine.peers().mark(&addr_b, LinkState::Disconnected);
        self.devices[b].transport.unlink(&addr_a);
        self.devices[b].engine.peers().mark(&addr_a, LinkState::Disconnected);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, id: usize) -> &TestDevice {
        &self.devices[id]
    }

    pub fn device_mut(&mut self, id: usize) -> &mut TestDevice {
        &mut self.devices[id]
    }

    /// Compose an alert on a device and send it to its neighbours
    pub async fn originate(&self, id: usize, text: &str) -> Result<Alert, RelayError> {
        let alert = Alert::new(text, 0.0, 0.0)?;
        self.devices[id].engine.submit_local(alert.clone()).await?;
        Ok(alert)
    }

    /// Hand raw bytes to a device as if `from` had sent them
    pub async fn inject(&self, id: usize, from: &PeerAddress, bytes: &[u8]) {
        if let Err(e) = self.devices[id].engine.on_received(from, bytes).await {
            debug!(device = id, error = %e, "test network: injected payload rejected");
        }
    }

    /// Deliver queued frames until none remain; returns how many were delivered
    pub async fn run_until_quiet(&self) -> usize {
        let mut delivered = 0;
        while delivered < MAX_DELIVERIES {
            let Some(frame) = self.air.lock().pop_front() else {
                break;
            };
            let Some(&to) = self.index.get(&frame.to) else {
                continue;
            };
            delivered += 1;
            if let Err(e) = self.devices[to].engine.on_received(&frame.from, &frame.bytes).await {
                debug!(device = to, error = %e, "test network: delivery rejected");
            }
        }
        delivered
    }

    /// Frames each device has written, by device index
    pub fn sends_per_device(&self) -> Vec<usize> {
        self.devices.iter().map(|d| d.transport.sent_count()).collect()
    }

    /// How many devices have seen `id`
    pub fn reach(&self, id: &AlertId) -> usize {
        self.devices.iter().filter(|d| d.has_seen(id)).count()
    }

    /// Number of links each device has
    pub fn degree(&self, id: usize) -> usize {
        self.devices[id].engine.peers().connected_peers().len()
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::codec;

    #[tokio::test]
    async fn test_chain_delivers_end_to_end() {
        let network = TestNetwork::with_topology(5, Topology::Chain);
        let alert = network.originate(0, "evacuate east side").await.unwrap();

        network.run_until_quiet().await;

        assert_eq!(network.reach(&alert.id()), 5);
        // One transmission per link: the far end has nobody new to tell
        assert_eq!(network.sends_per_device(), vec![1, 1, 1, 1, 0]);
    }

    #[tokio::test]
    async fn test_ring_flood_terminates() {
        let network = TestNetwork::with_topology(6, Topology::Ring);
        let alert = network.originate(2, "shelter at school").await.unwrap();

        let delivered = network.run_until_quiet().await;

        assert_eq!(network.reach(&alert.id()), 6);
        // Origin sends to both neighbours, everyone else forwards once
        assert_eq!(delivered, 2 + 5);
        for (id, sends) in network.sends_per_device().into_iter().enumerate() {
            assert!(sends <= network.degree(id));
        }
    }

    #[tokio::test]
    async fn test_mesh_each_device_forwards_at_most_once() {
        let n = 6;
        let network = TestNetwork::with_topology(n, Topology::Mesh);
        let alert = network.originate(0, "fire on 3rd ave").await.unwrap();

        let delivered = network.run_until_quiet().await;

        assert_eq!(network.reach(&alert.id()), n);
        assert_eq!(delivered, (n - 1) + (n - 1) * (n - 2));
        let sends = network.sends_per_device();
        assert_eq!(sends[0], n - 1);
        assert!(sends[1..].iter().all(|&s| s == n - 2));
    }

    #[tokio::test]
    async fn test_every_device_surfaces_alert_once() {
        let mut network = TestNetwork::with_topology(4, Topology::Mesh);
        let alert = network.originate(1, "boil water").await.unwrap();
        network.run_until_quiet().await;

        for id in 0..network.len() {
            let events = network.device_mut(id).drain_events();
            let surfaced = events
                .iter()
                .filter(|e| match e {
                    RelayEvent::AlertReceived(r) => r.alert == alert,
                    RelayEvent::AlertOriginated(a) => *a == alert,
                    _ => false,
                })
                .count();
            assert_eq!(surfaced, 1, "device {} surfaced {} times", id, surfaced);
        }
    }

    #[tokio::test]
    async fn test_partition_bounds_reach() {
        let mut network = TestNetwork::new();
        network.build_topology(3, Topology::Chain);
        network.build_topology(3, Topology::Chain);

        let alert = network.originate(0, "left side only").await.unwrap();
        network.run_until_quiet().await;
        assert_eq!(network.reach(&alert.id()), 3);
        assert!(!network.device(3).has_seen(&alert.id()));

        // Heal the partition; later alerts cross, the old one is not replayed
        network.link(2, 3);
        let later = network.originate(0, "bridge reopened").await.unwrap();
        network.run_until_quiet().await;
        assert_eq!(network.reach(&later.id()), 6);
        assert!(!network.device(5).has_seen(&alert.id()));
    }

    #[tokio::test]
    async fn test_concurrent_alerts_both_flood() {
        let network = TestNetwork::with_topology(5, Topology::Ring);
        let a = network.originate(0, "first").await.unwrap();
        let b = network.originate(3, "second").await.unwrap();
        network.run_until_quiet().await;

        assert_eq!(network.reach(&a.id()), 5);
        assert_eq!(network.reach(&b.id()), 5);
    }

    #[tokio::test]
    async fn test_malformed_payload_not_propagated() {
        let network = TestNetwork::with_topology(3, Topology::Chain);
        network
            .inject(1, &PeerAddress::new("dev-0"), b"\x01\x00\x00\x00\x03a,b")
            .await;
        assert_eq!(network.run_until_quiet().await, 0);
        assert_eq!(network.sends_per_device(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_injected_alert_relayed_byte_identical() {
        let network = TestNetwork::with_topology(3, Topology::Chain);
        let alert = Alert::new("tornado, take cover", 35.2, -97.4).unwrap();
        let bytes = codec::encode(&alert);

        network.inject(0, &PeerAddress::new("outsider"), &bytes).await;
        network.run_until_quiet().await;

        let sent = network.device(1).transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, PeerAddress::new("dev-2"));
        assert_eq!(sent[0].bytes, bytes);
    }

    #[test]
    fn test_topology_parse() {
        assert_eq!("ring".parse::<Topology>().unwrap(), Topology::Ring);
        assert!("star".parse::<Topology>().is_err());
        assert_eq!(Topology::Mesh.to_string(), "mesh");
    }
}
