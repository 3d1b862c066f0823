//! In-memory radio transport
//!
//! Records every command instead of touching a radio. Links are plain set
//! membership, failures are injected per operation or per peer, and sends
//! can optionally be dropped into a shared [`Air`] queue so a
//! [`super::TestNetwork`] can deliver them to the addressed device.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::transport::{PeerAddress, RadioTransport, TransportError};

/// A frame written by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub from: PeerAddress,
    pub to: PeerAddress,
    pub bytes: Vec<u8>,
}

/// Shared medium that carries sent frames between simulated devices
pub type Air = Arc<Mutex<VecDeque<SentFrame>>>;

#[derive(Debug)]
struct MemoryState {
    available: bool,
    advertising: bool,
    scanning: bool,
    links: BTreeSet<PeerAddress>,
    sent: Vec<SentFrame>,
    connect_attempts: Vec<PeerAddress>,
    advertise_failure: Option<TransportError>,
    scan_failure: Option<TransportError>,
    connect_failures: HashMap<PeerAddress, TransportError>,
    send_failures: HashMap<PeerAddress, TransportError>,
}

/// Radio transport backed by memory
#[derive(Debug)]
pub struct MemoryTransport {
    address: PeerAddress,
    air: Option<Air>,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self::build(PeerAddress::new(address), None)
    }

    /// Transport whose successful sends are also queued on `air`
    pub fn on_air(address: impl Into<String>, air: Air) -> Self {
        Self::build(PeerAddress::new(address), Some(air))
    }

    fn build(address: PeerAddress, air: Option<Air>) -> Self {
        Self {
            address,
            air,
            state: Mutex::new(MemoryState {
                available: true,
                advertising: false,
                scanning: false,
                links: BTreeSet::new(),
                sent: Vec::new(),
                connect_attempts: Vec::new(),
                advertise_failure: None,
                scan_failure: None,
                connect_failures: HashMap::new(),
                send_failures: HashMap::new(),
            }),
        }
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Simulate the radio being switched off (or back on)
    pub fn set_available(&self, available: bool) {
        let mut state = self.state.lock();
        state.available = available;
        if !available {
            state.advertising = false;
            state.scanning = false;
            state.links.clear();
        }
    }

    pub fn fail_advertising(&self, error: Option<TransportError>) {
        self.state.lock().advertise_failure = error;
    }

    pub fn fail_scanning(&self, error: Option<TransportError>) {
        self.state.lock().scan_failure = error;
    }

    pub fn fail_connect(&self, peer: &PeerAddress, error: Option<TransportError>) {
        let mut state = self.state.lock();
        match error {
            Some(e) => state.connect_failures.insert(peer.clone(), e),
            None => state.connect_failures.remove(peer),
        };
    }

    pub fn fail_sends_to(&self, peer: &PeerAddress, error: TransportError) {
        self.state.lock().send_failures.insert(peer.clone(), error);
    }

    /// Bring up a link without going through `connect` (inbound link)
    pub fn link(&self, peer: &PeerAddress) {
        self.state.lock().links.insert(peer.clone());
    }

    /// Drop a link silently, as an out-of-range peer would
    pub fn unlink(&self, peer: &PeerAddress) {
        self.state.lock().links.remove(peer);
    }

    pub fn is_advertising(&self) -> bool {
        self.state.lock().advertising
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub fn links(&self) -> Vec<PeerAddress> {
        self.state.lock().links.iter().cloned().collect()
    }

    pub fn connect_attempts(&self) -> Vec<PeerAddress> {
        self.state.lock().connect_attempts.clone()
    }

    /// Every frame successfully written so far
    pub fn sent(&self) -> Vec<SentFrame> {
        self.state.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }
}

impl RadioTransport for MemoryTransport {
    async fn start_advertising(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(TransportError::Unavailable);
        }
        if let Some(e) = state.advertise_failure.clone() {
            return Err(e);
        }
        state.advertising = true;
        Ok(())
    }

    async fn stop_advertising(&self) {
        self.state.lock().advertising = false;
    }

    async fn start_scanning(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(TransportError::Unavailable);
        }
        if let Some(e) = state.scan_failure.clone() {
            return Err(e);
        }
        state.scanning = true;
        Ok(())
    }

    async fn stop_scanning(&self) {
        self.state.lock().scanning = false;
    }

    async fn connect(&self, peer: &PeerAddress) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connect_attempts.push(peer.clone());
        if !state.available {
            return Err(TransportError::Unavailable);
        }
        if let Some(e) = state.connect_failures.get(peer).cloned() {
            return Err(e);
        }
        state.links.insert(peer.clone());
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerAddress) {
        self.state.lock().links.remove(peer);
    }

    async fn send(&self, peer: &PeerAddress, bytes: &[u8]) -> Result<(), TransportError> {
        let frame = {
            let mut state = self.state.lock();
            if !state.available {
                return Err(TransportError::Unavailable);
            }
            if let Some(e) = state.send_failures.get(peer).cloned() {
                return Err(e);
            }
            if !state.links.contains(peer) {
                return Err(TransportError::NotConnected);
            }
            let frame = SentFrame {
                from: self.address.clone(),
                to: peer.clone(),
                bytes: bytes.to_vec(),
            };
            state.sent.push(frame.clone());
            frame
        };
        if let Some(air) = &self.air {
            air.lock().push_back(frame);
        }
        Ok(())
    }
}
