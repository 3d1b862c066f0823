//! Radio Transport contract
//!
//! The relay core never touches a radio directly. A host supplies an
//! implementation of [`RadioTransport`] for commands (advertise, scan,
//! connect, send) and pushes every radio callback into a bounded channel as
//! a [`TransportEvent`]. The core consumes those events on its own tasks, so
//! radio callback latency never depends on relay processing.

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use super::peers::LinkState;

/// Service UUID advertised by every relay device (scan filter)
pub const ALERT_SERVICE_UUID: &str = "0000b81d-0000-1000-8000-00805f9b34fb";

/// Characteristic UUID that peers write alert frames to
pub const ALERT_CHARACTERISTIC_UUID: &str = "0000b81e-0000-1000-8000-00805f9b34fb";

/// Link-layer address of a nearby device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors reported by a transport command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Radio is disabled or not authorized
    Unavailable,
    /// Radio is temporarily busy (too many advertisers, scan throttled, ...)
    Busy,
    /// No link to the requested peer
    NotConnected,
    /// Operation did not complete in time
    Timeout,
    /// Any other radio failure
    Failed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unavailable => write!(f, "radio transport unavailable"),
            TransportError::Busy => write!(f, "radio busy"),
            TransportError::NotConnected => write!(f, "peer not connected"),
            TransportError::Timeout => write!(f, "radio operation timed out"),
            TransportError::Failed(e) => write!(f, "radio failure: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// Commands the relay core issues against the radio
///
/// Implementations must be cheap to call concurrently; the core issues
/// fan-out sends to several peers at once.
pub trait RadioTransport: Send + Sync + 'static {
    /// Start announcing presence (connectable advertisement of [`ALERT_SERVICE_UUID`])
    fn start_advertising(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn stop_advertising(&self) -> impl Future<Output = ()> + Send;

    /// Start scanning for [`ALERT_SERVICE_UUID`] advertisements
    ///
    /// Results arrive as [`TransportEvent::PeerDiscovered`].
    fn start_scanning(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn stop_scanning(&self) -> impl Future<Output = ()> + Send;

    /// Establish a link to a discovered peer
    fn connect(&self, peer: &PeerAddress) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Tear down a link
    fn disconnect(&self, peer: &PeerAddress) -> impl Future<Output = ()> + Send;

    /// Write bytes to a linked peer
    fn send(
        &self,
        peer: &PeerAddress,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Radio callbacks, delivered to the core through a channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A peer advertisement was seen while scanning
    PeerDiscovered(PeerAddress),
    /// The radio reported a link state change (inbound or outbound link)
    LinkStateChanged { peer: PeerAddress, state: LinkState },
    /// Bytes arrived from a peer
    BytesReceived { peer: PeerAddress, bytes: Vec<u8> },
    /// Advertising stopped with an error after it had started
    AdvertiseFailed(TransportError),
    /// Scanning stopped with an error after it had started
    ScanFailed(TransportError),
}

/// Sending half handed to the transport implementation
pub type TransportEventSender = mpsc::Sender<TransportEvent>;

/// Receiving half handed to the relay service
pub type TransportEventReceiver = mpsc::Receiver<TransportEvent>;

/// Create the bounded callback channel between a transport and the core
pub fn transport_channel(capacity: usize) -> (TransportEventSender, TransportEventReceiver) {
    mpsc::channel(capacity.max(1))
}
