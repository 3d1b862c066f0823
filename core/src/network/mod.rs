//! Network layer for the alert relay
//!
//! Contains:
//! - Transport: the radio contract the host implements
//! - Wire/Codec: framing and the alert encoding
//! - Peers: link state for every nearby device
//! - Discovery: advertise/scan/connect state machine
//! - Relay: dedup-gated flooding

pub mod codec;
pub mod discovery;
pub mod peers;
pub mod relay;
pub mod transport;
pub mod wire;

// Re-export commonly used items
pub use codec::{decode, encode, DecodeError, ALERT_FRAME_VERSION};
pub use discovery::{
    DiscoveryAction, DiscoveryState, DiscoveryStateMachine, HealthStatus, RadioOp, RetryPolicy,
};
pub use peers::{LinkState, PeerLink, PeerRegistry, PeerUpdate};
pub use relay::{FanOutReport, ReceiveOutcome, RelayEngine};
pub use transport::{
    transport_channel, PeerAddress, RadioTransport, TransportError, TransportEvent,
    TransportEventReceiver, TransportEventSender, ALERT_CHARACTERISTIC_UUID, ALERT_SERVICE_UUID,
};
