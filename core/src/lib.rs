//! BitAlert Core
//!
//! Infrastructure-free alert relay: devices in short-range radio contact
//! form an ad-hoc mesh and flood short geotagged alerts across it, with no
//! servers, accounts or internet.
//!
//! This is the core crate that provides:
//! - The alert model and its wire encoding
//! - Deduplication so every device forwards an alert at most once
//! - Peer link tracking and the advertise/scan/connect state machine
//! - The relay service tying them to a host-supplied radio transport
//!
//! # Module Structure
//!
//! - `protocol/`: Public interface (RelayService, config, alert types, events, stats)
//! - `handlers/`: Routing of radio callbacks
//! - `tasks/`: Background automation (discovery driver, maintenance)
//! - `network/`: Transport contract, codec, peers, discovery, relay engine
//! - `resilience/`: Flood suppression (dedup cache)
//! - `testing/`: In-memory radio and multi-device simulation
//!
//! # Quick Start
//!
//! ```ignore
//! use bitalert_core::network::transport_channel;
//! use bitalert_core::{RelayConfig, RelayService};
//!
//! // The host's radio pushes callbacks into `callbacks`
//! let (callbacks, transport_events) = transport_channel(256);
//! let radio = Arc::new(MyRadio::new(callbacks));
//!
//! let service = RelayService::start(RelayConfig::default(), radio, transport_events).await?;
//! let mut events = service.events().unwrap();
//!
//! service.submit_alert("Road flooded at 5th & Main", 29.76, -95.37).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

// Public interface
pub mod protocol;

// Internal modules
pub(crate) mod handlers;
pub(crate) mod tasks;

// Infrastructure modules (pub for flexibility)
pub mod network;
pub mod resilience;
pub mod testing;

// Re-export main API types for convenience
pub use protocol::{
    Alert,
    AlertError,
    AlertId,
    RelayConfig,
    RelayError,
    RelayEvent,
    RelayService,
    // Stats types
    PeerInfo,
    RelayStats,
};
