//! Alert relay - public interface
//!
//! This module provides the public API of the relay.
//! External code imports types and methods from here.
//!
//! # Module Structure
//!
//! - `core.rs`: RelayService struct, start/stop, submit
//! - `config.rs`: RelayConfig builder
//! - `error.rs`: RelayError
//! - `events.rs`: Events for the presentation layer
//! - `types.rs`: Alert and AlertId
//! - `stats/`: Stats and monitoring
//!
//! # Example
//!
//! ```ignore
//! use bitalert_core::network::transport::transport_channel;
//! use bitalert_core::{RelayConfig, RelayService};
//!
//! let (callbacks, transport_events) = transport_channel(256);
//! let radio = Arc::new(MyRadio::new(callbacks));
//! let service = RelayService::start(RelayConfig::default(), radio, transport_events).await?;
//!
//! let mut events = service.events().unwrap();
//! service.submit_alert("Flooding on Main St", 40.71, -74.0).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! service.stop().await;
//! ```

mod config;
pub(crate) mod core;
mod error;
mod events;
mod stats;
mod types;

// Core service
pub use config::RelayConfig;
pub use self::core::RelayService;

// Error type
pub use error::RelayError;

// Events (for app layer)
pub use events::{PeerLinkEvent, ReceivedAlert, RelayEvent};

// Alert model
pub use types::{current_time_millis, Alert, AlertError, AlertId, ALERT_ID_LEN, MAX_TEXT_BYTES};
pub(crate) use types::monotonic_now;

// Stats types
pub use stats::{PeerInfo, RelayStats};
