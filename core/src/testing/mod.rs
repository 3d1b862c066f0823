//! Testing utilities for the alert relay
//!
//! Provides an in-process radio and a multi-device simulation, so relay
//! behaviour can be exercised without hardware.
//!
//! # Example
//!
//! ```ignore
//! let network = TestNetwork::with_topology(5, Topology::Ring);
//!
//! // Device 0 raises an alert
//! let alert = network.originate(0, "Gas leak, avoid 5th St").await?;
//!
//! // Deliver frames until the flood dies out
//! network.run_until_quiet().await;
//! assert_eq!(network.reach(&alert.id()), 5);
//! ```

pub mod network;
pub mod transport;

pub use network::{TestDevice, TestNetwork, Topology};
pub use transport::{Air, MemoryTransport, SentFrame};
