//! Radio callback handlers
//!
//! This module handles everything the radio reports:
//! - `incoming/`: routing of transport events to relay and discovery
pub(crate) mod incoming;
