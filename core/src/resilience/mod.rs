//! Resilience module
//!
//! Keeps flooding bounded:
//! - Dedup cache: each alert id is accepted once per retention window

pub mod dedup;

pub use dedup::{DedupCache, DedupConfig};
