//! Window-gated storefront availability monitor.
//!
//! Each run restores the last published snapshot, probes the tracked stores,
//! appends the results and publishes the new snapshot.

pub mod config;
pub mod database;
pub mod monitoring;
pub mod orchestrator;
pub mod report;
pub mod snapshot;
pub mod stores;
pub mod validation;
