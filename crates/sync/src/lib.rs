//! Roster sync between the gateway and the local channel table.
//!
//! [`SyncEngine`] reconciles the remote group roster into channel records:
//! new groups are created with their fetched config, renamed groups are
//! updated, vanished groups are deactivated. Per-group failures are carried
//! in the [`SyncReport`] so one bad group never aborts the run.

pub mod engine;
pub mod error;
pub mod report;

pub use {
    engine::SyncEngine,
    error::SyncError,
    report::{SyncItemError, SyncOptions, SyncReport},
};
