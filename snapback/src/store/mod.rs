//! Persistent storage: job registry, run state and legacy migration.
//!
//! Reads never fail outward. Missing or corrupt documents are logged and
//! treated as empty so that a damaged file cannot stop scheduled runs.

pub mod manifest;
pub mod migrate;
pub mod state;

pub use manifest::{Manifest, ManifestStore};
pub use migrate::migrate_if_needed;
pub use state::{DaemonRegistration, RunState, RunStateMap, StateStore};
