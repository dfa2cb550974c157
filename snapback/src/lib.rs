//! Snapback Library
//!
//! Interval-driven backup scheduler wrapping restic snapshots and 7z/tar.gz
//! archives, with a layered job registry and persistent run state.

pub mod app;
pub mod config;
pub mod environment;
pub mod executor;
pub mod job;
pub mod schedule;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use app::App;
pub use config::Settings;
pub use utils::errors::SnapbackError;
pub type Result<T> = std::result::Result<T, SnapbackError>;
