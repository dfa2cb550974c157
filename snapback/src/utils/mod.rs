//! Utility modules for snapback.

pub mod errors;
pub mod logger;
pub mod output;

pub use errors::{Result, SnapbackError};
