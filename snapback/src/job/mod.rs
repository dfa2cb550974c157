//! Job identity and configuration resolution.

pub mod key;
pub mod model;

pub use key::{normalize, JobKey};
pub use model::{resolve, ArchiveFormat, Defaults, EffectiveConfig, JobOverride};
