//! Job configuration model.
//!
//! A job's effective settings are the shared [`Defaults`] shadowed field by
//! field by the job's own [`JobOverride`]. Scalars follow override semantics;
//! exclusion lists are concatenated so a job can only add exclusions.

use super::key::{expand_home, normalize, JobKey};
use crate::{Result, SnapbackError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Directories and patterns excluded from every job unless defaults are edited
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // JavaScript/Node
    "node_modules",
    ".pnpm-store",
    ".npm",
    ".yarn",
    ".next",
    ".nuxt",
    ".turbo",
    // Python
    ".venv",
    "venv",
    ".virtualenv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".tox",
    "*.egg-info",
    ".eggs",
    // iOS/macOS
    "Pods",
    "DerivedData",
    ".build",
    // Android
    ".gradle",
    ".cxx",
    // Build outputs
    "dist",
    "build",
    "target",
    "zig-out",
    "out",
    // Caches
    ".cache",
    ".parcel-cache",
    ".nx",
    // IDE/Editor
    ".idea",
    ".vscode",
    ".docker",
    // Misc
    "*.pyc",
    "*.pyo",
    ".coverage",
    "coverage",
    "htmlcov",
];

pub const DEFAULT_DEST: &str = "~/Backups";
pub const DEFAULT_RESTIC_INTERVAL_HOURS: u64 = 4;
pub const DEFAULT_FULL_INTERVAL_DAYS: u64 = 7;

/// Archive format used by the full operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// Full archives disabled
    #[serde(rename = "none", alias = "")]
    None,
    #[default]
    #[serde(rename = "7z")]
    SevenZip,
    #[serde(rename = "tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    pub fn is_enabled(self) -> bool {
        self != ArchiveFormat::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::None => "none",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = SnapbackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "none" => Ok(ArchiveFormat::None),
            "7z" => Ok(ArchiveFormat::SevenZip),
            "tar.gz" => Ok(ArchiveFormat::TarGz),
            other => Err(SnapbackError::Config(format!(
                "unknown archive format '{other}' (expected 7z, tar.gz or none)"
            ))),
        }
    }
}

/// Settings shared by every job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Destination root; each job writes below `<dest>/<name>`
    pub dest: String,

    pub archive_format: ArchiveFormat,

    /// Incremental (restic) operation enabled
    pub use_restic: bool,

    pub restic_interval_hours: u64,

    pub full_interval_days: u64,

    /// Secret-vault identifier for the restic password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_vault: Option<String>,

    pub excludes: Vec<String>,

    /// Unrecognized keys, written back unchanged
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            dest: DEFAULT_DEST.to_string(),
            archive_format: ArchiveFormat::SevenZip,
            use_restic: false,
            restic_interval_hours: DEFAULT_RESTIC_INTERVAL_HOURS,
            full_interval_days: DEFAULT_FULL_INTERVAL_DAYS,
            op_vault: None,
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            extra: toml::Table::new(),
        }
    }
}

/// Per-job record; every optional field shadows the matching default when set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobOverride {
    /// Display label, not identity
    pub name: String,

    /// Identity-bearing source directory
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_format: Option<ArchiveFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_restic: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restic_interval_hours: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_interval_days: Option<u64>,

    /// An empty string pins "no vault" even when defaults name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_vault: Option<String>,

    /// Added to the default exclusions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,

    #[serde(flatten)]
    pub extra: toml::Table,
}

impl JobOverride {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> JobKey {
        normalize(&self.source)
    }

    /// Reject records without the two required fields
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(SnapbackError::InvalidJob(format!(
                "job '{}' has no source",
                self.name
            )));
        }
        if self.name.trim().is_empty() {
            return Err(SnapbackError::InvalidJob(format!(
                "job for {} has no name",
                self.source
            )));
        }
        Ok(())
    }

    /// Layer `top` over `self`: set fields in `top` win, exclusions accumulate
    pub fn merge(mut self, top: &JobOverride) -> JobOverride {
        if !top.name.is_empty() {
            self.name = top.name.clone();
        }
        if !top.source.is_empty() {
            self.source = top.source.clone();
        }
        if top.dest.is_some() {
            self.dest = top.dest.clone();
        }
        if top.archive_format.is_some() {
            self.archive_format = top.archive_format;
        }
        if top.use_restic.is_some() {
            self.use_restic = top.use_restic;
        }
        if top.restic_interval_hours.is_some() {
            self.restic_interval_hours = top.restic_interval_hours;
        }
        if top.full_interval_days.is_some() {
            self.full_interval_days = top.full_interval_days;
        }
        if top.op_vault.is_some() {
            self.op_vault = top.op_vault.clone();
        }
        self.excludes = dedup_concat(&self.excludes, &top.excludes);
        for (key, value) in &top.extra {
            self.extra.insert(key.clone(), value.clone());
        }
        self
    }
}

/// Fully resolved configuration of one job; recomputed on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub name: String,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub archive_format: ArchiveFormat,
    pub use_restic: bool,
    pub restic_interval_hours: u64,
    pub full_interval_days: u64,
    pub op_vault: Option<String>,
    pub excludes: Vec<String>,
}

impl EffectiveConfig {
    pub fn key(&self) -> JobKey {
        normalize(&self.source)
    }

    /// Per-job output directory `<dest>/<name>`
    pub fn job_dir(&self) -> PathBuf {
        self.dest.join(&self.name)
    }

    /// Short human label such as `restic + 7z`
    pub fn mode_label(&self) -> String {
        match (self.use_restic, self.archive_format) {
            (true, ArchiveFormat::None) => "restic".to_string(),
            (true, format) => format!("restic + {format}"),
            (false, ArchiveFormat::None) => "none".to_string(),
            (false, format) => format.to_string(),
        }
    }

    /// A fully specified override that resolves back to this configuration
    pub fn as_override(&self) -> JobOverride {
        JobOverride {
            name: self.name.clone(),
            source: self.source.to_string_lossy().into_owned(),
            dest: Some(self.dest.to_string_lossy().into_owned()),
            archive_format: Some(self.archive_format),
            use_restic: Some(self.use_restic),
            restic_interval_hours: Some(self.restic_interval_hours),
            full_interval_days: Some(self.full_interval_days),
            op_vault: Some(self.op_vault.clone().unwrap_or_default()),
            excludes: self.excludes.clone(),
            extra: toml::Table::new(),
        }
    }
}

/// Resolve `job` against `defaults`
pub fn resolve(defaults: &Defaults, job: &JobOverride) -> EffectiveConfig {
    let dest = job.dest.as_deref().unwrap_or(&defaults.dest);
    let op_vault = job
        .op_vault
        .as_ref()
        .or(defaults.op_vault.as_ref())
        .filter(|vault| !vault.is_empty())
        .cloned();

    EffectiveConfig {
        name: job.name.clone(),
        source: job.key().as_path().to_path_buf(),
        dest: expand_home(std::path::Path::new(dest)),
        archive_format: job.archive_format.unwrap_or(defaults.archive_format),
        use_restic: job.use_restic.unwrap_or(defaults.use_restic),
        restic_interval_hours: job
            .restic_interval_hours
            .unwrap_or(defaults.restic_interval_hours),
        full_interval_days: job
            .full_interval_days
            .unwrap_or(defaults.full_interval_days),
        op_vault,
        excludes: dedup_concat(&defaults.excludes, &job.excludes),
    }
}

/// Concatenate two lists, keeping the first occurrence of each exact string
fn dedup_concat(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    first
        .iter()
        .chain(second)
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}
