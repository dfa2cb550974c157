//! Job registry.
//!
//! A TOML manifest with one `[defaults]` table and an ordered `[[jobs]]` list
//! of per-job overrides. Unknown keys survive a load/save cycle, and job
//! records that cannot be used (missing `name` or `source`) are kept verbatim
//! and written back after the valid ones. An unparseable `[defaults]` table
//! is likewise written back unchanged.

use super::migrate::migrate_format_field;
use crate::job::{Defaults, JobKey, JobOverride};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub defaults: Defaults,
    pub jobs: Vec<JobOverride>,
    /// Job records that failed validation, preserved as written
    pub rejected: Vec<toml::Value>,
    /// Unknown top-level keys
    pub extra: toml::Table,
    /// A `[defaults]` table that failed to parse, written back unchanged
    pub rejected_defaults: Option<toml::Table>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    defaults: Option<toml::Table>,
    #[serde(default)]
    jobs: Vec<toml::Value>,
    #[serde(flatten)]
    extra: toml::Table,
}

#[derive(Serialize)]
struct ManifestDocument<'a> {
    #[serde(flatten)]
    extra: &'a toml::Table,
    defaults: toml::Value,
    jobs: Vec<toml::Value>,
}

impl Manifest {
    /// Parse a manifest document, rejecting unusable job records individually
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawManifest = toml::from_str(content)?;

        let mut rejected_defaults = None;
        let defaults = match raw.defaults {
            Some(table) => {
                let mut migrated = table.clone();
                migrate_format_field(&mut migrated);
                match toml::Value::Table(migrated).try_into::<Defaults>() {
                    Ok(defaults) => defaults,
                    Err(e) => {
                        tracing::warn!(error = %e, "Invalid [defaults] section, using built-in defaults");
                        rejected_defaults = Some(table);
                        Defaults::default()
                    }
                }
            }
            None => Defaults::default(),
        };

        let mut manifest = Manifest {
            defaults,
            jobs: Vec::new(),
            rejected: Vec::new(),
            extra: raw.extra,
            rejected_defaults,
        };

        for mut record in raw.jobs {
            if let Some(table) = record.as_table_mut() {
                migrate_format_field(table);
            }
            let parsed = record
                .clone()
                .try_into::<JobOverride>()
                .map_err(|e| e.to_string())
                .and_then(|job| job.validate().map(|_| job).map_err(|e| e.to_string()));

            match parsed {
                Ok(job) => manifest.insert_collapsing(job),
                Err(reason) => {
                    tracing::warn!(error = %reason, "Skipping invalid job record");
                    manifest.rejected.push(record);
                }
            }
        }

        Ok(manifest)
    }

    /// Render the whole document
    pub fn render(&self) -> Result<String> {
        let mut jobs = Vec::with_capacity(self.jobs.len() + self.rejected.len());
        for job in &self.jobs {
            jobs.push(toml::Value::try_from(job)?);
        }
        jobs.extend(self.rejected.iter().cloned());

        let defaults = match &self.rejected_defaults {
            Some(table) => toml::Value::Table(table.clone()),
            None => toml::Value::try_from(&self.defaults)?,
        };
        let document = ManifestDocument {
            extra: &self.extra,
            defaults,
            jobs,
        };
        Ok(toml::to_string_pretty(&document)?)
    }

    pub fn find(&self, key: &JobKey) -> Option<&JobOverride> {
        self.jobs.iter().find(|job| &job.key() == key)
    }

    /// Jobs paired with their keys, in manifest order
    pub fn entries(&self) -> Vec<(JobKey, &JobOverride)> {
        self.jobs.iter().map(|job| (job.key(), job)).collect()
    }

    /// Register or replace a job; the stored source is the normalized key
    pub fn upsert(&mut self, mut job: JobOverride) -> JobKey {
        let key = job.key();
        job.source = key.as_str().to_string();
        match self.jobs.iter().position(|existing| existing.key() == key) {
            Some(index) => self.jobs[index] = job,
            None => self.jobs.push(job),
        }
        key
    }

    /// The `[defaults]` table on disk could not be parsed
    pub fn defaults_rejected(&self) -> bool {
        self.rejected_defaults.is_some()
    }

    /// Replace the shared defaults; unknown keys of the old table survive
    pub fn set_defaults(&mut self, mut defaults: Defaults) {
        self.rejected_defaults = None;
        for (key, value) in std::mem::take(&mut self.defaults.extra) {
            defaults.extra.entry(key).or_insert(value);
        }
        self.defaults = defaults;
    }

    pub fn remove(&mut self, key: &JobKey) -> Option<JobOverride> {
        let index = self.jobs.iter().position(|job| &job.key() == key)?;
        Some(self.jobs.remove(index))
    }

    fn insert_collapsing(&mut self, job: JobOverride) {
        let key = job.key();
        match self.jobs.iter().position(|existing| existing.key() == key) {
            Some(index) => {
                tracing::warn!(job = %key, name = %job.name, "Duplicate job for the same source, merging");
                let merged = self.jobs[index].clone().merge(&job);
                self.jobs[index] = merged;
            }
            None => self.jobs.push(job),
        }
    }
}

/// File-backed job registry
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the manifest; missing or corrupt storage yields built-in defaults
    pub fn load(&self) -> Manifest {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Manifest::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read manifest, using defaults");
                return Manifest::default();
            }
        };

        match Manifest::parse(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to parse manifest, using defaults");
                Manifest::default()
            }
        }
    }

    /// Replace the whole document
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, manifest.render()?)?;
        Ok(())
    }
}
