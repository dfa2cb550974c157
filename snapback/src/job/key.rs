//! Job identity.
//!
//! A job is identified by the canonical absolute path of its source directory.
//! The same normalization must be used when registering and when looking up a
//! job, otherwise two spellings of one directory become two jobs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Canonical identifier of a backup job
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Wrap a string that is already known to be normalized (e.g. a persisted key)
    pub fn from_normalized(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Path> for JobKey {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

/// Normalize a source path into its job key.
///
/// Expands `~`, anchors relative paths at the working directory and resolves
/// symlinks. A path that does not exist yet is resolved through its deepest
/// existing ancestor, with the remaining components appended lexically.
pub fn normalize(path: impl AsRef<Path>) -> JobKey {
    let absolute = absolutize(&expand_home(path.as_ref()));
    JobKey(resolve_existing(&absolute).to_string_lossy().into_owned())
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

fn resolve_existing(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }

    let lexical = lexical_clean(path);
    let mut ancestor = lexical.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(ancestor) {
            return tail.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (ancestor.parent(), ancestor.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                ancestor = parent;
            }
            _ => return lexical,
        }
    }
}

/// Drop `.` segments and fold `..` into the preceding component
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(component);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}
