//! Queued path entries

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A normalized file path queued for extraction.
///
/// Entries are optionally made relative to a configurable base so that
/// differences between mount points never leak into reports or output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathEntry(PathBuf);

impl PathEntry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(normalize(path.as_ref()))
    }

    /// Strip `base` from `path` when it is a prefix.
    ///
    /// Paths outside the base, or equal to it, are kept as they are.
    pub fn relativize(path: &Path, base: Option<&Path>) -> Self {
        let relative = base
            .and_then(|b| path.strip_prefix(b).ok())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(path);
        Self::new(relative)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Lossy string form, used as the report key and document id input
    pub fn to_key(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

/// Drop `.` components so `./a/b` and `a/b` are the same entry
fn normalize(path: &Path) -> PathBuf {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

impl AsRef<Path> for PathEntry {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<&str> for PathEntry {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<PathBuf> for PathEntry {
    fn from(p: PathBuf) -> Self {
        Self::new(p)
    }
}

impl fmt::Display for PathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
