//! Processing report: terminal outcome per path, for idempotent re-runs

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::entry::PathEntry;
use crate::error::ReportError;

/// Why a path failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    NotRead,
    NotParsed,
    /// Extracted, but the output rejected the document
    NotSaved,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::NotRead => "not read",
            Self::NotParsed => "not parsed",
            Self::NotSaved => "not saved",
        }
    }
}

/// Terminal outcome recorded for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Succeeded,
    Skipped,
    Failed(FailureKind),
}

impl Status {
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed(kind) => write!(f, "failed ({})", kind.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ReportEntry {
    pub fn new(status: Status, detail: Option<String>) -> Self {
        Self {
            status,
            detail,
            recorded_at: Utc::now(),
        }
    }

    pub fn succeeded() -> Self {
        Self::new(Status::Succeeded, None)
    }

    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::new(Status::Failed(kind), Some(detail.into()))
    }
}

/// Persisted mapping from path to terminal outcome.
///
/// Backends must tolerate concurrent `put`s for different paths from every
/// worker. A path is owned by one worker at a time, so same-key races are
/// not expected.
pub trait Report: Send + Sync {
    fn get(&self, path: &PathEntry) -> Result<Option<ReportEntry>, ReportError>;

    fn put(&self, path: &PathEntry, entry: ReportEntry) -> Result<(), ReportError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry, in no particular order
    fn entries(&self) -> Result<Vec<(PathEntry, ReportEntry)>, ReportError>;

    /// Flush and release. Idempotent.
    fn close(&self) -> Result<(), ReportError>;
}

/// Report held in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryReport {
    map: RwLock<FxHashMap<PathEntry, ReportEntry>>,
}

impl MemoryReport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Report for MemoryReport {
    fn get(&self, path: &PathEntry) -> Result<Option<ReportEntry>, ReportError> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(path).cloned())
    }

    fn put(&self, path: &PathEntry, entry: ReportEntry) -> Result<(), ReportError> {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(path.clone(), entry);
        Ok(())
    }

    fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn entries(&self) -> Result<Vec<(PathEntry, ReportEntry)>, ReportError> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn close(&self) -> Result<(), ReportError> {
        Ok(())
    }
}

/// Which prior outcomes make a path eligible for another attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumePolicy {
    /// Ignore prior entries entirely
    pub force: bool,
    /// Re-attempt paths whose prior entry is a failure
    pub retry_failed: bool,
}

/// Consumer-side view of a [`Report`].
///
/// Backend errors are logged and swallowed: a report that cannot be read
/// means the path is processed again, one that cannot be written means the
/// outcome is only in the log.
#[derive(Clone)]
pub struct Reporter {
    report: Arc<dyn Report>,
    policy: ResumePolicy,
}

impl Reporter {
    pub fn new(report: Arc<dyn Report>) -> Self {
        Self {
            report,
            policy: ResumePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ResumePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Prior terminal status that makes `path` skippable, if any
    pub fn should_skip(&self, path: &PathEntry) -> Option<Status> {
        if self.policy.force {
            return None;
        }
        match self.report.get(path) {
            Ok(Some(entry)) if entry.status.is_failed() && self.policy.retry_failed => None,
            Ok(Some(entry)) => Some(entry.status),
            Ok(None) => None,
            Err(e) => {
                log::warn!("report lookup failed for {path}: {e}");
                None
            }
        }
    }

    pub fn record(&self, path: &PathEntry, entry: ReportEntry) {
        if let Err(e) = self.report.put(path, entry) {
            log::error!("failed to record outcome for {path}: {e}");
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("entries", &self.report.len())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter_with(path: &str, entry: ReportEntry, policy: ResumePolicy) -> (Reporter, PathEntry) {
        let report = Arc::new(MemoryReport::new());
        let path = PathEntry::new(path);
        report.put(&path, entry).unwrap();
        (Reporter::new(report).with_policy(policy), path)
    }

    #[test]
    fn memory_report_get_put() {
        let report = MemoryReport::new();
        let p = PathEntry::new("a.txt");
        assert_eq!(report.get(&p).unwrap(), None);
        report.put(&p, ReportEntry::succeeded()).unwrap();
        assert_eq!(report.get(&p).unwrap().unwrap().status, Status::Succeeded);
        report
            .put(&p, ReportEntry::failed(FailureKind::NotRead, "io"))
            .unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.get(&p).unwrap().unwrap().status,
            Status::Failed(FailureKind::NotRead)
        );
    }

    #[test]
    fn skips_prior_success() {
        let (r, p) = reporter_with("a", ReportEntry::succeeded(), ResumePolicy::default());
        assert_eq!(r.should_skip(&p), Some(Status::Succeeded));
        assert_eq!(r.should_skip(&PathEntry::new("other")), None);
    }

    #[test]
    fn skips_prior_failure_by_default() {
        let entry = ReportEntry::failed(FailureKind::NotParsed, "binary");
        let (r, p) = reporter_with("a", entry, ResumePolicy::default());
        assert_eq!(r.should_skip(&p), Some(Status::Failed(FailureKind::NotParsed)));
    }

    #[test]
    fn retry_failed_reattempts_failures_only() {
        let policy = ResumePolicy {
            retry_failed: true,
            ..Default::default()
        };
        let entry = ReportEntry::failed(FailureKind::NotRead, "io");
        let (r, p) = reporter_with("a", entry, policy);
        assert_eq!(r.should_skip(&p), None);

        let (r, p) = reporter_with("b", ReportEntry::succeeded(), policy);
        assert_eq!(r.should_skip(&p), Some(Status::Succeeded));
    }

    #[test]
    fn force_ignores_report() {
        let policy = ResumePolicy {
            force: true,
            ..Default::default()
        };
        let (r, p) = reporter_with("a", ReportEntry::succeeded(), policy);
        assert_eq!(r.should_skip(&p), None);
    }

    #[test]
    fn status_serde_shape() {
        assert_eq!(serde_json::to_string(&Status::Succeeded).unwrap(), "\"succeeded\"");
        assert_eq!(
            serde_json::to_string(&Status::Failed(FailureKind::NotSaved)).unwrap(),
            "{\"failed\":\"not_saved\"}"
        );
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::Skipped.to_string(), "skipped");
        assert_eq!(
            Status::Failed(FailureKind::NotFound).to_string(),
            "failed (not found)"
        );
    }
}
