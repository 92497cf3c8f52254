//! siphon-store: durable queue and report backends
//!
//! Both backends keep their state in JSON-lines journals under a store
//! directory, so an interrupted run can resume draining and skip finished
//! paths. Backends are picked by a [`Backend`] selector plus a directory
//! and a name.

mod journal;
pub mod queue;
pub mod report;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use siphon_core::{MemoryQueue, MemoryReport, PathQueue, Report};

pub use queue::JournalQueue;
pub use report::JournalReport;

/// Storage backend for queues and reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Lives and dies with the process
    #[default]
    Memory,
    /// JSON-lines journal on disk
    Journal,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Journal => f.write_str("journal"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "journal" => Ok(Self::Journal),
            other => Err(format!("unknown backend '{other}' (expected memory or journal)")),
        }
    }
}

/// Open a queue. Errors here are setup failures and abort the run.
pub fn open_queue(
    backend: Backend,
    dir: &Path,
    name: &str,
    capacity: usize,
) -> Result<Arc<dyn PathQueue>> {
    Ok(match backend {
        Backend::Memory => Arc::new(MemoryQueue::new(capacity)),
        Backend::Journal => Arc::new(JournalQueue::open(dir, name, capacity)?),
    })
}

/// Open a report. Errors here are setup failures and abort the run.
pub fn open_report(backend: Backend, dir: &Path, name: &str) -> Result<Arc<dyn Report>> {
    Ok(match backend {
        Backend::Memory => Arc::new(MemoryReport::new()),
        Backend::Journal => Arc::new(JournalReport::open(dir, name)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Journal".parse::<Backend>().unwrap(), Backend::Journal);
        assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
        assert!("redis".parse::<Backend>().is_err());
    }

    #[test]
    fn memory_backends_need_no_directory() {
        let missing = Path::new("/nonexistent/siphon");
        let queue = open_queue(Backend::Memory, missing, "q", 3).unwrap();
        assert_eq!(queue.capacity(), 3);
        let report = open_report(Backend::Memory, missing, "r").unwrap();
        assert!(report.is_empty());
    }
}
