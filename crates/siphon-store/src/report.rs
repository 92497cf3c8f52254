//! Durable processing report journaled to `<dir>/<name>.report.jsonl`

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use siphon_core::{PathEntry, Report, ReportEntry, ReportError};

use crate::journal::Journal;

#[derive(Serialize, Deserialize)]
struct Line {
    path: PathEntry,
    entry: ReportEntry,
}

#[derive(Serialize)]
struct LineRef<'a> {
    path: &'a PathEntry,
    entry: &'a ReportEntry,
}

/// Report that survives restarts and can be shared by runs one after another.
///
/// The map lives in memory; each `put` also appends a line to the journal.
/// Opening replays it with the last line per path winning, `close` compacts
/// it to one line per path.
pub struct JournalReport {
    entries: RwLock<FxHashMap<PathEntry, ReportEntry>>,
    journal: Journal,
    closed: AtomicBool,
}

impl JournalReport {
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.report.jsonl"))
    }

    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        let path = Self::path_for(dir, name);
        let lines: Vec<Line> = Journal::replay(&path)
            .with_context(|| format!("failed to read report {}", path.display()))?;

        let mut entries = FxHashMap::default();
        let replayed = lines.len();
        for line in lines {
            entries.insert(line.path, line.entry);
        }
        log::debug!(
            "Loaded report {name}: {} path(s) from {replayed} line(s)",
            entries.len()
        );

        let journal = Journal::create(&path, &compacted(&entries))
            .with_context(|| format!("failed to open report {}", path.display()))?;

        Ok(Self {
            entries: RwLock::new(entries),
            journal,
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<(), ReportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReportError::Closed);
        }
        Ok(())
    }
}

/// One line per path, sorted so compacted journals are stable
fn compacted(entries: &FxHashMap<PathEntry, ReportEntry>) -> Vec<LineRef<'_>> {
    let mut lines: Vec<LineRef<'_>> = entries
        .iter()
        .map(|(path, entry)| LineRef { path, entry })
        .collect();
    lines.sort_by(|a, b| a.path.cmp(b.path));
    lines
}

impl Report for JournalReport {
    fn get(&self, path: &PathEntry) -> Result<Option<ReportEntry>, ReportError> {
        self.check_open()?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(path).cloned())
    }

    fn put(&self, path: &PathEntry, entry: ReportEntry) -> Result<(), ReportError> {
        self.check_open()?;
        self.journal.append(&LineRef {
            path,
            entry: &entry,
        })?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), entry);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn entries(&self) -> Result<Vec<(PathEntry, ReportEntry)>, ReportError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = entries
            .iter()
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn close(&self) -> Result<(), ReportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        self.journal.compact_and_close(&compacted(&entries))?;
        Ok(())
    }
}
