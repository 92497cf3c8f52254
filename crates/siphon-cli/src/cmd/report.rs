//! `siphon report` - inspect a journal report

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use siphon_core::{PathEntry, Report, ReportEntry, Status, fmt_num};
use siphon_store::JournalReport;

use super::print_summary;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Report name within the store directory
    #[arg(long)]
    pub report_name: Option<String>,

    /// Directory holding journal reports
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// List every failed path
    #[arg(long)]
    pub failed: bool,
}

pub fn run(args: ReportArgs, config: &Config) -> Result<()> {
    let dir = args.store_dir.unwrap_or_else(|| config.store.dir.clone());
    let name = args.report_name.as_deref().unwrap_or(&config.report.name);
    let path = JournalReport::path_for(&dir, name);
    if !path.exists() {
        anyhow::bail!("no report at {}", path.display());
    }

    let report = JournalReport::open(&dir, name)?;
    let entries = report.entries().context("failed to read report")?;
    report.close().context("failed to close report")?;

    let counts = count_by_status(&entries);
    let mut summary: Vec<(&str, String)> = counts
        .iter()
        .map(|(status, n)| (status.as_str(), fmt_num(*n)))
        .collect();
    summary.push(("Total", fmt_num(entries.len() as u64)));
    print_summary(&format!("Report '{name}'"), &summary);

    if args.failed {
        print_failures(&entries);
    }
    Ok(())
}

fn count_by_status(entries: &[(PathEntry, ReportEntry)]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for (_, entry) in entries {
        *counts.entry(entry.status.to_string()).or_insert(0) += 1;
    }
    counts
}

fn print_failures(entries: &[(PathEntry, ReportEntry)]) {
    let mut failed: Vec<_> = entries
        .iter()
        .filter(|(_, entry)| entry.status.is_failed())
        .collect();
    if failed.is_empty() {
        eprintln!("\nNo failures recorded.");
        return;
    }
    failed.sort_by(|a, b| a.0.to_key().cmp(&b.0.to_key()));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Path").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Detail").fg(Color::Cyan),
            Cell::new("Recorded").fg(Color::Cyan),
        ]);
    for (path, entry) in failed {
        let status = match entry.status {
            Status::Failed(kind) => kind.label().to_string(),
            other => other.to_string(),
        };
        table.add_row(vec![
            Cell::new(path.to_key()),
            Cell::new(status),
            Cell::new(entry.detail.as_deref().unwrap_or("-")),
            Cell::new(entry.recorded_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    eprintln!("\n{table}");
}
