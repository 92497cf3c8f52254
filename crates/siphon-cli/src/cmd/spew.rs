//! `siphon spew` - scan and extract

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use siphon_core::accumulator::DEFAULT_BATCH_SIZE;
use siphon_core::{
    ExtractingConsumer, ExtractorConfig, FileSpewer, ParquetSpewer, PathQueue, PrintSpewer,
    Report, Reporter, ResumePolicy, RunOptions, SharedProgress, Spewer, TextExtractor,
    default_parallelism, fmt_num,
};

use super::{QueueOpts, ScanOpts, print_summary};
use crate::config::{Config, OutputKind, ReportKind, parse_duration, parse_size, parse_tag};

#[derive(Args, Debug)]
pub struct SpewArgs {
    /// Roots to scan. Without any, only the existing queue is drained.
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub queue: QueueOpts,

    #[command(flatten)]
    pub scan: ScanOpts,

    /// How long each queue poll waits, e.g. 5s or 250ms
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub queue_poll: Option<Duration>,

    /// With no paths, keep draining until interrupted
    #[arg(long)]
    pub daemon: bool,

    /// Where outcomes are recorded for resuming
    #[arg(long, value_enum)]
    pub report_type: Option<ReportKind>,

    /// Report name within the store directory
    #[arg(long)]
    pub report_name: Option<String>,

    /// Directory relative queued paths are resolved against
    #[arg(long)]
    pub working_directory: Option<PathBuf>,

    /// Output type
    #[arg(short, long, value_enum)]
    pub output_type: Option<OutputKind>,

    /// Output directory for file and parquet output
    #[arg(long)]
    pub output_directory: Option<PathBuf>,

    /// Write metadata alongside text
    #[arg(long, value_name = "BOOL")]
    pub output_metadata: Option<bool>,

    /// Field added to every document (repeatable)
    #[arg(short, long = "tag", value_name = "NAME=VALUE", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Number of files extracted in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Re-extract paths the report already holds
    #[arg(long)]
    pub force: bool,

    /// Re-extract paths the report holds as failed
    #[arg(long)]
    pub retry_failed: bool,

    /// Skip files larger than this, e.g. 50M
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_file_size: Option<u64>,
}

/// More parallel extractions than this many per CPU usually just thrash memory
const JOBS_PER_CPU_WARNING: usize = 4;

fn check_parallelism(jobs: usize) {
    let cpus = default_parallelism();
    if jobs > cpus * JOBS_PER_CPU_WARNING {
        log::warn!(
            "Running {jobs} extractions in parallel on {cpus} CPU(s). \
             Memory may run short; consider lowering --jobs."
        );
    }
}

fn open_spewer(args: &SpewArgs, config: &Config) -> Result<Arc<dyn Spewer>> {
    let kind = args.output_type.unwrap_or(config.output.kind);
    let metadata = args.output_metadata.unwrap_or(config.output.metadata);
    let dir = args
        .output_directory
        .clone()
        .unwrap_or_else(|| config.output.directory.clone());

    Ok(match kind {
        OutputKind::Stdout => Arc::new(PrintSpewer::stdout(metadata)),
        OutputKind::File => Arc::new(
            FileSpewer::new(&dir, metadata)
                .with_context(|| format!("failed to create output directory {}", dir.display()))?,
        ),
        OutputKind::Parquet => {
            let path = dir.join("documents.parquet");
            let spewer =
                ParquetSpewer::create(&path, config.output.compression_level, DEFAULT_BATCH_SIZE)
                    .with_context(|| format!("failed to create {}", path.display()))?;
            Arc::new(spewer)
        }
    })
}

fn open_report(args: &SpewArgs, config: &Config) -> Result<Option<Arc<dyn Report>>> {
    let kind = args.report_type.unwrap_or(config.report.kind);
    let Some(backend) = kind.backend() else {
        return Ok(None);
    };
    let name = args.report_name.as_deref().unwrap_or(&config.report.name);
    let dir = args.queue.store_dir(config);
    let report = siphon_store::open_report(backend, &dir, name)
        .with_context(|| format!("failed to open {backend} report '{name}'"))?;
    log::info!("Using {backend} report '{name}' ({} recorded)", report.len());
    Ok(Some(report))
}

pub fn run(args: SpewArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let jobs = args
        .jobs
        .or(config.workers.jobs)
        .unwrap_or_else(default_parallelism)
        .max(1);
    check_parallelism(jobs);
    siphon_core::install_signal_handlers().context("failed to install signal handlers")?;

    // Setup failures abort here, before anything is scanned
    let report = open_report(&args, config)?;
    let spewer = open_spewer(&args, config)?;
    let queue = args.queue.open(config)?;

    let result = spew(&args, config, jobs, &queue, &spewer, report.as_ref(), progress);

    // Closed in reverse order of opening, whatever the outcome
    let closed = close_all(&*queue, &*spewer, report.as_deref());
    let summary = result?;
    closed?;

    summary.log();
    print_summary(
        "Spew",
        &[
            ("Drained", fmt_num(summary.drained)),
            ("Extracted", fmt_num(summary.extracted)),
            ("Skipped", fmt_num(summary.skipped)),
            ("Failed", fmt_num(summary.failed)),
            ("Time", format!("{:.1}s", summary.elapsed.as_secs_f64())),
        ],
    );
    Ok(())
}

fn spew(
    args: &SpewArgs,
    config: &Config,
    jobs: usize,
    queue: &Arc<dyn PathQueue>,
    spewer: &Arc<dyn Spewer>,
    report: Option<&Arc<dyn Report>>,
    progress: &SharedProgress,
) -> Result<siphon_core::RunSummary> {
    let mut tags: BTreeMap<String, String> = BTreeMap::new();
    tags.extend(args.tags.iter().cloned());
    let extractor = TextExtractor::new(ExtractorConfig {
        working_dir: args
            .working_directory
            .clone()
            .or_else(|| config.extract.working_directory.clone()),
        include_metadata: args.output_metadata.unwrap_or(config.output.metadata),
        max_file_size: args.max_file_size.or(config.extract.max_file_size),
        tags,
    });

    let counter = progress.file_counter("extract");
    let mut consumer = ExtractingConsumer::new(Arc::new(extractor), Arc::clone(spewer), jobs)
        .context("failed to start extraction workers")?
        .with_progress(counter.clone());
    if let Some(report) = report {
        consumer = consumer.with_reporter(Reporter::new(Arc::clone(report)).with_policy(
            ResumePolicy {
                force: args.force,
                retry_failed: args.retry_failed,
            },
        ));
    }

    let options = RunOptions {
        roots: args.paths.clone(),
        scan: args.scan.scan_options(config),
        poll_timeout: args.queue_poll.unwrap_or(config.queue.poll),
        daemon: args.daemon,
        ..Default::default()
    };
    if args.daemon && !options.roots.is_empty() {
        log::warn!("--daemon only applies without paths; stopping once scanning is drained");
    }

    let summary = siphon_core::spew(Arc::clone(queue), Arc::new(consumer), &options);
    counter.finish_and_clear();
    summary
}

fn close_all(queue: &dyn PathQueue, spewer: &dyn Spewer, report: Option<&dyn Report>) -> Result<()> {
    let mut first: Option<anyhow::Error> = None;
    let mut keep = |e: anyhow::Error| {
        log::error!("{e:#}");
        first.get_or_insert(e);
    };
    if let Err(e) = queue.close() {
        keep(anyhow::Error::new(e).context("failed to close queue"));
    }
    if let Err(e) = spewer.close() {
        keep(anyhow::Error::new(e).context("failed to finish output"));
    }
    if let Some(report) = report {
        if let Err(e) = report.close() {
            keep(anyhow::Error::new(e).context("failed to close report"));
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use siphon_core::ProgressContext;
    use siphon_store::{Backend, JournalReport};
    use tempfile::TempDir;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: SpewArgs,
    }

    fn parse(argv: &[&str]) -> SpewArgs {
        Wrapper::parse_from(std::iter::once("spew").chain(argv.iter().copied())).args
    }

    #[test]
    fn parses_full_option_surface() {
        let args = parse(&[
            "--queue-type",
            "journal",
            "--queue-buffer",
            "8",
            "--queue-poll",
            "5s",
            "--report-type",
            "journal",
            "--include-pattern",
            "**/*.txt",
            "--tag",
            "batch=1",
            "--tag",
            "source=test",
            "--max-file-size",
            "1M",
            "-j",
            "2",
            "a",
            "b",
        ]);
        assert_eq!(args.queue.queue_type, Some(Backend::Journal));
        assert_eq!(args.queue.queue_buffer, Some(8));
        assert_eq!(args.queue_poll, Some(Duration::from_secs(5)));
        assert_eq!(args.report_type, Some(ReportKind::Journal));
        assert_eq!(args.tags.len(), 2);
        assert_eq!(args.max_file_size, Some(1 << 20));
        assert_eq!(args.jobs, Some(2));
        assert_eq!(args.paths, [PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn file_output_run_records_report() {
        let input = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::write(input.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(input.path().join("b.txt"), "beta").unwrap();

        let input_dir = input.path().to_str().unwrap();
        let store_dir = store.path().to_str().unwrap();
        let out_dir = out.path().to_str().unwrap();
        let args = parse(&[
            "--store-dir",
            store_dir,
            "--report-type",
            "journal",
            "--path-base",
            input_dir,
            "--working-directory",
            input_dir,
            "--output-type",
            "file",
            "--output-directory",
            out_dir,
            "-j",
            "2",
            input_dir,
        ]);
        run(args, &Config::default(), &Arc::new(ProgressContext::new())).unwrap();

        assert_eq!(std::fs::read_to_string(out.path().join("a.txt.txt")).unwrap(), "alpha");
        assert!(out.path().join("b.txt.json").exists());
        let report = JournalReport::open(store.path(), "siphon").unwrap();
        assert_eq!(report.len(), 2);
    }
}
