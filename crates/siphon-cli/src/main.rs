//! siphon - resumable, concurrent text extraction
//!
//! Scans directories into a work queue and extracts text from every queued
//! file in parallel, recording outcomes so re-runs skip finished work.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "siphon")]
#[command(about = "Resumable, concurrent text extraction")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./siphon.toml or ~/.config/siphon/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan paths (if any) and extract everything in the queue
    Spew(cmd::spew::SpewArgs),
    /// Scan paths into a queue without extracting
    Queue(cmd::queue::QueueArgs),
    /// Summarise a processing report
    Report(cmd::report::ReportArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(siphon_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug  (the progress line shows activity)
    //   non-TTY: info unless --debug          (logs are the only progress indicator)
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    siphon_core::init_logging(quiet, cli.debug, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Spew(args) => cmd::spew::run(args, &config, &progress),
        Command::Queue(args) => cmd::queue::run(args, &config),
        Command::Report(args) => cmd::report::run(args, &config),
        Command::Config => {
            show_config(&config);
            Ok(())
        }
    }
}

fn show_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let or_none = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

    table.add_row(vec![
        "Queue".to_string(),
        format!(
            "{} '{}' (buffer {}, poll {:?})",
            config.queue.backend, config.queue.name, config.queue.buffer, config.queue.poll
        ),
    ]);
    table.add_row(vec![
        "Report".to_string(),
        match config.report.kind.backend() {
            Some(backend) => format!("{backend} '{}'", config.report.name),
            None => "none".to_string(),
        },
    ]);
    table.add_row(vec![
        "Store directory".to_string(),
        config.store.dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Include pattern".to_string(),
        or_none(config.scan.include_pattern.clone()),
    ]);
    table.add_row(vec![
        "Exclude pattern".to_string(),
        or_none(config.scan.exclude_pattern.clone()),
    ]);
    table.add_row(vec![
        "Follow symlinks".to_string(),
        config.scan.follow_symlinks.to_string(),
    ]);
    table.add_row(vec![
        "Hidden / OS files".to_string(),
        format!(
            "{} / {}",
            config.scan.include_hidden_files, config.scan.include_os_files
        ),
    ]);
    table.add_row(vec![
        "Path base".to_string(),
        or_none(config.scan.path_base.as_ref().map(|p| p.display().to_string())),
    ]);
    table.add_row(vec![
        "Max file size".to_string(),
        or_none(config.extract.max_file_size.map(|n| format!("{n} bytes"))),
    ]);
    table.add_row(vec![
        "Output".to_string(),
        format!(
            "{:?} -> {} (metadata: {})",
            config.output.kind,
            config.output.directory.display(),
            config.output.metadata
        ),
    ]);
    table.add_row(vec![
        "Jobs".to_string(),
        config
            .workers
            .jobs
            .unwrap_or_else(siphon_core::default_parallelism)
            .to_string(),
    ]);

    eprintln!("\n{table}");
}
