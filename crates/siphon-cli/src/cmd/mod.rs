//! Subcommands and the option groups they share

pub mod queue;
pub mod report;
pub mod spew;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use siphon_core::{FilterOptions, PathQueue, ScanOptions};
use siphon_store::Backend;

use crate::config::Config;

/// Queue backend and addressing
#[derive(Args, Debug, Clone)]
pub struct QueueOpts {
    /// Queue backend
    #[arg(long = "queue-type", value_name = "TYPE")]
    pub queue_type: Option<Backend>,

    /// Queue name within the store directory
    #[arg(long)]
    pub queue_name: Option<String>,

    /// Queue capacity; scanning blocks while the queue is full
    #[arg(long, value_name = "SIZE")]
    pub queue_buffer: Option<usize>,

    /// Directory for journal queues and reports
    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

impl QueueOpts {
    pub fn store_dir(&self, config: &Config) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| config.store.dir.clone())
    }

    pub fn backend(&self, config: &Config) -> Backend {
        self.queue_type.unwrap_or(config.queue.backend)
    }

    /// Open the queue. A failure here aborts before any scanning.
    pub fn open(&self, config: &Config) -> Result<Arc<dyn PathQueue>> {
        let capacity = self.queue_buffer.unwrap_or(config.queue.buffer);
        self.open_with_capacity(config, capacity)
    }

    /// Open the queue without a bound, for runs where nothing drains it.
    /// Only a journal queue can do that without preallocating.
    pub fn open_unbounded(&self, config: &Config) -> Result<Arc<dyn PathQueue>> {
        let backend = self.backend(config);
        if backend != Backend::Journal {
            anyhow::bail!("a {backend} queue is lost on exit; use --queue-type journal");
        }
        if self.queue_buffer.is_some() {
            log::debug!("--queue-buffer has no effect without a consumer");
        }
        self.open_with_capacity(config, usize::MAX)
    }

    fn open_with_capacity(&self, config: &Config, capacity: usize) -> Result<Arc<dyn PathQueue>> {
        let backend = self.backend(config);
        let name = self.queue_name.as_deref().unwrap_or(&config.queue.name);
        let dir = self.store_dir(config);
        log::debug!("Opening {backend} queue '{name}' (capacity {capacity})");
        siphon_store::open_queue(backend, &dir, name, capacity)
            .with_context(|| format!("failed to open {backend} queue '{name}'"))
    }
}

/// Which files a scan picks up
#[derive(Args, Debug, Clone, Default)]
pub struct ScanOpts {
    /// Glob for files to include; files not matching are ignored
    #[arg(long, value_name = "PATTERN")]
    pub include_pattern: Option<String>,

    /// Glob for files and directories to skip
    #[arg(long, value_name = "PATTERN")]
    pub exclude_pattern: Option<String>,

    /// Follow symbolic links (cycles are detected)
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Include hidden files and directories
    #[arg(long)]
    pub include_hidden_files: bool,

    /// Include files generated by operating systems, like Thumbs.db and .DS_Store
    #[arg(long)]
    pub include_os_files: bool,

    /// Prefix stripped from queued paths, e.g. /home/user/ so they start with data/
    #[arg(long)]
    pub path_base: Option<PathBuf>,
}

impl ScanOpts {
    pub fn scan_options(&self, config: &Config) -> ScanOptions {
        let scan = &config.scan;
        ScanOptions {
            filter: FilterOptions {
                include_pattern: self
                    .include_pattern
                    .clone()
                    .or_else(|| scan.include_pattern.clone()),
                exclude_pattern: self
                    .exclude_pattern
                    .clone()
                    .or_else(|| scan.exclude_pattern.clone()),
                follow_symlinks: self.follow_symlinks || scan.follow_symlinks,
                include_hidden: self.include_hidden_files || scan.include_hidden_files,
                include_os_files: self.include_os_files || scan.include_os_files,
            },
            path_base: self.path_base.clone().or_else(|| scan.path_base.clone()),
            ..Default::default()
        }
    }
}

/// Two-column summary table on stderr, as every subcommand prints it
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}
