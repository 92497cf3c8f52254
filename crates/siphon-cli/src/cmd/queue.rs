//! `siphon queue` - scan into a queue for a later `spew`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use siphon_core::{Latch, Scanner, fmt_num};
use super::{QueueOpts, ScanOpts, print_summary};
use crate::config::Config;

const SCANNER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Roots to scan
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub queue: QueueOpts,

    #[command(flatten)]
    pub scan: ScanOpts,
}

pub fn run(args: QueueArgs, config: &Config) -> Result<()> {
    // Nothing drains this queue, so a bounded one would block the walkers for good
    let queue = args.queue.open_unbounded(config)?;
    siphon_core::install_signal_handlers().context("failed to install signal handlers")?;

    let scanner = Scanner::new(
        Arc::clone(&queue),
        Arc::new(Latch::new()),
        args.scan.scan_options(config),
    )
    .context("failed to set up scanner")?;

    let mut queued = 0;
    let mut dirs = 0;
    let mut errors = 0;
    let handles = scanner
        .scan(&args.paths)
        .context("failed to start scanning")?;
    for handle in handles {
        let root = handle.root().to_path_buf();
        match handle.join() {
            Ok(stats) => {
                queued += stats.queued;
                dirs += stats.dirs;
                errors += stats.errors;
            }
            Err(e) => log::warn!("Scan of {} did not complete: {e}", root.display()),
        }
    }

    scanner.shutdown();
    if !scanner.await_termination(SCANNER_TIMEOUT) {
        log::warn!("Scanner still busy after {SCANNER_TIMEOUT:?}, cancelling");
        scanner.shutdown_now();
    }
    let pending = queue.len();
    queue.close().context("failed to close queue")?;

    log::info!("Queued {} file(s).", fmt_num(queued as u64));
    print_summary(
        "Queue",
        &[
            ("Queued", fmt_num(queued as u64)),
            ("Directories", fmt_num(dirs as u64)),
            ("Unreadable", fmt_num(errors as u64)),
            ("Pending", fmt_num(pending as u64)),
        ],
    );
    Ok(())
}
