//! Siphon Core - resumable, concurrent text extraction
//!
//! A scanner walks input roots into a bounded queue, a drainer moves queued
//! paths into a bounded worker pool, and every worker extracts, delivers and
//! records its file. A processing report makes re-runs skip finished work.

pub mod accumulator;
pub mod consumer;
pub mod drainer;
pub mod entry;
pub mod error;
pub mod extract;
pub mod filter;
pub mod latch;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod report;
pub mod run;
pub mod scanner;
pub mod semaphore;
pub mod shutdown;
pub mod sink;
pub mod spewer;

// Re-exports for convenience
pub use consumer::{ConsumerStats, ExtractingConsumer, TaskOutcome, default_parallelism};
pub use drainer::{Drainer, Draining};
pub use entry::PathEntry;
pub use error::{
    DeliveryError, DrainError, ExtractionError, ExtractionErrorKind, QueueError, ReportError,
    ScanError, SubmitError,
};
pub use extract::{Document, Extractor, ExtractorConfig, TextExtractor};
pub use filter::FilterOptions;
pub use latch::Latch;
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use queue::{DEFAULT_CAPACITY, MemoryQueue, PathQueue};
pub use report::{
    FailureKind, MemoryReport, Report, ReportEntry, Reporter, ResumePolicy, Status,
};
pub use run::{RunOptions, RunSummary, spew};
pub use scanner::{ScanHandle, ScanOptions, ScanStats, Scanner};
pub use shutdown::{
    install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag,
};
pub use sink::{ParquetSink, ParquetSpewer, is_valid_parquet};
pub use spewer::{FileSpewer, PrintSpewer, Spewer};
