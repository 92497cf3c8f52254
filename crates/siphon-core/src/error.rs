//! Error types for the extraction pipeline
//!
//! Only setup failures abort a run. Walk errors stay inside the scanner,
//! extraction and delivery errors stay inside the worker that hit them and
//! end up in the log and the report.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::report::{FailureKind, Status};

/// Failure of a queue backend
#[derive(Debug)]
pub enum QueueError {
    /// The queue was closed
    Closed,
    Io(io::Error),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("queue is closed"),
            Self::Io(e) => write!(f, "queue IO: {e}"),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<io::Error> for QueueError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Failure of a report backend
#[derive(Debug)]
pub enum ReportError {
    Closed,
    Io(io::Error),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("report is closed"),
            Self::Io(e) => write!(f, "report IO: {e}"),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<io::Error> for ReportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Error from scanning a single root, or from setting up the scanner.
#[derive(Debug)]
pub enum ScanError {
    /// Include or exclude glob did not parse
    Pattern(glob::PatternError),
    /// Walker thread pool could not be built
    Pool(rayon::ThreadPoolBuildError),
    /// The scanner no longer accepts roots
    Closed,
    /// The root itself could not be read
    Root { root: PathBuf, source: io::Error },
    /// Enqueueing blocked past the configured put timeout
    QueueTimeout { root: PathBuf },
    Queue { root: PathBuf, source: QueueError },
    Cancelled { root: PathBuf },
    /// The walk task went away without reporting
    Lost { root: PathBuf },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(e) => write!(f, "invalid glob pattern: {e}"),
            Self::Pool(e) => write!(f, "failed to start walkers: {e}"),
            Self::Closed => f.write_str("scanner is shut down"),
            Self::Root { root, source } => write!(f, "{}: {source}", root.display()),
            Self::QueueTimeout { root } => {
                write!(f, "{}: timed out waiting for queue space", root.display())
            }
            Self::Queue { root, source } => write!(f, "{}: {source}", root.display()),
            Self::Cancelled { root } => write!(f, "{}: scan cancelled", root.display()),
            Self::Lost { root } => write!(f, "{}: walker exited unexpectedly", root.display()),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<glob::PatternError> for ScanError {
    fn from(e: glob::PatternError) -> Self {
        Self::Pattern(e)
    }
}

/// Rejected submission to the extracting consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    ShutDown,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => f.write_str("consumer is shut down"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Error that ended a drain loop early
#[derive(Debug)]
pub enum DrainError {
    Spawn(io::Error),
    Queue(QueueError),
    Submit(SubmitError),
    /// The drain thread panicked
    Panicked,
}

impl fmt::Display for DrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to start drainer: {e}"),
            Self::Queue(e) => write!(f, "drain aborted: {e}"),
            Self::Submit(e) => write!(f, "drain aborted: {e}"),
            Self::Panicked => f.write_str("drainer panicked"),
        }
    }
}

impl std::error::Error for DrainError {}

impl From<QueueError> for DrainError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<SubmitError> for DrainError {
    fn from(e: SubmitError) -> Self {
        Self::Submit(e)
    }
}

/// What went wrong while extracting a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    NotFound,
    NotRead,
    NotParsed,
    /// Over the configured size limit; recorded as skipped, not failed
    TooLarge,
}

/// Per-file extraction failure
#[derive(Debug)]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub path: PathBuf,
    pub message: String,
}

impl ExtractionError {
    pub fn new(kind: ExtractionErrorKind, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Classify an IO error against `path`
    pub fn from_io(path: impl Into<PathBuf>, e: &io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::NotFound => ExtractionErrorKind::NotFound,
            _ => ExtractionErrorKind::NotRead,
        };
        Self::new(kind, path, e.to_string())
    }

    /// Report status this failure is recorded as
    pub fn status(&self) -> Status {
        match self.kind {
            ExtractionErrorKind::NotFound => Status::Failed(FailureKind::NotFound),
            ExtractionErrorKind::NotRead => Status::Failed(FailureKind::NotRead),
            ExtractionErrorKind::NotParsed => Status::Failed(FailureKind::NotParsed),
            ExtractionErrorKind::TooLarge => Status::Skipped,
        }
    }
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ExtractionErrorKind::NotFound => "not found",
            ExtractionErrorKind::NotRead => "not read",
            ExtractionErrorKind::NotParsed => "not parsed",
            ExtractionErrorKind::TooLarge => "too large",
        };
        write!(f, "{}: {what}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for ExtractionError {}

/// Failure handing a document to a spewer
#[derive(Debug)]
pub enum DeliveryError {
    Io(io::Error),
    Encode(String),
    Closed,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Encode(msg) => write!(f, "encode: {msg}"),
            Self::Closed => f.write_str("output is closed"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<io::Error> for DeliveryError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn from_io_not_found() {
        let err = ExtractionError::from_io("a.txt", &io::Error::new(ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind, ExtractionErrorKind::NotFound);
        assert_eq!(err.status(), Status::Failed(FailureKind::NotFound));
    }

    #[test]
    fn from_io_permission_is_not_read() {
        let err = ExtractionError::from_io("a.txt", &io::Error::new(ErrorKind::PermissionDenied, "no"));
        assert_eq!(err.kind, ExtractionErrorKind::NotRead);
        assert_eq!(err.status(), Status::Failed(FailureKind::NotRead));
    }

    #[test]
    fn too_large_is_skipped() {
        let err = ExtractionError::new(ExtractionErrorKind::TooLarge, "big.bin", "3 GiB");
        assert_eq!(err.status(), Status::Skipped);
    }

    #[test]
    fn extraction_display_includes_path() {
        let err = ExtractionError::new(ExtractionErrorKind::NotParsed, "x/y.dat", "binary content");
        let msg = format!("{err}");
        assert!(msg.contains("x/y.dat"));
        assert!(msg.contains("not parsed"));
    }

    #[test]
    fn scan_error_display_root() {
        let err = ScanError::Root {
            root: PathBuf::from("/nope"),
            source: io::Error::new(ErrorKind::NotFound, "missing"),
        };
        assert!(format!("{err}").starts_with("/nope"));
    }

    #[test]
    fn queue_error_io_source() {
        use std::error::Error;
        let err = QueueError::from(io::Error::other("disk"));
        assert!(err.source().is_some());
        assert!(QueueError::Closed.source().is_none());
    }
}
