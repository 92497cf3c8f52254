//! Extractor contract and the plain-text extractor

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entry::PathEntry;
use crate::error::{ExtractionError, ExtractionErrorKind};

/// Bytes inspected when sniffing for binary content
const SNIFF_LEN: usize = 8 * 1024;

/// Extracted text and metadata for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    /// Stable identifier derived from the path
    pub id: String,
    pub path: PathEntry,
    #[serde(skip)]
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl Document {
    pub fn new(path: PathEntry, text: String) -> Self {
        Self {
            id: document_id(&path),
            path,
            text,
            metadata: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }
}

/// blake3 hex digest of the path. Same path, same id, across runs.
pub fn document_id(path: &PathEntry) -> String {
    blake3::hash(path.to_key().as_bytes()).to_hex().to_string()
}

/// Turns a queued path into a document.
///
/// Implementations are shared by every worker.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &PathEntry) -> Result<Document, ExtractionError>;
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Directory relative entries are resolved against
    pub working_dir: Option<PathBuf>,
    pub include_metadata: bool,
    /// Larger files are skipped
    pub max_file_size: Option<u64>,
    /// Fields set on every document
    pub tags: BTreeMap<String, String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            include_metadata: true,
            max_file_size: None,
            tags: BTreeMap::new(),
        }
    }
}

/// Reads files as text. Binary content is rejected as unparsable.
#[derive(Debug, Clone, Default)]
pub struct TextExtractor {
    config: ExtractorConfig,
}

impl TextExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn resolve(&self, path: &PathEntry) -> PathBuf {
        match &self.config.working_dir {
            Some(dir) if path.as_path().is_relative() => dir.join(path.as_path()),
            _ => path.as_path().to_path_buf(),
        }
    }
}

impl Extractor for TextExtractor {
    fn extract(&self, path: &PathEntry) -> Result<Document, ExtractionError> {
        let file = self.resolve(path);
        let meta = fs::metadata(&file).map_err(|e| ExtractionError::from_io(&file, &e))?;
        if !meta.is_file() {
            return Err(ExtractionError::new(
                ExtractionErrorKind::NotRead,
                &file,
                "not a regular file",
            ));
        }
        if let Some(max) = self.config.max_file_size {
            if meta.len() > max {
                return Err(ExtractionError::new(
                    ExtractionErrorKind::TooLarge,
                    &file,
                    format!("{} bytes exceeds limit of {max}", meta.len()),
                ));
            }
        }

        let bytes = fs::read(&file).map_err(|e| ExtractionError::from_io(&file, &e))?;
        if looks_binary(&bytes) {
            return Err(ExtractionError::new(
                ExtractionErrorKind::NotParsed,
                &file,
                "binary content",
            ));
        }

        let mut doc = Document::new(path.clone(), String::from_utf8_lossy(&bytes).into_owned());
        if self.config.include_metadata {
            doc.metadata = file_metadata(&file, &meta);
        }
        doc.tags = self.config.tags.clone();
        Ok(doc)
    }
}

/// NUL byte near the start, as git does it
fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_LEN)].contains(&0)
}

fn file_metadata(file: &Path, meta: &fs::Metadata) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(name) = file.file_name() {
        out.insert("name".to_string(), name.to_string_lossy().into_owned());
    }
    out.insert("size".to_string(), meta.len().to_string());
    out.insert("content_type".to_string(), content_type(file).to_string());
    if let Ok(modified) = meta.modified() {
        let modified: DateTime<Utc> = modified.into();
        out.insert("modified".to_string(), modified.to_rfc3339());
    }
    out
}

/// Content type from the extension. Anything that got past the binary
/// check without a known extension is treated as plain text.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "eml" => "message/rfc822",
        _ => "text/plain",
    }
}
