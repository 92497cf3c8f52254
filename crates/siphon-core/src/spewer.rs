//! Output side: where extracted documents go

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::DeliveryError;
use crate::extract::Document;

/// Delivers documents. Opened before a run, closed after it; shared by
/// every worker in between.
pub trait Spewer: Send + Sync {
    fn write(&self, doc: &Document) -> Result<(), DeliveryError>;

    /// Flush and release. Idempotent.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Stand-in for `..` in output paths
const PARENT_SEGMENT: &str = "__up";

/// Writes `<out>/<path>.txt`, plus `<path>.json` metadata when enabled.
///
/// The queued path is mirrored under the output directory, so distinct
/// inputs never collide. Each file goes through tmp→rename.
#[derive(Debug)]
pub struct FileSpewer {
    output_dir: PathBuf,
    write_metadata: bool,
}

impl FileSpewer {
    pub fn new(output_dir: &Path, write_metadata: bool) -> io::Result<Self> {
        fs::create_dir_all(output_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            write_metadata,
        })
    }

    /// Output location without extension
    fn target(&self, doc: &Document) -> PathBuf {
        // Root and prefix components dropped: absolute inputs still land inside output_dir.
        // `..` becomes a literal segment so it neither escapes nor collides.
        let relative: PathBuf = doc
            .path
            .as_path()
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                Component::ParentDir => Some(OsStr::new(PARENT_SEGMENT)),
                _ => None,
            })
            .collect();
        self.output_dir.join(relative)
    }
}

impl Spewer for FileSpewer {
    fn write(&self, doc: &Document) -> Result<(), DeliveryError> {
        let target = self.target(doc);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&with_suffix(&target, ".txt"), doc.text.as_bytes())?;
        if self.write_metadata {
            let json = serde_json::to_vec_pretty(doc).map_err(|e| DeliveryError::Encode(e.to_string()))?;
            write_atomic(&with_suffix(&target, ".json"), &json)?;
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = with_suffix(path, ".tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_data()?;
    fs::rename(&tmp, path)
}

/// Streams document text to a writer, stdout by default.
pub struct PrintSpewer<W: Write + Send> {
    out: Mutex<W>,
    write_metadata: bool,
}

impl PrintSpewer<io::Stdout> {
    pub fn stdout(write_metadata: bool) -> Self {
        Self::new(io::stdout(), write_metadata)
    }
}

impl<W: Write + Send> PrintSpewer<W> {
    pub fn new(out: W, write_metadata: bool) -> Self {
        Self {
            out: Mutex::new(out),
            write_metadata,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Spewer for PrintSpewer<W> {
    fn write(&self, doc: &Document) -> Result<(), DeliveryError> {
        // One document at a time so concurrent workers never interleave
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if self.write_metadata {
            let json = serde_json::to_string(doc).map_err(|e| DeliveryError::Encode(e.to_string()))?;
            writeln!(out, "{json}")?;
        }
        out.write_all(doc.text.as_bytes())?;
        if !doc.text.ends_with('\n') {
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.out.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}
