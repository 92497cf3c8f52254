//! Parquet output: buffered writer with atomic tmp→rename

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::accumulator::{Accumulator, DocumentAccumulator, DOCUMENTS};
use crate::error::DeliveryError;
use crate::extract::Document;
use crate::spewer::Spewer;

pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Buffered parquet writer with atomic tmp→rename
pub struct ParquetSink {
    writer: ArrowWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl ParquetSink {
    /// Open `<final_path>.tmp` for writing
    pub fn create(final_path: &Path, schema: &Schema, zstd_level: i32) -> io::Result<Self> {
        let mut tmp = final_path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp_path = PathBuf::from(tmp);

        // Leftover from an interrupted run
        if tmp_path.exists() {
            log::warn!("Removing stale tmp file: {}", tmp_path.display());
            fs::remove_file(&tmp_path)?;
        }
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&tmp_path)?;
        let level = ZstdLevel::try_new(zstd_level)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(64 * 1024)
            .build();

        let writer = ArrowWriter::try_new(file, Arc::new(schema.clone()), Some(props))
            .map_err(io::Error::other)?;

        Ok(Self {
            writer,
            tmp_path,
            final_path: final_path.to_path_buf(),
            row_count: 0,
        })
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> io::Result<()> {
        self.row_count += batch.num_rows();
        self.writer.write(batch).map_err(io::Error::other)
    }

    /// Flush footer and rename tmp → final
    pub fn finalize(self) -> io::Result<usize> {
        let row_count = self.row_count;
        self.writer.close().map_err(io::Error::other)?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(row_count)
    }
}

/// Check if a completed parquet file exists and has a valid footer
pub fn is_valid_parquet(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    parquet::file::reader::SerializedFileReader::new(file).is_ok()
}

struct Open {
    sink: ParquetSink,
    buffer: DocumentAccumulator,
}

/// Collects every document of a run into one parquet file.
///
/// Rows are buffered and written a batch at a time. The file only appears
/// at its final path once `close` succeeds.
pub struct ParquetSpewer {
    state: Mutex<Option<Open>>,
    path: PathBuf,
}

impl ParquetSpewer {
    /// Start a new output file. An existing file at `path` is only replaced
    /// once `close` succeeds.
    pub fn create(path: &Path, zstd_level: i32, batch_size: usize) -> io::Result<Self> {
        if path.exists() {
            if is_valid_parquet(path) {
                log::warn!("{} exists and will be replaced on completion", path.display());
            } else {
                log::warn!("{} exists but is not a complete parquet file, replacing it", path.display());
            }
        }
        let sink = ParquetSink::create(path, &DOCUMENTS, zstd_level)?;
        Ok(Self {
            state: Mutex::new(Some(Open {
                sink,
                buffer: DocumentAccumulator::new(batch_size),
            })),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn flush(open: &mut Open) -> io::Result<()> {
    if open.buffer.is_empty() {
        return Ok(());
    }
    let batch = open.buffer.take_batch().map_err(io::Error::other)?;
    open.sink.write_batch(&batch)
}

impl Spewer for ParquetSpewer {
    fn write(&self, doc: &Document) -> Result<(), DeliveryError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let open = state.as_mut().ok_or(DeliveryError::Closed)?;
        open.buffer.push(doc.clone());
        if open.buffer.is_full() {
            flush(open)?;
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        let taken = self.state.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut open) = taken else {
            return Ok(());
        };
        flush(&mut open)?;
        let rows = open.sink.finalize()?;
        log::info!("Wrote {rows} documents to {}", self.path.display());
        Ok(())
    }
}
