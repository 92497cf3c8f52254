//! Row accumulators turning documents into Arrow `RecordBatch`es

use std::sync::{Arc, LazyLock};

use arrow::array::{ArrayRef, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;

use crate::extract::Document;

/// Default batch size for flushing accumulated rows into a `RecordBatch`.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Accumulator trait for batch processing of rows into Arrow `RecordBatch`.
pub trait Accumulator {
    type Row;

    /// Push a row into the accumulator
    fn push(&mut self, row: Self::Row);

    /// Number of rows currently buffered
    fn len(&self) -> usize;

    /// Check if buffer is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if buffer is full and should be flushed
    fn is_full(&self) -> bool {
        self.len() >= DEFAULT_BATCH_SIZE
    }

    /// Take buffered rows as a RecordBatch, resetting internal state
    fn take_batch(&mut self) -> Result<RecordBatch, ArrowError>;
}

/// Schema of extracted documents
pub static DOCUMENTS: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("path", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        // metadata and tags as JSON objects
        Field::new("metadata_json", DataType::Utf8, true),
        Field::new("tags_json", DataType::Utf8, true),
    ]))
});

/// Columnar buffer of documents
pub struct DocumentAccumulator {
    schema: Arc<Schema>,
    batch_size: usize,
    id: Vec<String>,
    path: Vec<String>,
    text: Vec<String>,
    metadata_json: Vec<Option<String>>,
    tags_json: Vec<Option<String>>,
}

impl DocumentAccumulator {
    pub fn new(batch_size: usize) -> Self {
        Self {
            schema: DOCUMENTS.clone(),
            batch_size: batch_size.max(1),
            id: Vec::with_capacity(batch_size),
            path: Vec::with_capacity(batch_size),
            text: Vec::with_capacity(batch_size),
            metadata_json: Vec::with_capacity(batch_size),
            tags_json: Vec::with_capacity(batch_size),
        }
    }
}

impl Default for DocumentAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

fn json_or_null<T: serde::Serialize>(map: &std::collections::BTreeMap<String, T>) -> Option<String> {
    if map.is_empty() {
        None
    } else {
        serde_json::to_string(map).ok()
    }
}

impl Accumulator for DocumentAccumulator {
    type Row = Document;

    fn push(&mut self, doc: Document) {
        self.metadata_json.push(json_or_null(&doc.metadata));
        self.tags_json.push(json_or_null(&doc.tags));
        self.id.push(doc.id);
        self.path.push(doc.path.to_key());
        self.text.push(doc.text);
    }

    fn len(&self) -> usize {
        self.id.len()
    }

    fn is_full(&self) -> bool {
        self.id.len() >= self.batch_size
    }

    fn take_batch(&mut self) -> Result<RecordBatch, ArrowError> {
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(std::mem::take(&mut self.id))),
            Arc::new(StringArray::from(std::mem::take(&mut self.path))),
            Arc::new(StringArray::from(std::mem::take(&mut self.text))),
            Arc::new(StringArray::from(std::mem::take(&mut self.metadata_json))),
            Arc::new(StringArray::from(std::mem::take(&mut self.tags_json))),
        ];
        RecordBatch::try_new(self.schema.clone(), arrays)
    }
}
