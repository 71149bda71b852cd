//! # Source documents
//!
//! A [`Document`] is one passage of reference text plus string metadata describing
//! where it came from. Documents are produced from a CSV dataset: one per non-empty
//! cell of the configured column, in file row order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{RagError, Result};

/// Metadata key holding the zero-based data row a document came from.
pub const ROW_KEY: &str = "row";
/// Metadata key holding the column a document came from.
pub const COLUMN_KEY: &str = "column";
/// Metadata key holding the dataset file a document came from.
pub const SOURCE_KEY: &str = "source";

/// One embeddable passage of text.
///
/// # Examples
/// ```rust
/// use sage_rag::dataset::Document;
///
/// let doc = Document::new("Be kind.");
/// assert_eq!(doc.text, "Be kind.");
/// assert!(doc.source_metadata.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source_metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source_metadata.insert(key.into(), value.into());
        self
    }
}

/// Read every non-empty cell of `column` from the CSV file at `path`.
///
/// # Errors
/// [`RagError::Dataset`] if the file cannot be opened or parsed, or if the header row has
/// no column named `column`.
pub fn load_documents(path: &Path, column: &str) -> Result<Vec<Document>> {
    info!("Reading dataset {} (column `{}`)", path.display(), column);
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| RagError::Dataset(format!("cannot open {}: {e}", path.display())))?;

    let documents = documents_from_reader(reader, column, &path.to_string_lossy())?;
    info!("Loaded {} documents", documents.len());
    Ok(documents)
}

/// Same as [`load_documents`] but over an arbitrary reader.
pub fn documents_from_reader<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    column: &str,
    source: &str,
) -> Result<Vec<Document>> {
    let headers = reader.headers()?.clone();
    let column_idx = headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| {
            RagError::Dataset(format!(
                "column `{column}` not found (available: {})",
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;

    let mut documents = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let Some(cell) = record.get(column_idx) else {
            debug!("Row {} has no `{}` cell, skipping", row, column);
            continue;
        };
        // only truly empty cells are missing values; whitespace is kept as written
        if cell.is_empty() {
            continue;
        }
        documents.push(
            Document::new(cell)
                .with_metadata(ROW_KEY, row.to_string())
                .with_metadata(COLUMN_KEY, column)
                .with_metadata(SOURCE_KEY, source),
        );
    }

    Ok(documents)
}
