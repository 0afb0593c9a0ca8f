//! # Corpus records
//!
//! A corpus is a list of study records exported from the Open Science Data
//! Repository: arbitrary JSON objects, one per study. The pipeline never
//! interprets their fields; each record is reduced to a **canonical text**
//! (compact JSON, fields in source order) which is both what gets embedded
//! and what gets handed back as a retrieved passage.
//!
//! Two source document shapes are accepted:
//!
//! ```text
//! [ {"accession": "OSD-1", ...}, {"accession": "OSD-2", ...} ]
//! { "OSD-1": {"accession": "OSD-1", ...}, "OSD-2": {...} }
//! ```
//!
//! In the keyed form the values are the records and the keys are dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, path::Path};
use tracing::{info, warn};

use crate::error::{RagError, Result};

/// One unit of source data. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorpusRecord {
    fields: Map<String, Value>,
}

impl CorpusRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Deterministic text form of the record.
    ///
    /// # Errors
    /// [`RagError::Data`] if the record cannot be serialized.
    pub fn canonical_text(&self) -> Result<String> {
        serde_json::to_string(&self.fields)
            .map_err(|e| RagError::Data(format!("record is not serializable: {e}")))
    }
}

impl TryFrom<Value> for CorpusRecord {
    type Error = RagError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(RagError::Data(format!(
                "expected a JSON object, found {}",
                kind_of(&other)
            ))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Turn a parsed corpus document into records.
///
/// Entries that are not objects are skipped with a warning; the document
/// itself must be an array or an object.
pub fn records_from_value(document: Value) -> Result<Vec<CorpusRecord>> {
    let entries: Vec<Value> = match document {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        other => {
            return Err(RagError::Data(format!(
                "corpus must be an array or an object, found {}",
                kind_of(&other)
            )));
        }
    };

    let total = entries.len();
    let records: Vec<CorpusRecord> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| match CorpusRecord::try_from(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(position, error = %e, "skipping corpus entry");
                None
            }
        })
        .collect();

    info!(total, kept = records.len(), "corpus parsed");
    Ok(records)
}

/// Load a corpus from a JSON file.
pub fn load_corpus(path: impl AsRef<Path>) -> Result<Vec<CorpusRecord>> {
    let content = fs::read_to_string(path.as_ref())?;
    let document: Value = serde_json::from_str(&content)?;
    records_from_value(document)
}

/// Fetch a corpus document over HTTP.
pub async fn fetch_corpus(url: &str) -> Result<Vec<CorpusRecord>> {
    let document: Value = reqwest::get(url)
        .await?
        .error_for_status()?
        .json()
        .await?;
    records_from_value(document)
}

/// Load from `source`, fetching when it looks like a URL.
pub async fn load_corpus_source(source: &str) -> Result<Vec<CorpusRecord>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        fetch_corpus(source).await
    } else {
        load_corpus(source)
    }
}
