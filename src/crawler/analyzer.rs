//! Content analysis seam
//!
//! Keyword and entity extraction is done by an external analyzer. The
//! pipeline hands it the extracted page text and URL and merges whatever
//! scalar metadata it returns into the page record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(v) => write!(f, "{}", v),
            MetadataValue::Integer(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        MetadataValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// String-keyed scalar metadata, ordered by key
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Turns page text into metadata
///
/// Implementations must not fail: empty text yields an empty map.
pub trait ContentAnalyzer: Send + Sync {
    fn analyze(&self, text: &str, url: &str) -> Metadata;
}

/// Analyzer that contributes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalyzer;

impl ContentAnalyzer for NullAnalyzer {
    fn analyze(&self, _text: &str, _url: &str) -> Metadata {
        Metadata::new()
    }
}
