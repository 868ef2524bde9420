//! Slot value model for node inputs and outputs.
//!
//! Every value flowing along a graph edge is a [`SlotValue`]: one variant per
//! persistable storage format. Nodes return an [`Outputs`] mapping (slot name
//! to value); the scheduler routes those values into downstream call
//! arguments, and the output store persists them by format.
//!
//! # Examples
//!
//! ```
//! use pipegraph::value::{SlotValue, outputs};
//!
//! let out = outputs([("score", SlotValue::from(0.93)), ("label", SlotValue::from("spam"))]);
//! assert_eq!(out["score"].as_f64(), Some(0.93));
//! assert_eq!(out["label"].as_str(), Some("spam"));
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A node's complete output mapping: slot name → value.
///
/// Invariant: a node's outputs are either entirely absent or a complete,
/// immutable mapping. Partial outputs never exist in the graph.
pub type Outputs = FxHashMap<String, SlotValue>;

/// Build an [`Outputs`] mapping from `(slot, value)` pairs.
pub fn outputs<K, V, I>(pairs: I) -> Outputs
where
    K: Into<String>,
    V: Into<SlotValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// One value in a node's output mapping.
///
/// The variants mirror the four on-disk storage formats: structured text,
/// tabular data, n-dimensional arrays, and opaque bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotValue {
    /// Structured data, persisted as `.json`.
    Json(serde_json::Value),
    /// Tabular data (header row + string cells), persisted as `.csv`.
    Table(Table),
    /// N-dimensional `f64` array, persisted as `.npy`.
    Array(NdArray),
    /// Opaque bytes, persisted as `.bin`.
    Blob(Vec<u8>),
}

impl SlotValue {
    /// Short label for the variant, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SlotValue::Json(_) => "json",
            SlotValue::Table(_) => "table",
            SlotValue::Array(_) => "array",
            SlotValue::Blob(_) => "blob",
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            SlotValue::Json(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            SlotValue::Table(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            SlotValue::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            SlotValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Integer view of a `Json` number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(serde_json::Value::as_i64)
    }

    /// Float view of a `Json` number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(serde_json::Value::as_f64)
    }

    /// String view of a `Json` string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(serde_json::Value::as_str)
    }
}

impl From<serde_json::Value> for SlotValue {
    fn from(v: serde_json::Value) -> Self {
        SlotValue::Json(v)
    }
}

impl From<i64> for SlotValue {
    fn from(v: i64) -> Self {
        SlotValue::Json(v.into())
    }
}

impl From<f64> for SlotValue {
    fn from(v: f64) -> Self {
        SlotValue::Json(v.into())
    }
}

impl From<bool> for SlotValue {
    fn from(v: bool) -> Self {
        SlotValue::Json(v.into())
    }
}

impl From<&str> for SlotValue {
    fn from(v: &str) -> Self {
        SlotValue::Json(v.into())
    }
}

impl From<String> for SlotValue {
    fn from(v: String) -> Self {
        SlotValue::Json(v.into())
    }
}

impl From<Table> for SlotValue {
    fn from(t: Table) -> Self {
        SlotValue::Table(t)
    }
}

impl From<NdArray> for SlotValue {
    fn from(a: NdArray) -> Self {
        SlotValue::Array(a)
    }
}

impl From<Vec<u8>> for SlotValue {
    fn from(b: Vec<u8>) -> Self {
        SlotValue::Blob(b)
    }
}

/// Tabular data: one header row plus string cells.
///
/// Cells are kept as strings so that a save/load cycle through the tabular
/// store preserves field identity exactly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Dense n-dimensional `f64` array in row-major (C) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// A shape whose element count disagrees with the data length.
#[derive(Debug, Error, Diagnostic)]
#[error("shape {shape:?} describes {expected} elements but {actual} were provided")]
#[diagnostic(code(pipegraph::value::shape_mismatch))]
pub struct ShapeError {
    pub shape: Vec<usize>,
    pub expected: usize,
    pub actual: usize,
}

impl NdArray {
    /// Create an array, validating that the shape matches the data length.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, ShapeError> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != data.len() {
            return Err(ShapeError {
                expected,
                actual: data.len(),
                shape,
            });
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array over the given data.
    #[must_use]
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
