//! Persistent per-node output storage.
//!
//! Each cached node owns a directory under the run's save path:
//!
//! ```text
//! <save_path>/execution_state/<node>/run_state.json     last-run marker
//! <save_path>/execution_state/<node>/output/<slot>.<ext> one file per slot
//! ```
//!
//! The slot file extension encodes its format, so loading needs no sidecar
//! metadata: the directory listing *is* the cache manifest. A node with a
//! run-state marker but no output directory represents "ran before, outputs
//! not persisted" — that distinction drives the forced-skip policy.

mod npy;

pub use npy::NpyError;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::types::{StorageFormat, StorageSpec};
use crate::value::{Outputs, SlotValue, Table};

/// Directory under the save path holding all per-node state.
pub const STATE_DIR: &str = "execution_state";
/// Per-node marker recording the last completed run.
pub const RUN_STATE_FILE: &str = "run_state.json";
/// Per-node directory of persisted output slots.
pub const OUTPUT_DIR: &str = "output";

/// Errors from persisting or loading node outputs.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("storage I/O failure at {path}")]
    #[diagnostic(code(pipegraph::store::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}")]
    #[diagnostic(code(pipegraph::store::json))]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid CSV in {path}")]
    #[diagnostic(code(pipegraph::store::csv))]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to encode binary snapshot for {path}")]
    #[diagnostic(code(pipegraph::store::encode))]
    Encode {
        path: PathBuf,
        #[source]
        source: ciborium::ser::Error<std::io::Error>,
    },

    #[error("invalid binary snapshot in {path}")]
    #[diagnostic(code(pipegraph::store::decode))]
    Decode {
        path: PathBuf,
        #[source]
        source: ciborium::de::Error<std::io::Error>,
    },

    #[error("invalid array file {path}")]
    #[diagnostic(code(pipegraph::store::npy))]
    Npy {
        path: PathBuf,
        #[source]
        source: NpyError,
    },

    /// A slot's declared format cannot represent the value it holds.
    #[error("slot `{slot}` holds a {kind} value, which the `{format}` format cannot store")]
    #[diagnostic(
        code(pipegraph::store::format_mismatch),
        help("Match output_storage_type to the value kind: json, csv for tables, npy for arrays, bin for anything.")
    )]
    FormatMismatch {
        slot: String,
        format: StorageFormat,
        kind: &'static str,
    },

    /// A per-slot storage mapping omits one of the produced slots.
    #[error("no storage format declared for output slot `{slot}`")]
    #[diagnostic(code(pipegraph::store::no_format_for_slot))]
    NoFormatForSlot { slot: String },

    /// The tabular field separator must be a single-byte character.
    #[error("field separator {sep:?} is not a single-byte ASCII character")]
    #[diagnostic(code(pipegraph::store::bad_separator))]
    BadSeparator { sep: char },
}

/// Last-run marker persisted alongside a node's outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunState {
    last_run: DateTime<Utc>,
}

/// What the store knows about a node from a previous run.
#[derive(Debug, Clone, Default)]
pub struct CachedNode {
    /// `Some` iff an output directory exists for the node, loaded in full.
    pub outputs: Option<Outputs>,
    /// `Some` iff a run-state marker exists.
    pub last_run: Option<DateTime<Utc>>,
}

/// Filesystem-backed output store rooted at one save path.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
    delimiter: u8,
}

impl OutputStore {
    /// Create a store rooted at `save_path`, using `field_sep` for tabular
    /// slots. Directories are created lazily on first save.
    pub fn new(save_path: impl Into<PathBuf>, field_sep: char) -> Result<Self, StorageError> {
        if !field_sep.is_ascii() {
            return Err(StorageError::BadSeparator { sep: field_sep });
        }
        Ok(Self {
            root: save_path.into().join(STATE_DIR),
            delimiter: field_sep as u8,
        })
    }

    fn node_dir(&self, node: &str) -> PathBuf {
        self.root.join(node)
    }

    /// Load whatever prior state exists for `node`. Absent directories are
    /// not errors; they mean the node has never persisted anything.
    #[instrument(skip(self))]
    pub fn load(&self, node: &str) -> Result<CachedNode, StorageError> {
        let dir = self.node_dir(node);
        let last_run = self.load_run_state(&dir)?;
        let output_dir = dir.join(OUTPUT_DIR);
        if !output_dir.is_dir() {
            return Ok(CachedNode {
                outputs: None,
                last_run,
            });
        }

        let mut outputs = Outputs::default();
        let entries = fs::read_dir(&output_dir).map_err(|source| StorageError::Io {
            path: output_dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                path: output_dir.clone(),
                source,
            })?;
            let path = entry.path();
            // the cache is loaded by recognized extension; anything else
            // (editor backups, .DS_Store) is not ours to interpret
            let Some((slot, format)) = slot_and_format(&path) else {
                warn!(node, path = %path.display(), "ignoring unrecognized file in output directory");
                continue;
            };
            let value = self.load_slot(&path, format)?;
            outputs.insert(slot, value);
        }
        debug!(node, slots = outputs.len(), "loaded cached outputs");
        Ok(CachedNode {
            outputs: Some(outputs),
            last_run,
        })
    }

    /// Persist a node's complete outputs under the declared storage spec and
    /// stamp its run-state marker. Returns the recorded timestamp.
    #[instrument(skip(self, outputs, spec))]
    pub fn save(
        &self,
        node: &str,
        outputs: &Outputs,
        spec: &StorageSpec,
    ) -> Result<DateTime<Utc>, StorageError> {
        let output_dir = self.node_dir(node).join(OUTPUT_DIR);
        fs::create_dir_all(&output_dir).map_err(|source| StorageError::Io {
            path: output_dir.clone(),
            source,
        })?;

        for (slot, value) in outputs {
            let format = spec
                .format_for(slot)
                .ok_or_else(|| StorageError::NoFormatForSlot { slot: slot.clone() })?;
            let path = output_dir.join(format!("{slot}.{}", format.extension()));
            self.save_slot(&path, slot, value, format)?;
        }

        let stamp = Utc::now();
        self.write_run_state(node, stamp)?;
        debug!(node, slots = outputs.len(), "persisted outputs");
        Ok(stamp)
    }

    /// Stamp the run-state marker without touching outputs.
    pub fn write_run_state(&self, node: &str, stamp: DateTime<Utc>) -> Result<(), StorageError> {
        let dir = self.node_dir(node);
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(RUN_STATE_FILE);
        let state = RunState { last_run: stamp };
        let json = serde_json::to_string_pretty(&state).map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| StorageError::Io { path, source })
    }

    fn load_run_state(&self, dir: &Path) -> Result<Option<DateTime<Utc>>, StorageError> {
        let path = dir.join(RUN_STATE_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        let state: RunState =
            serde_json::from_str(&text).map_err(|source| StorageError::Json { path, source })?;
        Ok(Some(state.last_run))
    }

    fn save_slot(
        &self,
        path: &Path,
        slot: &str,
        value: &SlotValue,
        format: StorageFormat,
    ) -> Result<(), StorageError> {
        let mismatch = || StorageError::FormatMismatch {
            slot: slot.to_string(),
            format,
            kind: value.kind(),
        };
        match format {
            StorageFormat::Json => {
                let json = value.as_json().ok_or_else(mismatch)?;
                let text =
                    serde_json::to_string_pretty(json).map_err(|source| StorageError::Json {
                        path: path.to_path_buf(),
                        source,
                    })?;
                fs::write(path, text).map_err(|source| StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
            StorageFormat::Csv => {
                let table = value.as_table().ok_or_else(mismatch)?;
                self.write_table(path, table)
            }
            StorageFormat::Npy => {
                let array = value.as_array().ok_or_else(mismatch)?;
                let file = fs::File::create(path).map_err(|source| StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let mut writer = BufWriter::new(file);
                npy::write_npy(&mut writer, array).map_err(|source| StorageError::Npy {
                    path: path.to_path_buf(),
                    source,
                })?;
                writer.flush().map_err(|source| StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
            // the tagged value itself is encoded, so any variant round-trips
            StorageFormat::Bin => {
                let file = fs::File::create(path).map_err(|source| StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                ciborium::ser::into_writer(value, BufWriter::new(file)).map_err(|source| {
                    StorageError::Encode {
                        path: path.to_path_buf(),
                        source,
                    }
                })
            }
        }
    }

    fn load_slot(&self, path: &Path, format: StorageFormat) -> Result<SlotValue, StorageError> {
        match format {
            StorageFormat::Json => {
                let text = fs::read_to_string(path).map_err(|source| StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let json = serde_json::from_str(&text).map_err(|source| StorageError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(SlotValue::Json(json))
            }
            StorageFormat::Csv => Ok(SlotValue::Table(self.read_table(path)?)),
            StorageFormat::Npy => {
                let file = fs::File::open(path).map_err(|source| StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let array =
                    npy::read_npy(BufReader::new(file)).map_err(|source| StorageError::Npy {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Ok(SlotValue::Array(array))
            }
            StorageFormat::Bin => {
                let file = fs::File::open(path).map_err(|source| StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                ciborium::de::from_reader(BufReader::new(file)).map_err(|source| {
                    StorageError::Decode {
                        path: path.to_path_buf(),
                        source,
                    }
                })
            }
        }
    }

    fn write_table(&self, path: &Path, table: &Table) -> Result<(), StorageError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(path)
            .map_err(|source| StorageError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        let csv_err = |source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        };
        writer.write_record(&table.columns).map_err(csv_err)?;
        for row in &table.rows {
            writer.write_record(row).map_err(csv_err)?;
        }
        writer.flush().map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_table(&self, path: &Path) -> Result<Table, StorageError> {
        let csv_err = |source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .from_path(path)
            .map_err(csv_err)?;
        let columns = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();
        let mut table = Table::new(columns);
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            table.push_row(record.iter());
        }
        Ok(table)
    }
}

fn slot_and_format(path: &Path) -> Option<(String, StorageFormat)> {
    if !path.is_file() {
        return None;
    }
    let slot = path.file_stem().and_then(|s| s.to_str())?;
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(StorageFormat::from_extension)?;
    Some((slot.to_string(), format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{outputs, NdArray};
    use serde_json::json;

    fn store(dir: &tempfile::TempDir, sep: char) -> OutputStore {
        OutputStore::new(dir.path(), sep).unwrap()
    }

    #[test]
    fn fresh_node_has_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let cached = store(&dir, ',').load("never_ran").unwrap();
        assert!(cached.outputs.is_none());
        assert!(cached.last_run.is_none());
    }

    #[test]
    fn uniform_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ',');
        let out = outputs([("score", json!(0.9)), ("labels", json!(["a", "b"]))]);
        let stamp = store
            .save("scorer", &out, &StorageSpec::Uniform(StorageFormat::Json))
            .unwrap();

        let cached = store.load("scorer").unwrap();
        assert_eq!(cached.outputs, Some(out));
        assert_eq!(cached.last_run, Some(stamp));
    }

    #[test]
    fn per_slot_formats_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ';');

        let mut table = Table::new(vec!["id".into(), "label".into()]);
        table.push_row(["1", "spam"]);
        table.push_row(["2", "ham; maybe"]);
        let array = NdArray::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = outputs([
            ("frame", SlotValue::Table(table)),
            ("weights", SlotValue::Array(array)),
            ("model", SlotValue::Blob(vec![0xde, 0xad])),
            ("meta", SlotValue::Json(json!({"epochs": 3}))),
        ]);

        let mut per_slot = rustc_hash::FxHashMap::default();
        per_slot.insert("frame".to_string(), StorageFormat::Csv);
        per_slot.insert("weights".to_string(), StorageFormat::Npy);
        per_slot.insert("model".to_string(), StorageFormat::Bin);
        per_slot.insert("meta".to_string(), StorageFormat::Json);
        store
            .save("trainer", &out, &StorageSpec::PerSlot(per_slot))
            .unwrap();

        let cached = store.load("trainer").unwrap();
        assert_eq!(cached.outputs, Some(out));
    }

    #[test]
    fn bin_preserves_every_variant() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ',');
        let out = outputs([
            ("j", SlotValue::Json(json!([1, 2]))),
            ("a", SlotValue::Array(NdArray::vector(vec![9.0]))),
        ]);
        store
            .save("snap", &out, &StorageSpec::Uniform(StorageFormat::Bin))
            .unwrap();
        let cached = store.load("snap").unwrap();
        assert_eq!(cached.outputs, Some(out));
    }

    #[test]
    fn format_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ',');
        let out = outputs([("blob", SlotValue::Blob(vec![1]))]);
        let err = store
            .save("m", &out, &StorageSpec::Uniform(StorageFormat::Json))
            .unwrap_err();
        assert!(matches!(err, StorageError::FormatMismatch { .. }));
    }

    #[test]
    fn per_slot_spec_must_cover_every_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ',');
        let out = outputs([("a", 1i64), ("b", 2i64)]);
        let mut per_slot = rustc_hash::FxHashMap::default();
        per_slot.insert("a".to_string(), StorageFormat::Json);
        let err = store
            .save("m", &out, &StorageSpec::PerSlot(per_slot))
            .unwrap_err();
        assert!(matches!(err, StorageError::NoFormatForSlot { .. }));
    }

    #[test]
    fn foreign_files_in_the_output_directory_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ',');
        let out = outputs([("score", json!(0.9))]);
        store
            .save("scorer", &out, &StorageSpec::Uniform(StorageFormat::Json))
            .unwrap();

        let output_dir = dir
            .path()
            .join(STATE_DIR)
            .join("scorer")
            .join(OUTPUT_DIR);
        std::fs::write(output_dir.join(".DS_Store"), b"junk").unwrap();
        std::fs::write(output_dir.join("score.json~"), b"backup").unwrap();

        let cached = store.load("scorer").unwrap();
        assert_eq!(cached.outputs, Some(out));
    }

    #[test]
    fn run_state_without_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, ',');
        store.write_run_state("marker_only", Utc::now()).unwrap();
        let cached = store.load("marker_only").unwrap();
        assert!(cached.outputs.is_none());
        assert!(cached.last_run.is_some());
    }

    #[test]
    fn non_ascii_separator_is_rejected() {
        assert!(matches!(
            OutputStore::new("/tmp/x", '→'),
            Err(StorageError::BadSeparator { .. })
        ));
    }
}
