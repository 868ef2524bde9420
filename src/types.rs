//! Core wiring types shared across the engine.
//!
//! - [`Destination`]: where one routed value lands in a downstream call —
//!   a positional index or a keyword. Decided once while materializing a
//!   node's input map, never re-parsed at invocation time.
//! - [`StorageFormat`] / [`StorageSpec`]: how output slots are persisted.

use rustc_hash::FxHashMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Where a routed input value lands in the receiving node's call.
///
/// In configuration documents a destination is written either as a
/// non-negative integer (positional index) or a string (keyword name):
///
/// ```yaml
/// input_map:
///   splitter:
///     train: 0        # first positional argument
///     labels: y       # keyword argument `y`
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Positional argument at the given index.
    Positional(usize),
    /// Keyword argument with the given name.
    Keyword(String),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Positional(i) => write!(f, "positional #{i}"),
            Destination::Keyword(name) => write!(f, "keyword `{name}`"),
        }
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Destination::Positional(i) => serializer.serialize_u64(*i as u64),
            Destination::Keyword(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u64),
            Name(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Index(i) => usize::try_from(i)
                .map(Destination::Positional)
                .map_err(|_| D::Error::custom(format!("positional index {i} out of range"))),
            Raw::Name(name) => Ok(Destination::Keyword(name)),
        }
    }
}

/// On-disk storage format for one output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Structured text, `.json`.
    Json,
    /// Tabular data, `.csv`.
    Csv,
    /// N-dimensional array, NumPy `.npy`.
    Npy,
    /// Opaque binary snapshot, `.bin`. Configuration may also spell this
    /// `pickle`, the original tool's tag for the same role.
    #[serde(alias = "pickle")]
    Bin,
}

impl StorageFormat {
    /// File extension written for (and recognized as) this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::Json => "json",
            StorageFormat::Csv => "csv",
            StorageFormat::Npy => "npy",
            StorageFormat::Bin => "bin",
        }
    }

    /// Recognize a format from a file extension during cache loading.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(StorageFormat::Json),
            "csv" => Some(StorageFormat::Csv),
            "npy" => Some(StorageFormat::Npy),
            "bin" => Some(StorageFormat::Bin),
            _ => None,
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A node's `output_storage_type` declaration: either one format applied to
/// every slot, or an explicit per-slot mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StorageSpec {
    Uniform(StorageFormat),
    PerSlot(FxHashMap<String, StorageFormat>),
}

impl StorageSpec {
    /// Format declared for the given slot, if any.
    #[must_use]
    pub fn format_for(&self, slot: &str) -> Option<StorageFormat> {
        match self {
            StorageSpec::Uniform(fmt) => Some(*fmt),
            StorageSpec::PerSlot(map) => map.get(slot).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn destination_from_config_values() {
        let d: Destination = serde_json::from_value(json!(2)).unwrap();
        assert_eq!(d, Destination::Positional(2));
        let d: Destination = serde_json::from_value(json!("x")).unwrap();
        assert_eq!(d, Destination::Keyword("x".into()));
        assert!(serde_json::from_value::<Destination>(json!(-1)).is_err());
    }

    #[test]
    fn storage_format_tags() {
        let f: StorageFormat = serde_json::from_value(json!("pickle")).unwrap();
        assert_eq!(f, StorageFormat::Bin);
        let f: StorageFormat = serde_json::from_value(json!("npy")).unwrap();
        assert_eq!(f, StorageFormat::Npy);
        assert_eq!(StorageFormat::from_extension("csv"), Some(StorageFormat::Csv));
        assert_eq!(StorageFormat::from_extension("txt"), None);
    }

    #[test]
    fn storage_spec_lookup() {
        let uniform: StorageSpec = serde_json::from_value(json!("json")).unwrap();
        assert_eq!(uniform.format_for("anything"), Some(StorageFormat::Json));

        let per_slot: StorageSpec =
            serde_json::from_value(json!({"model": "pickle", "scores": "csv"})).unwrap();
        assert_eq!(per_slot.format_for("model"), Some(StorageFormat::Bin));
        assert_eq!(per_slot.format_for("missing"), None);
    }
}
