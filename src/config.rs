//! Configuration composition.
//!
//! A run is described by one or more YAML documents, each a mapping from
//! module name to a module entry (plus one reserved `general` section).
//! [`compose`] merges, lowest precedence first:
//!
//! 1. registered base defaults — consulted only when a module declares
//!    `base_module`;
//! 2. the ordered list of documents (later documents override earlier ones
//!    field by field);
//! 3. caller-supplied [`OverrideSet`] entries, applied last.
//!
//! Merging is a recursive structural merge: mappings merge key-wise, every
//! other value (lists included) is replaced wholesale by the higher
//! precedence side. The composed tree is built once at startup and is
//! read-only afterwards; the graph model derives its nodes from it.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{Destination, StorageSpec};

/// Name of the reserved engine-level section.
pub const GENERAL_SECTION: &str = "general";

/// Errors from loading, composing, or typing configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read configuration document {path}")]
    #[diagnostic(code(pipegraph::config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {context} as YAML")]
    #[diagnostic(code(pipegraph::config::parse))]
    Parse {
        context: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{context} is not a mapping from module name to module entry")]
    #[diagnostic(code(pipegraph::config::not_a_mapping))]
    NotAMapping { context: String },

    #[error("mapping key in {context} is not a scalar")]
    #[diagnostic(code(pipegraph::config::non_scalar_key))]
    NonScalarKey { context: String },

    #[error("module `{module}` inherits from unknown base module `{base}`")]
    #[diagnostic(
        code(pipegraph::config::unknown_base_module),
        help("Register the base entry in the BaseDefaults handed to compose().")
    )]
    UnknownBaseModule { module: String, base: String },

    #[error("override targets module `{module}`, which is absent from the composed configuration")]
    #[diagnostic(code(pipegraph::config::unknown_override_target))]
    UnknownOverrideTarget { module: String },

    #[error("module `{module}` has invalid fields")]
    #[diagnostic(code(pipegraph::config::invalid_module))]
    InvalidModule {
        module: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("the `general` section has invalid fields")]
    #[diagnostic(code(pipegraph::config::invalid_general))]
    InvalidGeneral {
        #[source]
        source: serde_json::Error,
    },

    #[error("override flag `{arg}` is malformed (expected `--<module>.<field>`)")]
    #[diagnostic(code(pipegraph::config::malformed_override))]
    MalformedOverride { arg: String },

    #[error("override flag `{flag}` has no value")]
    #[diagnostic(code(pipegraph::config::dangling_override))]
    DanglingOverride { flag: String },

    #[error("unexpected argument `{arg}` (override flags start with `--`)")]
    #[diagnostic(code(pipegraph::config::unexpected_argument))]
    UnexpectedArgument { arg: String },
}

/// Qualified target of a `class` or `function` field.
///
/// Documents spell the symbol field `class_name` or `function_name`
/// depending on the node kind; both map onto [`TargetRef::symbol`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub module: String,
    #[serde(alias = "class_name", alias = "function_name")]
    pub symbol: String,
}

impl TargetRef {
    /// The fully qualified `<namespace>.<symbol>` name for the resolver.
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.module, self.symbol)
    }
}

fn default_true() -> bool {
    true
}

/// One module's resolved configuration entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(default)]
    pub class: Option<TargetRef>,
    #[serde(default)]
    pub function: Option<TargetRef>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Pure-ordering upstream edges; no data flows along these.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// sender name → (sender output slot → destination in this node's call).
    #[serde(default)]
    pub input_map: FxHashMap<String, FxHashMap<String, Destination>>,
    #[serde(default)]
    pub output_storage_type: Option<StorageSpec>,
    #[serde(default = "default_true")]
    pub cache_output: bool,
    /// Trust a prior run-state marker and skip unconditionally.
    #[serde(default)]
    pub force_not_rerun: bool,
    #[serde(default)]
    pub bypass: bool,
    /// input identifier (keyword or stringified positional index) → output slot.
    #[serde(default)]
    pub bypass_inout_map: FxHashMap<String, String>,
    #[serde(default)]
    pub base_module: Option<String>,
}

/// The reserved `general` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub verbose: u8,
    pub save_path: PathBuf,
    /// Resolver namespaces the run expects to exist; each is ensured on the
    /// registry before graph construction (additive, idempotent).
    pub module_paths: Vec<String>,
    pub modules_root: Option<String>,
    /// Field separator for tabular slots.
    #[serde(rename = "pandas_sep")]
    pub field_sep: char,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: 1,
            save_path: PathBuf::from("."),
            module_paths: Vec::new(),
            modules_root: None,
            field_sep: ',',
        }
    }
}

/// Fully composed, typed configuration: the `general` section plus module
/// entries in declaration order. Read-only after composition.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    pub general: GeneralConfig,
    modules: FxHashMap<String, ModuleEntry>,
    order: Vec<String>,
}

impl ConfigTree {
    /// Module entries in declaration order (first appearance across the
    /// composed documents). This order is the topological tie-break.
    pub fn modules(&self) -> impl Iterator<Item = (&str, &ModuleEntry)> {
        self.order
            .iter()
            .filter_map(|name| self.modules.get(name).map(|entry| (name.as_str(), entry)))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// One parsed configuration document: module name → raw entry, in document
/// order.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocument {
    modules: Vec<(String, serde_json::Value)>,
}

/// Registry of named base-module defaults, consulted when a module entry
/// declares `base_module`.
#[derive(Debug, Clone, Default)]
pub struct BaseDefaults {
    entries: FxHashMap<String, serde_json::Value>,
}

impl BaseDefaults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a base entry under a name modules can inherit from.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        entry: serde_json::Value,
    ) -> &mut Self {
        self.entries.insert(name.into(), entry);
        self
    }

    /// Register a base entry from YAML text.
    pub fn register_yaml(
        &mut self,
        name: impl Into<String>,
        yaml: &str,
    ) -> Result<&mut Self, ConfigError> {
        let name = name.into();
        let value: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
                context: format!("base module `{name}`"),
                source,
            })?;
        let json = yaml_to_json(value, &format!("base module `{name}`"))?;
        self.entries.insert(name, json);
        Ok(self)
    }

    fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.get(name)
    }
}

#[derive(Debug, Clone)]
struct Override {
    module: String,
    path: Vec<String>,
    value: serde_json::Value,
}

impl Override {
    /// Nested single-path object suitable for the structural merge.
    fn as_overlay(&self) -> serde_json::Value {
        let mut overlay = self.value.clone();
        for segment in self.path.iter().rev() {
            let mut map = serde_json::Map::new();
            map.insert(segment.clone(), overlay);
            overlay = serde_json::Value::Object(map);
        }
        overlay
    }
}

/// Run-time overrides: the highest-precedence composition layer.
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    entries: Vec<Override>,
}

impl OverrideSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one override: `module`, a dotted field path within it, and the
    /// replacement value.
    pub fn set(
        &mut self,
        module: impl Into<String>,
        field_path: &str,
        value: serde_json::Value,
    ) -> &mut Self {
        self.entries.push(Override {
            module: module.into(),
            path: field_path.split('.').map(str::to_string).collect(),
            value,
        });
        self
    }

    /// Parse trailing command-line style overrides: repeated
    /// `--<module>.<field> <value>` pairs. Values are parsed as YAML
    /// scalars (`5` → number, `false` → bool) and fall back to strings.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let flag = flag.as_ref();
            let Some(target) = flag.strip_prefix("--") else {
                return Err(ConfigError::UnexpectedArgument {
                    arg: flag.to_string(),
                });
            };
            let Some((module, field_path)) = target.split_once('.') else {
                return Err(ConfigError::MalformedOverride {
                    arg: flag.to_string(),
                });
            };
            if module.is_empty() || field_path.is_empty() {
                return Err(ConfigError::MalformedOverride {
                    arg: flag.to_string(),
                });
            }
            let raw = iter.next().ok_or_else(|| ConfigError::DanglingOverride {
                flag: flag.to_string(),
            })?;
            let raw = raw.as_ref();
            let value = serde_yaml::from_str::<serde_json::Value>(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            set.set(module, field_path, value);
        }
        Ok(set)
    }

    fn entries(&self) -> &[Override] {
        &self.entries
    }
}

/// Parse one YAML document from text.
pub fn parse_document(yaml: &str) -> Result<ConfigDocument, ConfigError> {
    document_from_yaml(yaml, "configuration document")
}

/// Read and parse YAML documents from disk, in order.
pub fn load_documents<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<ConfigDocument>, ConfigError> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            document_from_yaml(&text, &path.display().to_string())
        })
        .collect()
}

fn document_from_yaml(yaml: &str, context: &str) -> Result<ConfigDocument, ConfigError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            context: context.to_string(),
            source,
        })?;
    let serde_yaml::Value::Mapping(mapping) = value else {
        return Err(ConfigError::NotAMapping {
            context: context.to_string(),
        });
    };
    let mut modules = Vec::with_capacity(mapping.len());
    for (key, entry) in mapping {
        let name = scalar_key(&key, context)?;
        let entry = yaml_to_json(entry, &format!("{context}, module `{name}`"))?;
        modules.push((name, entry));
    }
    Ok(ConfigDocument { modules })
}

/// Compose base defaults, ordered documents, and overrides into one typed
/// configuration tree.
pub fn compose(
    base_defaults: &BaseDefaults,
    documents: &[ConfigDocument],
    overrides: &OverrideSet,
) -> Result<ConfigTree, ConfigError> {
    let mut merged: FxHashMap<String, serde_json::Value> = FxHashMap::default();
    let mut order: Vec<String> = Vec::new();

    for doc in documents {
        for (name, value) in &doc.modules {
            match merged.get_mut(name) {
                Some(existing) => merge_value(existing, value),
                None => {
                    merged.insert(name.clone(), value.clone());
                    order.push(name.clone());
                }
            }
        }
    }

    // base_module inheritance: deep copy of the base, module fields on top
    for name in &order {
        if name == GENERAL_SECTION {
            continue;
        }
        let Some(value) = merged.get(name).cloned() else {
            continue;
        };
        let Some(base_name) = value.get("base_module").and_then(serde_json::Value::as_str)
        else {
            continue;
        };
        let base = base_defaults
            .get(base_name)
            .ok_or_else(|| ConfigError::UnknownBaseModule {
                module: name.clone(),
                base: base_name.to_string(),
            })?;
        let mut resolved = base.clone();
        merge_value(&mut resolved, &value);
        merged.insert(name.clone(), resolved);
    }

    for ov in overrides.entries() {
        let target =
            merged
                .get_mut(&ov.module)
                .ok_or_else(|| ConfigError::UnknownOverrideTarget {
                    module: ov.module.clone(),
                })?;
        merge_value(target, &ov.as_overlay());
    }

    let general = match merged.remove(GENERAL_SECTION) {
        Some(value) => serde_json::from_value(value)
            .map_err(|source| ConfigError::InvalidGeneral { source })?,
        None => GeneralConfig::default(),
    };

    let mut modules = FxHashMap::default();
    let mut module_order = Vec::new();
    for name in order {
        if name == GENERAL_SECTION {
            continue;
        }
        let Some(value) = merged.remove(&name) else {
            continue;
        };
        let entry: ModuleEntry = serde_json::from_value(value)
            .map_err(|source| ConfigError::InvalidModule {
                module: name.clone(),
                source,
            })?;
        modules.insert(name.clone(), entry);
        module_order.push(name);
    }

    Ok(ConfigTree {
        general,
        modules,
        order: module_order,
    })
}

/// Recursive structural merge: mappings merge key-wise, anything else on the
/// overlay side replaces the base value outright (lists included).
fn merge_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

fn scalar_key(key: &serde_yaml::Value, context: &str) -> Result<String, ConfigError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ConfigError::NonScalarKey {
            context: context.to_string(),
        }),
    }
}

/// Convert a YAML value to JSON, stringifying scalar mapping keys (the
/// bypass map legitimately uses integer keys for positional indexes).
fn yaml_to_json(value: serde_yaml::Value, context: &str) -> Result<serde_json::Value, ConfigError> {
    Ok(match value {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
        }
        serde_yaml::Value::String(s) => serde_json::Value::String(s),
        serde_yaml::Value::Sequence(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(|item| yaml_to_json(item, context))
                .collect::<Result<_, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = serde_json::Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = scalar_key(&key, context)?;
                map.insert(key.clone(), yaml_to_json(value, context)?);
            }
            serde_json::Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value, context)?,
    })
}
