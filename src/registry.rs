//! Capability registry: the component resolver.
//!
//! Qualified names of the form `<namespace>.<symbol>` resolve against a
//! registry populated explicitly at startup, replacing reflective
//! "import by string" lookup with a pure mapping from name to a tagged
//! capability: a plain function or a class factory.
//!
//! Resolution never loads code; an unknown namespace or symbol is an
//! explicit [`ResolveError`], and asking for the wrong capability kind
//! (a function where a class is registered, or vice versa) fails rather
//! than duck-typing through.
//!
//! # Examples
//!
//! ```
//! use pipegraph::registry::ComponentRegistry;
//! use pipegraph::value::outputs;
//!
//! let mut registry = ComponentRegistry::new();
//! registry
//!     .namespace("math")
//!     .function("five", |_args| Ok(outputs([("value", 5i64)])));
//!
//! assert!(registry.resolve_function("math.five").is_ok());
//! assert!(registry.resolve_function("math.six").is_err());
//! assert!(registry.resolve_class("math.five").is_err());
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::node::{CallArgs, Node, NodeError};
use crate::value::Outputs;

/// Constructor parameters handed to class factories, straight from the
/// node's `parameters` configuration field.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A registered component function.
pub type ComponentFn = dyn Fn(CallArgs) -> Result<Outputs, NodeError> + Send + Sync;

/// A registered class factory: instantiated once per node with the node's
/// constructor parameters; the instance is the node.
pub type ClassFactory = dyn Fn(&Params) -> Result<Box<dyn Node>, NodeError> + Send + Sync;

/// One registered capability.
#[derive(Clone)]
enum Component {
    Function(Arc<ComponentFn>),
    Factory(Arc<ClassFactory>),
}

impl Component {
    fn kind(&self) -> &'static str {
        match self {
            Component::Function(_) => "function",
            Component::Factory(_) => "class",
        }
    }
}

/// Errors from qualified-name resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    /// The name has no `<namespace>.<symbol>` structure.
    #[error("`{name}` is not a qualified name (expected `<namespace>.<symbol>`)")]
    #[diagnostic(code(pipegraph::registry::invalid_name))]
    InvalidName { name: String },

    /// The namespace part is not registered.
    #[error("unknown namespace `{namespace}` while resolving `{namespace}.{symbol}`")]
    #[diagnostic(
        code(pipegraph::registry::unknown_namespace),
        help("Register the namespace on the ComponentRegistry, or add it to general.module_paths.")
    )]
    UnknownNamespace { namespace: String, symbol: String },

    /// The namespace exists but does not define the symbol.
    #[error("namespace `{namespace}` does not define `{symbol}`")]
    #[diagnostic(code(pipegraph::registry::unknown_symbol))]
    UnknownSymbol { namespace: String, symbol: String },

    /// The symbol resolved to a class where a callable was required.
    #[error("`{name}` is registered as a {actual}, not a callable function")]
    #[diagnostic(code(pipegraph::registry::not_a_function))]
    NotAFunction { name: String, actual: &'static str },

    /// The symbol resolved to a function where a class was required.
    #[error("`{name}` is registered as a {actual}, not a class")]
    #[diagnostic(code(pipegraph::registry::not_a_class))]
    NotAClass { name: String, actual: &'static str },
}

/// Registry of named component capabilities, grouped by namespace.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    namespaces: FxHashMap<String, FxHashMap<String, Component>>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a namespace for registration, creating it if absent.
    pub fn namespace(&mut self, name: impl Into<String>) -> NamespaceBuilder<'_> {
        let symbols = self.namespaces.entry(name.into()).or_default();
        NamespaceBuilder { symbols }
    }

    /// Make a namespace known without registering symbols.
    ///
    /// This is the additive, idempotent equivalent of extending the original
    /// tool's module search path; repeated calls are no-ops.
    pub fn ensure_namespace(&mut self, name: impl Into<String>) -> &mut Self {
        self.namespaces.entry(name.into()).or_default();
        self
    }

    #[must_use]
    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    /// Register a component function under its qualified name.
    pub fn register_function<F>(
        &mut self,
        qualified: &str,
        f: F,
    ) -> Result<&mut Self, ResolveError>
    where
        F: Fn(CallArgs) -> Result<Outputs, NodeError> + Send + Sync + 'static,
    {
        let (namespace, symbol) = split_qualified(qualified)?;
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(symbol.to_string(), Component::Function(Arc::new(f)));
        Ok(self)
    }

    /// Register a class factory under its qualified name.
    pub fn register_class<F>(
        &mut self,
        qualified: &str,
        factory: F,
    ) -> Result<&mut Self, ResolveError>
    where
        F: Fn(&Params) -> Result<Box<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        let (namespace, symbol) = split_qualified(qualified)?;
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(symbol.to_string(), Component::Factory(Arc::new(factory)));
        Ok(self)
    }

    /// Resolve a qualified name to a component function.
    pub fn resolve_function(&self, qualified: &str) -> Result<Arc<ComponentFn>, ResolveError> {
        match self.lookup(qualified)? {
            Component::Function(f) => Ok(Arc::clone(f)),
            other => Err(ResolveError::NotAFunction {
                name: qualified.to_string(),
                actual: other.kind(),
            }),
        }
    }

    /// Resolve a qualified name to a class factory.
    pub fn resolve_class(&self, qualified: &str) -> Result<Arc<ClassFactory>, ResolveError> {
        match self.lookup(qualified)? {
            Component::Factory(f) => Ok(Arc::clone(f)),
            other => Err(ResolveError::NotAClass {
                name: qualified.to_string(),
                actual: other.kind(),
            }),
        }
    }

    fn lookup(&self, qualified: &str) -> Result<&Component, ResolveError> {
        let (namespace, symbol) = split_qualified(qualified)?;
        let symbols =
            self.namespaces
                .get(namespace)
                .ok_or_else(|| ResolveError::UnknownNamespace {
                    namespace: namespace.to_string(),
                    symbol: symbol.to_string(),
                })?;
        symbols
            .get(symbol)
            .ok_or_else(|| ResolveError::UnknownSymbol {
                namespace: namespace.to_string(),
                symbol: symbol.to_string(),
            })
    }
}

/// Split `<namespace>.<symbol>` at the last dot, so namespaces themselves
/// may be dotted (`sklearn.model_selection.train_test_split`).
fn split_qualified(qualified: &str) -> Result<(&str, &str), ResolveError> {
    match qualified.rsplit_once('.') {
        Some((namespace, symbol)) if !namespace.is_empty() && !symbol.is_empty() => {
            Ok((namespace, symbol))
        }
        _ => Err(ResolveError::InvalidName {
            name: qualified.to_string(),
        }),
    }
}

/// Registration handle for one namespace.
pub struct NamespaceBuilder<'a> {
    symbols: &'a mut FxHashMap<String, Component>,
}

impl NamespaceBuilder<'_> {
    /// Register a component function under this namespace.
    pub fn function<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Outputs, NodeError> + Send + Sync + 'static,
    {
        self.symbols
            .insert(name.into(), Component::Function(Arc::new(f)));
        self
    }

    /// Register a class factory under this namespace.
    pub fn class<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Params) -> Result<Box<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        self.symbols
            .insert(name.into(), Component::Factory(Arc::new(factory)));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::outputs;
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl Node for Fixed {
        async fn run(&self, _args: CallArgs) -> Result<Outputs, NodeError> {
            Ok(outputs([("value", 1i64)]))
        }
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry
            .namespace("demo")
            .function("f", |_| Ok(Outputs::default()))
            .class("C", |_params| Ok(Box::new(Fixed) as Box<dyn Node>));
        registry
    }

    #[test]
    fn resolves_by_kind() {
        let registry = registry();
        assert!(registry.resolve_function("demo.f").is_ok());
        assert!(registry.resolve_class("demo.C").is_ok());
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let registry = registry();
        assert!(matches!(
            registry.resolve_function("demo.C"),
            Err(ResolveError::NotAFunction { .. })
        ));
        assert!(matches!(
            registry.resolve_class("demo.f"),
            Err(ResolveError::NotAClass { .. })
        ));
    }

    #[test]
    fn unknown_lookups() {
        let registry = registry();
        assert!(matches!(
            registry.resolve_function("nowhere.f"),
            Err(ResolveError::UnknownNamespace { .. })
        ));
        assert!(matches!(
            registry.resolve_function("demo.g"),
            Err(ResolveError::UnknownSymbol { .. })
        ));
        assert!(matches!(
            registry.resolve_function("bare"),
            Err(ResolveError::InvalidName { .. })
        ));
    }

    #[test]
    fn qualified_registration_mirrors_the_builder() {
        let mut registry = ComponentRegistry::new();
        registry
            .register_function("demo.f", |_| Ok(Outputs::default()))
            .unwrap()
            .register_class("demo.C", |_params| Ok(Box::new(Fixed) as Box<dyn Node>))
            .unwrap();
        assert!(registry.resolve_function("demo.f").is_ok());
        assert!(registry.resolve_class("demo.C").is_ok());
        assert!(matches!(
            registry.register_function("nodot", |_| Ok(Outputs::default())),
            Err(ResolveError::InvalidName { .. })
        ));
    }

    #[test]
    fn dotted_namespaces_split_at_last_dot() {
        let mut registry = ComponentRegistry::new();
        registry
            .namespace("sklearn.model_selection")
            .function("split", |_| Ok(Outputs::default()));
        assert!(registry
            .resolve_function("sklearn.model_selection.split")
            .is_ok());
    }

    #[test]
    fn ensure_namespace_is_idempotent() {
        let mut registry = registry();
        registry.ensure_namespace("demo");
        // existing symbols survive
        assert!(registry.resolve_function("demo.f").is_ok());
        registry.ensure_namespace("extra");
        assert!(registry.has_namespace("extra"));
    }
}
