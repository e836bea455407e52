//! Import collection.
//!
//! Fetching imported documents is the host's concern and is abstracted by
//! [`ImportResolver`]. [`collect_sources`] walks the `imports` lists and
//! orders the resulting trees the way [`merge`](crate::merge) expects.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::ResolveError;
use crate::merge::SourceTree;
use crate::types::RawTree;

/// Top-level key listing a document's imports.
pub const IMPORTS_KEY: &str = "imports";

/// Returns the raw tree for an import reference.
pub trait ImportResolver {
    /// Resolves one import reference.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] when the reference cannot be turned into
    /// a raw tree.
    fn resolve(&self, reference: &str) -> Result<RawTree, ResolveError>;
}

/// In-memory resolver keyed by import reference.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::{ImportResolver, MapResolver};
/// use serde_json::json;
///
/// let resolver = MapResolver::new().with("types.yaml", json!({"node_types": {}}));
/// assert!(resolver.resolve("types.yaml").is_ok());
/// assert!(resolver.resolve("missing.yaml").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapResolver {
    documents: BTreeMap<String, RawTree>,
}

impl MapResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document.
    pub fn insert(&mut self, reference: impl Into<String>, tree: RawTree) {
        self.documents.insert(reference.into(), tree);
    }

    /// Adds a document, builder style.
    pub fn with(mut self, reference: impl Into<String>, tree: RawTree) -> Self {
        self.insert(reference, tree);
        self
    }
}

impl ImportResolver for MapResolver {
    fn resolve(&self, reference: &str) -> Result<RawTree, ResolveError> {
        self.documents
            .get(reference)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                reference: reference.to_string(),
            })
    }
}

/// Resolves the transitive imports of `main` into merge order.
///
/// Each distinct import is resolved once. An imported document's own
/// imports come before it, imports keep declaration order, and `main` is
/// always last. Imported trees have their `imports` key removed; the main
/// document keeps its own.
///
/// # Errors
///
/// Returns [`ResolveError::InvalidImport`] for a non-string `imports` entry
/// and propagates any error from the resolver.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::*;
/// use serde_json::json;
///
/// let resolver = MapResolver::new()
///     .with("base.yaml", json!({"description": "base"}))
///     .with("types.yaml", json!({"imports": ["base.yaml"]}));
/// let main = SourceTree::new("main.yaml", json!({"imports": ["types.yaml", "base.yaml"]}));
///
/// let ids: Vec<String> = collect_sources(main, &resolver)
///     .unwrap()
///     .into_iter()
///     .map(|source| source.id)
///     .collect();
/// assert_eq!(ids, ["base.yaml", "types.yaml", "main.yaml"]);
/// ```
pub fn collect_sources(
    main: SourceTree,
    resolver: &dyn ImportResolver,
) -> Result<Vec<SourceTree>, ResolveError> {
    let mut visited = BTreeSet::from([main.id.clone()]);
    let mut ordered = Vec::new();
    visit(&main.tree, resolver, &mut visited, &mut ordered)?;
    ordered.push(main);
    debug!(sources = ordered.len(), "Collected import sources");
    Ok(ordered)
}

fn visit(
    tree: &RawTree,
    resolver: &dyn ImportResolver,
    visited: &mut BTreeSet<String>,
    ordered: &mut Vec<SourceTree>,
) -> Result<(), ResolveError> {
    for reference in import_references(tree)? {
        if !visited.insert(reference.clone()) {
            continue;
        }
        debug!(import = %reference, "Resolving import");
        let mut imported = resolver.resolve(&reference)?;
        visit(&imported, resolver, visited, ordered)?;
        if let RawTree::Object(map) = &mut imported {
            map.remove(IMPORTS_KEY);
        }
        ordered.push(SourceTree::new(reference, imported));
    }
    Ok(())
}

fn import_references(tree: &RawTree) -> Result<Vec<String>, ResolveError> {
    match tree.get(IMPORTS_KEY) {
        None | Some(RawTree::Null) => Ok(Vec::new()),
        Some(RawTree::Array(entries)) => entries
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ResolveError::InvalidImport {
                        reference: entry.to_string(),
                    })
            })
            .collect(),
        Some(other) => Err(ResolveError::InvalidImport {
            reference: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;

    struct CountingResolver {
        inner: MapResolver,
        calls: RefCell<Vec<String>>,
    }

    impl ImportResolver for CountingResolver {
        fn resolve(&self, reference: &str) -> Result<RawTree, ResolveError> {
            self.calls.borrow_mut().push(reference.to_string());
            self.inner.resolve(reference)
        }
    }

    #[test]
    fn test_each_import_resolved_once() {
        let resolver = CountingResolver {
            inner: MapResolver::new()
                .with("a.yaml", json!({"imports": ["shared.yaml"]}))
                .with("b.yaml", json!({"imports": ["shared.yaml"]}))
                .with("shared.yaml", json!({"description": "shared"})),
            calls: RefCell::new(Vec::new()),
        };
        let main = SourceTree::new("main.yaml", json!({"imports": ["a.yaml", "b.yaml"]}));
        let sources = collect_sources(main, &resolver).unwrap();

        let ids: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["shared.yaml", "a.yaml", "b.yaml", "main.yaml"]);
        assert_eq!(resolver.calls.borrow().len(), 3);
    }

    #[test]
    fn test_imported_trees_lose_imports_key() {
        let resolver = MapResolver::new()
            .with("a.yaml", json!({"imports": ["b.yaml"], "description": "a"}))
            .with("b.yaml", json!({}));
        let main = SourceTree::new("main.yaml", json!({"imports": ["a.yaml"]}));
        let sources = collect_sources(main, &resolver).unwrap();

        assert_eq!(sources[1].tree, json!({"description": "a"}));
        assert_eq!(sources[2].tree, json!({"imports": ["a.yaml"]}));
    }

    #[test]
    fn test_import_cycle_terminates() {
        let resolver = MapResolver::new()
            .with("a.yaml", json!({"imports": ["main.yaml", "b.yaml"]}))
            .with("b.yaml", json!({"imports": ["a.yaml"]}));
        let main = SourceTree::new("main.yaml", json!({"imports": ["a.yaml"]}));
        let ids: Vec<String> = collect_sources(main, &resolver)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, ["b.yaml", "a.yaml", "main.yaml"]);
    }

    #[test]
    fn test_missing_and_invalid_imports() {
        let resolver = MapResolver::new();
        let err = collect_sources(
            SourceTree::new("main.yaml", json!({"imports": ["nope.yaml"]})),
            &resolver,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ResolveError::NotFound {
                reference: "nope.yaml".to_string()
            }
        );

        let err = collect_sources(
            SourceTree::new("main.yaml", json!({"imports": [42]})),
            &resolver,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ResolveError::InvalidImport {
                reference: "42".to_string()
            }
        );
    }
}
