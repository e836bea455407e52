//! Import merging with per-key override policies.
//!
//! [`merge`] combines the raw trees of a document and everything it
//! imports into one raw tree before any structural parsing. Sources are
//! consumed in order: imports in declaration order, the importing document
//! last, so later sources win under [`MergePolicy::Override`].
//!
//! "Conflicting content" is deep structural inequality: two sources may
//! declare the same entry as long as they declare it identically.
//!
//! # Example
//!
//! ```
//! use blueprint_schema_core::*;
//! use serde_json::json;
//!
//! let table = MergePolicyTable::new().with("node_types", MergePolicy::MergeNoOverride);
//! let merged = merge(
//!     &[
//!         SourceTree::new("types.yaml", json!({"node_types": {"a": {}}, "description": "x"})),
//!         SourceTree::new("main.yaml", json!({"node_types": {"b": {}}, "description": "y"})),
//!     ],
//!     &table,
//! )
//! .unwrap();
//!
//! assert_eq!(merged["description"], json!("y"));
//! assert_eq!(merged["node_types"], json!({"a": {}, "b": {}}));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MergeError;
use crate::types::{RawTree, shape_of};

/// How contributions to one top-level key are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The latest source wins (the default).
    #[default]
    Override,
    /// Entries may be contributed by several sources, but never with
    /// different content.
    MergeNoOverride,
    /// Sequences are concatenated and mappings key-unioned.
    MergeUnion,
}

/// Maps top-level keys to merge policies.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::{MergePolicy, MergePolicyTable};
///
/// let mut table = MergePolicyTable::new();
/// table.register_no_override(["policy_types", "policy_triggers"]);
/// assert_eq!(table.policy_for("policy_types"), MergePolicy::MergeNoOverride);
/// assert_eq!(table.policy_for("description"), MergePolicy::Override);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MergePolicyTable {
    /// Policy for keys without an explicit entry.
    #[serde(default)]
    pub default_policy: MergePolicy,
    /// Explicit per-key policies.
    #[serde(default)]
    pub policies: BTreeMap<String, MergePolicy>,
}

impl MergePolicyTable {
    /// Creates an empty table with [`MergePolicy::Override`] as default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the policy for keys without an explicit entry.
    pub fn with_default(mut self, policy: MergePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Sets the policy for `key`.
    pub fn with(mut self, key: impl Into<String>, policy: MergePolicy) -> Self {
        self.set(key, policy);
        self
    }

    /// Sets the policy for `key`, returning the previous explicit policy.
    pub fn set(&mut self, key: impl Into<String>, policy: MergePolicy) -> Option<MergePolicy> {
        self.policies.insert(key.into(), policy)
    }

    /// Marks every key as [`MergePolicy::MergeNoOverride`].
    pub fn register_no_override<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            self.set(key, MergePolicy::MergeNoOverride);
        }
    }

    /// Returns the policy governing `key`.
    pub fn policy_for(&self, key: &str) -> MergePolicy {
        self.policies
            .get(key)
            .copied()
            .unwrap_or(self.default_policy)
    }
}

/// A raw document tree tagged with the identifier it was loaded under.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTree {
    /// Import reference or file name.
    pub id: String,
    /// Raw document.
    pub tree: RawTree,
}

impl SourceTree {
    /// Creates a source tree.
    pub fn new(id: impl Into<String>, tree: RawTree) -> Self {
        Self {
            id: id.into(),
            tree,
        }
    }
}

/// Merges ordered source trees into one raw tree.
///
/// Explicit `null` contributions are treated as absent.
///
/// # Errors
///
/// Returns [`MergeError::NotAMapping`] for a source that is not a mapping,
/// [`MergeError::DuplicateDefinition`] when a MERGE_NO_OVERRIDE key or entry
/// is contributed with different content, and
/// [`MergeError::UnionConflict`] when MERGE_UNION contributions disagree.
pub fn merge(sources: &[SourceTree], table: &MergePolicyTable) -> Result<RawTree, MergeError> {
    let mut merged = serde_json::Map::new();
    let mut contributors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut entry_owners: BTreeMap<(String, String), String> = BTreeMap::new();

    for source in sources {
        let document = match &source.tree {
            RawTree::Object(map) => map,
            RawTree::Null => continue,
            other => {
                return Err(MergeError::NotAMapping {
                    document: source.id.clone(),
                    found: shape_of(other).to_string(),
                });
            }
        };

        for (key, value) in document {
            if value.is_null() {
                continue;
            }
            let policy = table.policy_for(key);
            let previous = contributors.entry(key.clone()).or_default();

            match merged.get_mut(key) {
                None => {
                    if policy == MergePolicy::MergeNoOverride {
                        if let RawTree::Object(entries) = value {
                            for entry in entries.keys() {
                                entry_owners
                                    .insert((key.clone(), entry.clone()), source.id.clone());
                            }
                        }
                    }
                    merged.insert(key.clone(), value.clone());
                }
                Some(existing) => match policy {
                    MergePolicy::Override => *existing = value.clone(),
                    MergePolicy::MergeNoOverride => merge_no_override(
                        key,
                        existing,
                        value,
                        &source.id,
                        previous,
                        &mut entry_owners,
                    )?,
                    MergePolicy::MergeUnion => {
                        merge_union(key, existing, value, &source.id, previous)?
                    }
                },
            }

            previous.push(source.id.clone());
            debug!(key = %key, policy = ?policy, document = %source.id, "Merged key");
        }
    }

    Ok(RawTree::Object(merged))
}

fn merge_no_override(
    key: &str,
    existing: &mut RawTree,
    value: &RawTree,
    document: &str,
    previous: &[String],
    entry_owners: &mut BTreeMap<(String, String), String>,
) -> Result<(), MergeError> {
    match (existing, value) {
        (RawTree::Object(current), RawTree::Object(incoming)) => {
            for (entry, body) in incoming {
                let owner_key = (key.to_string(), entry.clone());
                match current.get(entry) {
                    Some(declared) if declared != body => {
                        let owner = entry_owners
                            .get(&owner_key)
                            .cloned()
                            .unwrap_or_else(|| previous.join(", "));
                        return Err(MergeError::DuplicateDefinition {
                            key: key.to_string(),
                            entry: Some(entry.clone()),
                            documents: vec![owner, document.to_string()],
                        });
                    }
                    Some(_) => {}
                    None => {
                        current.insert(entry.clone(), body.clone());
                        entry_owners.insert(owner_key, document.to_string());
                    }
                }
            }
            Ok(())
        }
        (current, incoming) if current == incoming => Ok(()),
        _ => Err(MergeError::DuplicateDefinition {
            key: key.to_string(),
            entry: None,
            documents: with_document(previous, document),
        }),
    }
}

fn merge_union(
    key: &str,
    existing: &mut RawTree,
    value: &RawTree,
    document: &str,
    previous: &[String],
) -> Result<(), MergeError> {
    match (existing, value) {
        (RawTree::Array(current), RawTree::Array(incoming)) => {
            current.extend(incoming.iter().cloned());
            Ok(())
        }
        (RawTree::Object(current), RawTree::Object(incoming)) => {
            for (entry, body) in incoming {
                match current.get(entry) {
                    Some(declared) if declared != body => {
                        return Err(MergeError::UnionConflict {
                            key: key.to_string(),
                            entry: Some(entry.clone()),
                            documents: with_document(previous, document),
                        });
                    }
                    Some(_) => {}
                    None => {
                        current.insert(entry.clone(), body.clone());
                    }
                }
            }
            Ok(())
        }
        (current, incoming) if current == incoming => Ok(()),
        _ => Err(MergeError::UnionConflict {
            key: key.to_string(),
            entry: None,
            documents: with_document(previous, document),
        }),
    }
}

fn with_document(previous: &[String], document: &str) -> Vec<String> {
    previous
        .iter()
        .cloned()
        .chain(std::iter::once(document.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sources(trees: Vec<RawTree>) -> Vec<SourceTree> {
        trees
            .into_iter()
            .enumerate()
            .map(|(i, tree)| SourceTree::new(format!("doc{i}.yaml"), tree))
            .collect()
    }

    #[test]
    fn test_override_later_source_wins() {
        let merged = merge(
            &sources(vec![
                json!({"description": "first", "inputs": {"a": 1}}),
                json!({"description": "second"}),
            ]),
            &MergePolicyTable::new(),
        )
        .unwrap();
        assert_eq!(merged, json!({"description": "second", "inputs": {"a": 1}}));
    }

    #[test]
    fn test_no_override_conflict_names_entry_and_documents() {
        let table = MergePolicyTable::new().with("policy_types", MergePolicy::MergeNoOverride);
        let err = merge(
            &sources(vec![
                json!({"policy_types": {"P1": {"source": "a"}}}),
                json!({"policy_types": {"P1": {"source": "b"}}}),
            ]),
            &table,
        )
        .unwrap_err();
        assert_eq!(
            err,
            MergeError::DuplicateDefinition {
                key: "policy_types".to_string(),
                entry: Some("P1".to_string()),
                documents: vec!["doc0.yaml".to_string(), "doc1.yaml".to_string()],
            }
        );
        assert_eq!(
            err.to_string(),
            "duplicate definition for 'policy_types.P1' in doc0.yaml, doc1.yaml"
        );
    }

    #[test]
    fn test_no_override_accepts_identical_redeclaration() {
        let table = MergePolicyTable::new().with("node_types", MergePolicy::MergeNoOverride);
        let merged = merge(
            &sources(vec![
                json!({"node_types": {"web": {"derived_from": "root"}}}),
                json!({"node_types": {"web": {"derived_from": "root"}, "db": {}}}),
            ]),
            &table,
        )
        .unwrap();
        assert_eq!(
            merged["node_types"],
            json!({"web": {"derived_from": "root"}, "db": {}})
        );
    }

    #[test]
    fn test_no_override_scalar_conflict() {
        let table = MergePolicyTable::new()
            .with("tosca_definitions_version", MergePolicy::MergeNoOverride);
        let err = merge(
            &sources(vec![
                json!({"tosca_definitions_version": "cloudify_dsl_1_0"}),
                json!({"tosca_definitions_version": "cloudify_dsl_1_1"}),
            ]),
            &table,
        )
        .unwrap_err();
        assert!(matches!(err, MergeError::DuplicateDefinition { entry: None, .. }));
    }

    #[test]
    fn test_union_merges_disjoint_entries_and_concatenates_lists() {
        let table = MergePolicyTable::new().with_default(MergePolicy::MergeUnion);
        let merged = merge(
            &sources(vec![
                json!({"outputs": {"a": 1}, "tags": ["x"]}),
                json!({"outputs": {"b": 2}, "tags": ["y", "x"]}),
            ]),
            &table,
        )
        .unwrap();
        assert_eq!(merged["outputs"], json!({"a": 1, "b": 2}));
        assert_eq!(merged["tags"], json!(["x", "y", "x"]));
    }

    #[test]
    fn test_union_conflict_on_differing_entry() {
        let table = MergePolicyTable::new().with("outputs", MergePolicy::MergeUnion);
        let err = merge(
            &sources(vec![json!({"outputs": {"a": 1}}), json!({"outputs": {"a": 2}})]),
            &table,
        )
        .unwrap_err();
        assert!(matches!(err, MergeError::UnionConflict { entry: Some(ref e), .. } if e == "a"));
    }

    #[test]
    fn test_null_contributions_are_ignored() {
        let table = MergePolicyTable::new().with("node_types", MergePolicy::MergeNoOverride);
        let merged = merge(
            &sources(vec![
                json!({"node_types": {"a": {}}}),
                json!({"node_types": null}),
                RawTree::Null,
            ]),
            &table,
        )
        .unwrap();
        assert_eq!(merged["node_types"], json!({"a": {}}));
    }

    #[test]
    fn test_non_mapping_document_rejected() {
        let err = merge(&sources(vec![json!(["a"])]), &MergePolicyTable::new()).unwrap_err();
        assert_eq!(
            err,
            MergeError::NotAMapping {
                document: "doc0.yaml".to_string(),
                found: "sequence".to_string()
            }
        );
    }

    #[test]
    fn test_policy_table_yaml_shape() {
        let table: MergePolicyTable = serde_yaml::from_str(
            "default_policy: override\npolicies:\n  policy_types: merge_no_override\n  tags: merge_union\n",
        )
        .unwrap();
        assert_eq!(table.policy_for("tags"), MergePolicy::MergeUnion);
        assert_eq!(table.policy_for("policy_types"), MergePolicy::MergeNoOverride);
    }
}
