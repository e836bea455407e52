//! Element instances: the typed tree built from a raw document.
//!
//! [`ElementInstance::build`] walks a raw fragment against a definition from
//! a [`Registry`] and instantiates every declared child. Only shape is
//! enforced here; semantic rules run later in [`crate::validate`].
//!
//! Ownership is strictly top-down: a parent owns its children and no
//! instance holds a pointer to its parent. Upward queries go through the
//! explicit ancestor chain threaded through validation
//! ([`Ancestors`](crate::Ancestors)).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::StructuralError;
use crate::registry::Registry;
use crate::types::{ElementDefinition, ElementKind, RawTree, shape_of};

/// Dot-separated location of an instance within a document.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::InstancePath;
///
/// let path = InstancePath::root().child("plugins").child("p1");
/// assert_eq!(path.to_string(), "plugins.p1");
/// assert_eq!(InstancePath::root().to_string(), "<root>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct InstancePath(Vec<String>);

impl InstancePath {
    /// Returns the path of the document root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns this path extended by one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Returns the path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for InstancePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0.join("."))
        }
    }
}

/// Parsed children of an instance, shaped by its definition kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Children {
    /// Raw value of a leaf instance.
    Leaf(RawTree),
    /// Present (or defaulted) fields of a composite.
    Fields(BTreeMap<String, ElementInstance>),
    /// Items of a list, in document order.
    Items(Vec<ElementInstance>),
    /// Named entries of a map.
    Entries(BTreeMap<String, ElementInstance>),
}

/// One node of the typed tree produced for a concrete document.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInstance {
    definition: String,
    name: String,
    path: InstancePath,
    children: Children,
}

impl ElementInstance {
    /// Builds the instance tree for `raw` against the named definition.
    ///
    /// # Errors
    ///
    /// Returns a [`StructuralError`] for the first shape mismatch found:
    /// a leaf of the wrong primitive type, an unknown or missing composite
    /// field, or a reference to a definition the registry does not hold.
    ///
    /// # Examples
    ///
    /// ```
    /// use blueprint_schema_core::*;
    /// use serde_json::json;
    ///
    /// let mut registry = Registry::register(
    ///     "plugin",
    ///     [
    ///         ElementDefinition::composite("plugin").required("name", "plugin_name"),
    ///         ElementDefinition::leaf("plugin_name", LeafType::String),
    ///     ],
    /// )
    /// .unwrap();
    /// registry.freeze().unwrap();
    ///
    /// let plugin = ElementInstance::build(&registry, "plugin", &json!({"name": "p1"})).unwrap();
    /// assert_eq!(plugin.child("name").unwrap().raw(), Some(&json!("p1")));
    /// assert_eq!(plugin.raw(), None);
    ///
    /// let err = ElementInstance::build(&registry, "plugin", &json!({})).unwrap_err();
    /// assert!(matches!(err, StructuralError::MissingField { .. }));
    /// ```
    pub fn build(
        registry: &Registry,
        definition: &str,
        raw: &RawTree,
    ) -> Result<Self, StructuralError> {
        let path = InstancePath::root();
        let definition = lookup(registry, definition, &path)?;
        build_node(registry, definition, String::new(), raw, path)
    }

    /// Name of the definition this instance was built against.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Field key, map key or list index this instance sits under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location of this instance in the document.
    pub fn path(&self) -> &InstancePath {
        &self.path
    }

    /// Raw fragment of a leaf instance. Composite, list and map instances
    /// keep only their parsed children.
    pub fn raw(&self) -> Option<&RawTree> {
        match &self.children {
            Children::Leaf(raw) => Some(raw),
            _ => None,
        }
    }

    /// Parsed children.
    pub fn children(&self) -> &Children {
        &self.children
    }

    /// Returns the field (composite) or entry (map) stored under `key`.
    pub fn child(&self, key: &str) -> Option<&ElementInstance> {
        match &self.children {
            Children::Fields(map) | Children::Entries(map) => map.get(key),
            Children::Leaf(_) | Children::Items(_) => None,
        }
    }

    /// Returns every direct child in deterministic order.
    pub fn child_instances(&self) -> Vec<&ElementInstance> {
        match &self.children {
            Children::Leaf(_) => Vec::new(),
            Children::Fields(map) | Children::Entries(map) => map.values().collect(),
            Children::Items(items) => items.iter().collect(),
        }
    }

    /// Returns the entry keys of a map instance.
    pub fn entry_names(&self) -> Vec<&str> {
        match &self.children {
            Children::Entries(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Renders the parsed value of this instance.
    ///
    /// Leaves render their raw fragment; composites render only their
    /// present (or defaulted) fields.
    pub fn value(&self) -> RawTree {
        match &self.children {
            Children::Leaf(raw) => raw.clone(),
            Children::Fields(map) | Children::Entries(map) => RawTree::Object(
                map.iter()
                    .map(|(key, child)| (key.clone(), child.value()))
                    .collect(),
            ),
            Children::Items(items) => {
                RawTree::Array(items.iter().map(ElementInstance::value).collect())
            }
        }
    }

    /// Returns a copy of this composite without the given fields.
    pub(crate) fn without_fields(&self, keys: &[&str]) -> Self {
        let mut copy = self.clone();
        if let Children::Fields(map) = &mut copy.children {
            map.retain(|key, _| !keys.contains(&key.as_str()));
        }
        copy
    }
}

fn lookup<'r>(
    registry: &'r Registry,
    name: &str,
    path: &InstancePath,
) -> Result<&'r ElementDefinition, StructuralError> {
    registry
        .definition(name)
        .ok_or_else(|| StructuralError::UnknownDefinition {
            path: path.clone(),
            definition: name.to_string(),
        })
}

fn build_node(
    registry: &Registry,
    definition: &ElementDefinition,
    name: String,
    raw: &RawTree,
    path: InstancePath,
) -> Result<ElementInstance, StructuralError> {
    let children = match &definition.kind {
        ElementKind::Leaf { leaf_type } => {
            if !leaf_type.accepts(raw) {
                return Err(StructuralError::UnexpectedType {
                    path,
                    expected: leaf_type.as_str().to_string(),
                    found: shape_of(raw).to_string(),
                });
            }
            Children::Leaf(raw.clone())
        }
        ElementKind::Composite { fields } => {
            let object = expect_mapping(raw, &path)?;
            if let Some(unknown) = object.keys().find(|key| !fields.contains_key(*key)) {
                return Err(StructuralError::UnknownField {
                    path,
                    field: unknown.clone(),
                });
            }

            let mut built = BTreeMap::new();
            for (key, spec) in fields {
                let value = match object.get(key).filter(|v| !v.is_null()) {
                    Some(value) => value,
                    None => match &spec.default {
                        Some(default) => default,
                        None if spec.required => {
                            return Err(StructuralError::MissingField {
                                path,
                                field: key.clone(),
                            });
                        }
                        None => continue,
                    },
                };
                let child_path = path.child(key.as_str());
                let child_def = lookup(registry, &spec.definition, &child_path)?;
                let child = build_node(registry, child_def, key.clone(), value, child_path)?;
                built.insert(key.clone(), child);
            }
            Children::Fields(built)
        }
        ElementKind::List { item } => {
            let item_def = lookup(registry, item, &path)?;
            let items = match raw {
                RawTree::Null => Vec::new(),
                RawTree::Array(values) => values
                    .iter()
                    .enumerate()
                    .map(|(index, value)| {
                        build_node(
                            registry,
                            item_def,
                            index.to_string(),
                            value,
                            path.child(index.to_string()),
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                other => {
                    return Err(StructuralError::UnexpectedType {
                        path,
                        expected: "sequence".to_string(),
                        found: shape_of(other).to_string(),
                    });
                }
            };
            Children::Items(items)
        }
        ElementKind::Map { item } => {
            let item_def = lookup(registry, item, &path)?;
            let object = expect_mapping(raw, &path)?;
            let mut entries = BTreeMap::new();
            for (key, value) in object.iter() {
                let entry = build_node(
                    registry,
                    item_def,
                    key.clone(),
                    value,
                    path.child(key.as_str()),
                )?;
                entries.insert(key.clone(), entry);
            }
            Children::Entries(entries)
        }
    };

    Ok(ElementInstance {
        definition: definition.name.clone(),
        name,
        path,
        children,
    })
}

fn expect_mapping<'a>(
    raw: &'a RawTree,
    path: &InstancePath,
) -> Result<std::borrow::Cow<'a, serde_json::Map<String, RawTree>>, StructuralError> {
    match raw {
        RawTree::Object(map) => Ok(std::borrow::Cow::Borrowed(map)),
        RawTree::Null => Ok(std::borrow::Cow::Owned(serde_json::Map::new())),
        other => Err(StructuralError::UnexpectedType {
            path: path.clone(),
            expected: "mapping".to_string(),
            found: shape_of(other).to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::types::{FieldSpec, LeafType};

    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::register(
            "blueprint",
            [
                ElementDefinition::composite("blueprint")
                    .optional("plugins", "plugins")
                    .optional("imports", "imports")
                    .field(
                        "version",
                        FieldSpec::optional("version").with_default(json!("1.0")),
                    ),
                ElementDefinition::map("plugins", "plugin"),
                ElementDefinition::composite("plugin")
                    .required("name", "plugin_name")
                    .optional("install", "flag"),
                ElementDefinition::leaf("plugin_name", LeafType::String),
                ElementDefinition::leaf("flag", LeafType::Boolean),
                ElementDefinition::leaf("version", LeafType::String),
                ElementDefinition::list("imports", "import"),
                ElementDefinition::leaf("import", LeafType::String),
            ],
        )
        .unwrap();
        registry.freeze().unwrap();
        registry
    }

    #[test]
    fn test_build_names_and_paths() {
        let registry = registry();
        let root = ElementInstance::build(
            &registry,
            "blueprint",
            &json!({"plugins": {"p1": {"name": "p1"}}, "imports": ["a.yaml", "b.yaml"]}),
        )
        .unwrap();

        let p1 = root.child("plugins").unwrap().child("p1").unwrap();
        assert_eq!(p1.name(), "p1");
        assert_eq!(p1.definition(), "plugin");
        assert_eq!(p1.path().to_string(), "plugins.p1");

        let imports = root.child("imports").unwrap();
        assert_eq!(imports.child_instances()[1].path().to_string(), "imports.1");
    }

    #[test]
    fn test_only_leaves_keep_raw_fragments() {
        let registry = registry();
        let root = ElementInstance::build(
            &registry,
            "blueprint",
            &json!({"plugins": {"p1": {"name": "p1", "install": true}}}),
        )
        .unwrap();

        let p1 = root.child("plugins").unwrap().child("p1").unwrap();
        assert_eq!(root.raw(), None);
        assert_eq!(p1.raw(), None);
        assert_eq!(p1.child("install").unwrap().raw(), Some(&json!(true)));
        assert_eq!(p1.value(), json!({"name": "p1", "install": true}));
    }

    #[test]
    fn test_default_applies_when_field_absent() {
        let registry = registry();
        let root = ElementInstance::build(&registry, "blueprint", &json!({})).unwrap();
        assert_eq!(root.value(), json!({"version": "1.0"}));
    }

    #[test]
    fn test_null_field_counts_as_absent() {
        let registry = registry();
        let err = ElementInstance::build(
            &registry,
            "blueprint",
            &json!({"plugins": {"p1": {"name": null}}}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            StructuralError::MissingField {
                path: InstancePath::root().child("plugins").child("p1"),
                field: "name".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let registry = registry();
        let err = ElementInstance::build(
            &registry,
            "blueprint",
            &json!({"plugins": {"p1": {"name": "p1", "color": "red"}}}),
        )
        .unwrap_err();
        assert!(
            matches!(err, StructuralError::UnknownField { ref field, .. } if field == "color")
        );
    }

    #[test]
    fn test_leaf_type_mismatch_reports_shapes() {
        let registry = registry();
        let err = ElementInstance::build(
            &registry,
            "blueprint",
            &json!({"plugins": {"p1": {"name": "p1", "install": "yes"}}}),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "plugins.p1.install: expected boolean, found string"
        );
    }

    #[test]
    fn test_list_rejects_mapping() {
        let registry = registry();
        let err =
            ElementInstance::build(&registry, "blueprint", &json!({"imports": {"a": 1}}))
                .unwrap_err();
        assert!(matches!(
            err,
            StructuralError::UnexpectedType { ref expected, .. } if expected == "sequence"
        ));
    }

    #[test]
    fn test_without_fields_drops_keys() {
        let registry = registry();
        let root = ElementInstance::build(
            &registry,
            "blueprint",
            &json!({"plugins": {"p1": {"name": "p1"}}}),
        )
        .unwrap();
        let trimmed = root.without_fields(&["plugins"]);
        assert!(trimmed.child("plugins").is_none());
        assert!(trimmed.child("version").is_some());
    }
}
