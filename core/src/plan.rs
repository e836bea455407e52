//! The Plan: final validated output of a parse.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::element::ElementInstance;
use crate::error::EmitError;
use crate::types::RawTree;

/// Flat mapping from section name to that section's parsed value.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::Plan;
/// use serde_json::json;
///
/// let plan: Plan = serde_json::from_value(json!({
///     "plugins": {"p1": {"executor": "host_agent"}}
/// }))
/// .unwrap();
/// assert_eq!(plan.lookup("plugins.p1.executor"), Some(&json!("host_agent")));
/// assert_eq!(plan.digest().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    sections: BTreeMap<String, RawTree>,
}

impl Plan {
    /// Returns a section's value.
    pub fn section(&self, name: &str) -> Option<&RawTree> {
        self.sections.get(name)
    }

    /// Returns `true` if the plan has a section called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Iterates sections in name order.
    pub fn sections(&self) -> impl Iterator<Item = (&str, &RawTree)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns `true` for an empty plan.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Follows a dot-separated path through sections, mappings and
    /// sequence indices.
    pub fn lookup(&self, path: &str) -> Option<&RawTree> {
        let mut segments = path.split('.');
        let mut current = self.sections.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                RawTree::Object(map) => map.get(segment)?,
                RawTree::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Adds a section produced by a plan-assembly step.
    pub(crate) fn insert_section(&mut self, name: &str, value: RawTree) -> Result<(), EmitError> {
        if self.sections.contains_key(name) {
            return Err(EmitError::DuplicateSection {
                section: name.to_string(),
            });
        }
        self.sections.insert(name.to_string(), value);
        Ok(())
    }

    /// Consumes the plan, returning its sections.
    pub fn into_sections(self) -> BTreeMap<String, RawTree> {
        self.sections
    }

    /// Renders the plan as a single raw mapping.
    pub fn to_tree(&self) -> RawTree {
        RawTree::Object(
            self.sections
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Hex SHA-256 of the plan's canonical JSON form.
    ///
    /// Mapping keys are always emitted in sorted order, so equal plans have
    /// equal digests.
    pub fn digest(&self) -> String {
        let canonical = self.to_tree().to_string();
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}

/// Assembles a plan from the root's children plus profile sections.
///
/// # Errors
///
/// Returns [`EmitError::DuplicateSection`] when an extra section shares a
/// key with one of the root's children.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use blueprint_schema_core::*;
/// use serde_json::json;
///
/// let registry = build_registry(
///     "blueprint",
///     [
///         ElementDefinition::composite("blueprint").optional("description", "text"),
///         ElementDefinition::leaf("text", LeafType::String),
///     ],
///     &[],
/// )
/// .unwrap();
/// let root =
///     ElementInstance::build(&registry, "blueprint", &json!({"description": "d"})).unwrap();
/// let extra = ElementInstance::build(&registry, "text", &json!("t")).unwrap();
///
/// let plan = emit(&root, &BTreeMap::from([("notes".to_string(), &extra)])).unwrap();
/// assert_eq!(plan.section("notes"), Some(&json!("t")));
///
/// let clash = BTreeMap::from([("description".to_string(), &extra)]);
/// assert!(matches!(emit(&root, &clash), Err(EmitError::DuplicateSection { .. })));
/// ```
pub fn emit(
    root: &ElementInstance,
    extra_sections: &BTreeMap<String, &ElementInstance>,
) -> Result<Plan, EmitError> {
    let mut sections = match root.value() {
        RawTree::Object(map) => map.into_iter().collect::<BTreeMap<_, _>>(),
        _ => BTreeMap::new(),
    };

    for (key, instance) in extra_sections {
        if sections.contains_key(key) {
            return Err(EmitError::DuplicateSection {
                section: key.clone(),
            });
        }
        sections.insert(key.clone(), instance.value());
    }

    Ok(Plan { sections })
}
