//! Schema registry and the extension engine.
//!
//! A [`Registry`] is seeded with a base vocabulary, then modified by an
//! ordered list of [`ExtensionDirective`]s, then frozen. Directives are pure
//! data and apply strictly in declaration order, each checked against the
//! registry state as of that point, so the same sequence always yields the
//! same effective schema.
//!
//! # Example
//!
//! ```
//! use blueprint_schema_core::*;
//!
//! let mut registry = Registry::register(
//!     "plugin",
//!     [
//!         ElementDefinition::composite("plugin").required("name", "plugin_name"),
//!         ElementDefinition::leaf("plugin_name", LeafType::String),
//!     ],
//! )
//! .unwrap();
//!
//! registry
//!     .apply(&[ExtensionDirective::add_to_schema(
//!         "plugin",
//!         "executor",
//!         ElementDefinition::leaf("plugin_executor", LeafType::String),
//!     )
//!     .required()])
//!     .unwrap();
//! registry.freeze().unwrap();
//!
//! assert!(registry.root().required_fields().contains("executor"));
//! assert_eq!(registry.apply(&[]), Err(ExtensionError::Frozen));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExtensionError;
use crate::placement::HostPlacement;
use crate::types::{ElementDefinition, ElementKind, FieldSpec};
use crate::validate::Validator;

/// One declarative modification to a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ExtensionDirective {
    /// Swap the target's definition for a new one, keeping the target name.
    Replace {
        target: String,
        definition: ElementDefinition,
        /// Definitions the replacement refers to that may not exist yet.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        supporting: Vec<ElementDefinition>,
    },
    /// Insert a new field into a composite target.
    AddToSchema {
        target: String,
        key: String,
        definition: ElementDefinition,
        #[serde(default)]
        required: bool,
        /// Definitions the new field refers to that may not exist yet.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        supporting: Vec<ElementDefinition>,
    },
    /// Append validators to the target without changing its shape.
    AddBehavior {
        target: String,
        validators: Vec<Validator>,
    },
}

impl ExtensionDirective {
    /// Creates a REPLACE directive.
    pub fn replace(target: impl Into<String>, definition: ElementDefinition) -> Self {
        Self::Replace {
            target: target.into(),
            definition,
            supporting: Vec::new(),
        }
    }

    /// Creates an optional ADD_TO_SCHEMA directive.
    pub fn add_to_schema(
        target: impl Into<String>,
        key: impl Into<String>,
        definition: ElementDefinition,
    ) -> Self {
        Self::AddToSchema {
            target: target.into(),
            key: key.into(),
            definition,
            required: false,
            supporting: Vec::new(),
        }
    }

    /// Creates an ADD_BEHAVIOR directive.
    pub fn add_behavior(target: impl Into<String>, validators: Vec<Validator>) -> Self {
        Self::AddBehavior {
            target: target.into(),
            validators,
        }
    }

    /// Marks an ADD_TO_SCHEMA field as required.
    pub fn required(mut self) -> Self {
        if let Self::AddToSchema { required, .. } = &mut self {
            *required = true;
        }
        self
    }

    /// Attaches supporting definitions to a REPLACE or ADD_TO_SCHEMA.
    pub fn with_supporting(mut self, definitions: Vec<ElementDefinition>) -> Self {
        match &mut self {
            Self::Replace { supporting, .. } | Self::AddToSchema { supporting, .. } => {
                supporting.extend(definitions);
            }
            Self::AddBehavior { .. } => {}
        }
        self
    }

    /// Name of the definition this directive modifies.
    pub fn target(&self) -> &str {
        match self {
            Self::Replace { target, .. }
            | Self::AddToSchema { target, .. }
            | Self::AddBehavior { target, .. } => target,
        }
    }

    /// Action name, as used in profile files.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Replace { .. } => "replace",
            Self::AddToSchema { .. } => "add_to_schema",
            Self::AddBehavior { .. } => "add_behavior",
        }
    }
}

/// Pattern validator regexes compiled at freeze, keyed by pattern source.
#[derive(Debug, Clone, Default)]
struct CompiledPatterns(BTreeMap<String, Regex>);

impl PartialEq for CompiledPatterns {
    fn eq(&self, other: &Self) -> bool {
        self.0.keys().eq(other.0.keys())
    }
}

/// The effective set of element definitions for one profile activation.
///
/// Mutable until [`freeze`](Registry::freeze); read-only afterwards and
/// safe to share across concurrent parses.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    definitions: BTreeMap<String, ElementDefinition>,
    root: String,
    contributed: BTreeMap<String, BTreeSet<String>>,
    patterns: CompiledPatterns,
    placement: Option<HostPlacement>,
    frozen: bool,
}

impl Registry {
    /// Seeds a registry with the base vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::DuplicateDefinition`] if two definitions
    /// share a name, or [`ExtensionError::MissingRoot`] if `root` is not
    /// among them.
    pub fn register(
        root: &str,
        base: impl IntoIterator<Item = ElementDefinition>,
    ) -> Result<Self, ExtensionError> {
        let mut definitions = BTreeMap::new();
        for definition in base {
            let name = definition.name.clone();
            if definitions.insert(name.clone(), definition).is_some() {
                return Err(ExtensionError::DuplicateDefinition { name });
            }
        }
        if !definitions.contains_key(root) {
            return Err(ExtensionError::MissingRoot {
                name: root.to_string(),
            });
        }

        Ok(Self {
            definitions,
            root: root.to_string(),
            contributed: BTreeMap::new(),
            patterns: CompiledPatterns::default(),
            placement: None,
            frozen: false,
        })
    }

    /// Applies directives in order.
    ///
    /// The batch is transactional: on error the registry is left exactly
    /// as it was before the call.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Frozen`] on a frozen registry, otherwise
    /// the first error raised by a directive.
    pub fn apply(&mut self, directives: &[ExtensionDirective]) -> Result<(), ExtensionError> {
        if self.frozen {
            return Err(ExtensionError::Frozen);
        }

        let mut staged = self.clone();
        for directive in directives {
            staged.apply_one(directive)?;
            debug!(
                action = directive.action(),
                target = directive.target(),
                "Applied extension directive"
            );
        }
        *self = staged;
        Ok(())
    }

    fn apply_one(&mut self, directive: &ExtensionDirective) -> Result<(), ExtensionError> {
        let target = directive.target();
        if !self.definitions.contains_key(target) {
            return Err(ExtensionError::UnknownTarget {
                target: target.to_string(),
            });
        }

        match directive {
            ExtensionDirective::Replace {
                definition,
                supporting,
                ..
            } => {
                self.install_all(supporting)?;
                let mut replacement = definition.clone();
                replacement.name = target.to_string();
                if let Some(keys) = self.contributed.get_mut(target) {
                    let fields = replacement.fields();
                    keys.retain(|key| fields.is_some_and(|f| f.contains_key(key)));
                }
                self.definitions.insert(target.to_string(), replacement);
            }
            ExtensionDirective::AddToSchema {
                key,
                definition,
                required,
                supporting,
                ..
            } => {
                let existing = &self.definitions[target];
                let Some(fields) = existing.fields() else {
                    return Err(ExtensionError::NotComposite {
                        target: target.to_string(),
                    });
                };
                if fields.contains_key(key) {
                    return Err(ExtensionError::DuplicateFieldKey {
                        target: target.to_string(),
                        key: key.clone(),
                    });
                }

                self.install_all(supporting)?;
                self.install(definition)?;
                let spec = FieldSpec {
                    definition: definition.name.clone(),
                    required: *required,
                    default: None,
                };
                if let Some(ElementKind::Composite { fields }) =
                    self.definitions.get_mut(target).map(|d| &mut d.kind)
                {
                    fields.insert(key.clone(), spec);
                }
                self.contributed
                    .entry(target.to_string())
                    .or_default()
                    .insert(key.clone());
            }
            ExtensionDirective::AddBehavior { validators, .. } => {
                if let Some(existing) = self.definitions.get_mut(target) {
                    existing.validators.extend(validators.iter().cloned());
                }
            }
        }
        Ok(())
    }

    fn install_all(&mut self, definitions: &[ElementDefinition]) -> Result<(), ExtensionError> {
        definitions.iter().try_for_each(|d| self.install(d))
    }

    fn install(&mut self, definition: &ElementDefinition) -> Result<(), ExtensionError> {
        match self.definitions.get(&definition.name) {
            Some(existing) if existing == definition => Ok(()),
            Some(_) => Err(ExtensionError::DefinitionConflict {
                name: definition.name.clone(),
            }),
            None => {
                self.definitions
                    .insert(definition.name.clone(), definition.clone());
                Ok(())
            }
        }
    }

    /// Checks the schema and makes the registry read-only.
    ///
    /// Freezing an already frozen registry is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::UnresolvedReference`] for dangling child
    /// references, [`ExtensionError::Cycle`] if a definition can contain
    /// itself, or [`ExtensionError::InvalidValidator`] for a validator that
    /// cannot run.
    pub fn freeze(&mut self) -> Result<(), ExtensionError> {
        if self.frozen {
            return Ok(());
        }

        let mut patterns = BTreeMap::new();
        for definition in self.definitions.values() {
            for reference in definition.kind.references() {
                if !self.definitions.contains_key(reference) {
                    return Err(ExtensionError::UnresolvedReference {
                        definition: definition.name.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
            for validator in &definition.validators {
                let invalid = |reason: String| ExtensionError::InvalidValidator {
                    definition: definition.name.clone(),
                    reason,
                };
                if let Some(regex) = validator.prepare().map_err(invalid)? {
                    patterns.insert(regex.as_str().to_string(), regex);
                }
            }
        }

        let mut finished = BTreeSet::new();
        for name in self.definitions.keys() {
            let mut path = Vec::new();
            self.check_acyclic(name, &mut path, &mut finished)?;
        }

        self.patterns = CompiledPatterns(patterns);
        self.frozen = true;
        debug!(
            root = %self.root,
            definitions = self.definitions.len(),
            patterns = self.patterns.0.len(),
            "Froze schema registry"
        );
        Ok(())
    }

    fn check_acyclic<'a>(
        &'a self,
        name: &'a str,
        path: &mut Vec<&'a str>,
        finished: &mut BTreeSet<&'a str>,
    ) -> Result<(), ExtensionError> {
        if finished.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|segment| *segment == name) {
            let cycle = path[start..]
                .iter()
                .copied()
                .chain(std::iter::once(name))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ExtensionError::Cycle(cycle));
        }

        path.push(name);
        if let Some(definition) = self.definitions.get(name) {
            for reference in definition.kind.references() {
                self.check_acyclic(reference, path, finished)?;
            }
        }
        path.pop();
        finished.insert(name);
        Ok(())
    }

    /// Returns `true` once [`freeze`](Registry::freeze) has succeeded.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Name of the root definition.
    pub fn root_name(&self) -> &str {
        &self.root
    }

    /// The root definition.
    pub fn root(&self) -> &ElementDefinition {
        &self.definitions[&self.root]
    }

    /// Looks up a definition by name.
    pub fn definition(&self, name: &str) -> Option<&ElementDefinition> {
        self.definitions.get(name)
    }

    /// Iterates definitions in name order.
    pub fn definitions(&self) -> impl Iterator<Item = &ElementDefinition> {
        self.definitions.values()
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns `true` when no definitions are registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Installs the host placement step run after every emit.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Frozen`] on a frozen registry.
    pub fn set_host_placement(&mut self, placement: HostPlacement) -> Result<(), ExtensionError> {
        if self.frozen {
            return Err(ExtensionError::Frozen);
        }
        self.placement = Some(placement);
        Ok(())
    }

    /// The host placement step, if a profile installed one.
    pub fn host_placement(&self) -> Option<&HostPlacement> {
        self.placement.as_ref()
    }

    /// Returns the regex compiled at freeze for a pattern validator.
    pub fn compiled_pattern(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.0.get(pattern)
    }

    /// Field keys that directives added to `target`.
    pub fn contributed_fields(&self, target: &str) -> Vec<&str> {
        self.contributed
            .get(target)
            .map(|keys| keys.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Registers, extends and freezes a registry in one call.
///
/// # Errors
///
/// Returns the first [`ExtensionError`] raised while seeding, applying or
/// freezing. No registry is produced on failure.
pub fn build_registry(
    root: &str,
    base: impl IntoIterator<Item = ElementDefinition>,
    directives: &[ExtensionDirective],
) -> Result<Registry, ExtensionError> {
    let mut registry = Registry::register(root, base)?;
    registry.apply(directives)?;
    registry.freeze()?;
    Ok(registry)
}
