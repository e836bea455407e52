//! Semantic validation of a structurally parsed instance tree.
//!
//! Validators are data ([`Validator`]) attached to definitions. The tree is
//! walked depth-first, children before their parent, and each instance runs
//! its definition's validators in declaration order. The first failure
//! aborts the walk.
//!
//! Upward context is available through an explicit ancestor chain
//! ([`Ancestors`]) built on the stack during the walk, so instances never
//! need to hold references to their parents.
//!
//! # Examples
//!
//! ```
//! use blueprint_schema_core::*;
//! use serde_json::json;
//!
//! let executor = ElementDefinition::leaf("plugin_executor", LeafType::String).with_validator(
//!     Validator::allowed_values(["central_deployment_agent", "host_agent"]).owned_by("plugin"),
//! );
//! let registry = build_registry(
//!     "plugins",
//!     [
//!         ElementDefinition::map("plugins", "plugin"),
//!         ElementDefinition::composite("plugin").required("executor", "plugin_executor"),
//!         executor,
//!     ],
//!     &[],
//! )
//! .unwrap();
//!
//! let tree = ElementInstance::build(&registry, "plugins", &json!({"p1": {"executor": "bogus"}}))
//!     .unwrap();
//! let err = validate_tree(&registry, &tree).unwrap_err();
//! assert!(err.message.contains("'p1'"));
//! ```

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::element::{Children, ElementInstance};
use crate::error::{NotFound, SemanticError};
use crate::registry::Registry;
use crate::types::RawTree;

/// Stable error codes emitted by the built-in validators.
pub mod codes {
    /// Value outside an enumerated set.
    pub const ALLOWED_VALUES: u32 = 1;
    /// String does not match a pattern.
    pub const PATTERN: u32 = 2;
    /// Empty string, list or mapping.
    pub const NON_EMPTY: u32 = 3;
    /// Reference to an entry that does not exist.
    pub const DANGLING_REFERENCE: u32 = 10;
    /// Plugin executor outside the profile's allowed executors.
    pub const ILLEGAL_PLUGIN_EXECUTOR: u32 = 18;
}

fn allowed_values_code() -> u32 {
    codes::ALLOWED_VALUES
}

fn pattern_code() -> u32 {
    codes::PATTERN
}

fn non_empty_code() -> u32 {
    codes::NON_EMPTY
}

fn reference_code() -> u32 {
    codes::DANGLING_REFERENCE
}

type CheckFn = dyn Fn(&ValidationContext<'_>) -> Result<(), SemanticError> + Send + Sync;

/// Host-supplied validator for rules that cannot be expressed as data.
///
/// Custom validators are not serializable; profiles loaded from files can
/// only use the data variants of [`Validator`].
#[derive(Clone)]
pub struct CustomValidator {
    label: String,
    check: Arc<CheckFn>,
}

impl CustomValidator {
    /// Wraps a check closure under a descriptive label.
    pub fn new<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&ValidationContext<'_>) -> Result<(), SemanticError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    /// Returns the label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for CustomValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValidator")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomValidator {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && Arc::ptr_eq(&self.check, &other.check)
    }
}

/// A semantic check attached to an element definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Validator {
    /// The scalar value must be one of `values`. When `owner` names a
    /// definition, the message cites the nearest enclosing instance of it.
    AllowedValues {
        values: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(default = "allowed_values_code")]
        code: u32,
    },
    /// The string value must match `pattern`.
    Pattern {
        pattern: String,
        #[serde(default = "pattern_code")]
        code: u32,
    },
    /// The value must not be an empty string, sequence or mapping.
    NonEmpty {
        #[serde(default = "non_empty_code")]
        code: u32,
    },
    /// The string value (or each string of a sequence) must name an entry
    /// of the root instance's `section`.
    ReferenceTo {
        section: String,
        #[serde(default = "reference_code")]
        code: u32,
    },
    /// Host-supplied check.
    #[serde(skip)]
    Custom(CustomValidator),
}

impl Validator {
    /// Creates an [`AllowedValues`](Validator::AllowedValues) check.
    pub fn allowed_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllowedValues {
            values: values.into_iter().map(Into::into).collect(),
            owner: None,
            code: codes::ALLOWED_VALUES,
        }
    }

    /// Creates a [`Pattern`](Validator::Pattern) check.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            code: codes::PATTERN,
        }
    }

    /// Creates a [`NonEmpty`](Validator::NonEmpty) check.
    pub fn non_empty() -> Self {
        Self::NonEmpty {
            code: codes::NON_EMPTY,
        }
    }

    /// Creates a [`ReferenceTo`](Validator::ReferenceTo) check.
    pub fn reference_to(section: impl Into<String>) -> Self {
        Self::ReferenceTo {
            section: section.into(),
            code: codes::DANGLING_REFERENCE,
        }
    }

    /// Creates a [`Custom`](Validator::Custom) check.
    pub fn custom<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&ValidationContext<'_>) -> Result<(), SemanticError> + Send + Sync + 'static,
    {
        Self::Custom(CustomValidator::new(label, check))
    }

    /// Sets the owner definition cited by an allowed-values message.
    pub fn owned_by(mut self, definition: impl Into<String>) -> Self {
        if let Self::AllowedValues { owner, .. } = &mut self {
            *owner = Some(definition.into());
        }
        self
    }

    /// Overrides the error code. Has no effect on custom validators.
    pub fn with_code(mut self, new_code: u32) -> Self {
        match &mut self {
            Self::AllowedValues { code, .. }
            | Self::Pattern { code, .. }
            | Self::NonEmpty { code }
            | Self::ReferenceTo { code, .. } => *code = new_code,
            Self::Custom(_) => {}
        }
        self
    }

    /// Checks that the validator can run. Returns the compiled regex of a
    /// pattern validator.
    pub(crate) fn prepare(&self) -> Result<Option<Regex>, String> {
        match self {
            Self::Pattern { pattern, .. } => Regex::new(pattern)
                .map(Some)
                .map_err(|err| err.to_string()),
            Self::AllowedValues { values, .. } if values.is_empty() => {
                Err("allowed values cannot be empty".to_string())
            }
            _ => Ok(None),
        }
    }

    fn run(&self, ctx: &ValidationContext<'_>) -> Result<(), SemanticError> {
        let instance = ctx.instance();
        let field = instance.name();
        match self {
            Self::AllowedValues {
                values,
                owner,
                code,
            } => {
                let Some(text) = instance.raw().and_then(scalar_text) else {
                    return Err(ctx.error(*code, format!("'{field}' must be a scalar value")));
                };
                if values.iter().any(|allowed| *allowed == text) {
                    return Ok(());
                }
                let allowed = quoted_list(values);
                let owner = owner
                    .as_deref()
                    .and_then(|definition| ctx.ancestor(definition).ok());
                let message = match owner {
                    Some(owner) => format!(
                        "{} '{}' has an illegal '{field}' value '{text}'; value must be one of {allowed}",
                        capitalize(owner.definition()),
                        owner.name(),
                    ),
                    None => format!(
                        "illegal '{field}' value '{text}'; value must be one of {allowed}"
                    ),
                };
                Err(ctx.error(*code, message))
            }
            Self::Pattern { pattern, code } => {
                let Some(text) = instance.raw().and_then(RawTree::as_str) else {
                    return Err(ctx.error(*code, format!("'{field}' must be a string")));
                };
                let Some(regex) = ctx.registry().compiled_pattern(pattern) else {
                    return Err(ctx.error(
                        *code,
                        format!("pattern '{pattern}' is not compiled; freeze the registry first"),
                    ));
                };
                if regex.is_match(text) {
                    Ok(())
                } else {
                    Err(ctx.error(
                        *code,
                        format!("'{field}' value '{text}' does not match pattern '{pattern}'"),
                    ))
                }
            }
            Self::NonEmpty { code } => {
                let empty = match instance.children() {
                    Children::Leaf(RawTree::String(s)) => s.trim().is_empty(),
                    Children::Leaf(RawTree::Array(items)) => items.is_empty(),
                    Children::Leaf(RawTree::Object(map)) => map.is_empty(),
                    Children::Leaf(RawTree::Null) => true,
                    Children::Leaf(_) => false,
                    Children::Items(items) => items.is_empty(),
                    Children::Fields(map) | Children::Entries(map) => map.is_empty(),
                };
                if empty {
                    Err(ctx.error(*code, format!("'{field}' cannot be empty")))
                } else {
                    Ok(())
                }
            }
            Self::ReferenceTo { section, code } => {
                let names = ctx
                    .root()
                    .child(section)
                    .map(ElementInstance::entry_names)
                    .unwrap_or_default();
                let referenced: Vec<&str> = match instance.children() {
                    Children::Leaf(RawTree::String(s)) => vec![s.as_str()],
                    Children::Leaf(RawTree::Array(items)) => {
                        items.iter().filter_map(RawTree::as_str).collect()
                    }
                    Children::Items(items) => items
                        .iter()
                        .filter_map(|item| item.raw().and_then(RawTree::as_str))
                        .collect(),
                    _ => Vec::new(),
                };
                match referenced.into_iter().find(|name| !names.contains(name)) {
                    Some(missing) => Err(ctx.error(
                        *code,
                        format!("'{field}' refers to unknown {section} entry '{missing}'"),
                    )),
                    None => Ok(()),
                }
            }
            Self::Custom(custom) => (custom.check)(ctx),
        }
    }
}

fn scalar_text(value: &RawTree) -> Option<String> {
    match value {
        RawTree::String(s) => Some(s.clone()),
        RawTree::Bool(b) => Some(b.to_string()),
        RawTree::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Non-owning chain of enclosing instances, innermost first.
#[derive(Debug, Clone, Copy)]
pub struct Ancestors<'a> {
    instance: &'a ElementInstance,
    parent: Option<&'a Ancestors<'a>>,
}

impl<'a> Ancestors<'a> {
    /// Iterates from the nearest enclosing instance up to the root.
    pub fn iter(&self) -> AncestorIter<'a> {
        AncestorIter {
            next: Some(*self),
        }
    }
}

/// Iterator over an [`Ancestors`] chain.
#[derive(Debug, Clone)]
pub struct AncestorIter<'a> {
    next: Option<Ancestors<'a>>,
}

impl<'a> Iterator for AncestorIter<'a> {
    type Item = &'a ElementInstance;

    fn next(&mut self) -> Option<Self::Item> {
        let link = self.next.take()?;
        self.next = link.parent.copied();
        Some(link.instance)
    }
}

/// What a validator sees: its instance, the ancestor chain and the registry.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    registry: &'a Registry,
    instance: &'a ElementInstance,
    ancestors: Option<&'a Ancestors<'a>>,
}

impl<'a> ValidationContext<'a> {
    /// The instance under validation.
    pub fn instance(&self) -> &'a ElementInstance {
        self.instance
    }

    /// The frozen registry the tree was built against.
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Iterates enclosing instances, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &'a ElementInstance> + 'a {
        self.ancestors
            .map(|chain| chain.iter())
            .into_iter()
            .flatten()
    }

    /// Returns the nearest enclosing instance built against `definition`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`] when no ancestor matches.
    pub fn ancestor(&self, definition: &str) -> Result<&'a ElementInstance, NotFound> {
        self.ancestors()
            .find(|ancestor| ancestor.definition() == definition)
            .ok_or_else(|| NotFound {
                definition: definition.to_string(),
                path: self.instance.path().clone(),
            })
    }

    /// Returns the document root.
    pub fn root(&self) -> &'a ElementInstance {
        self.ancestors().last().unwrap_or(self.instance)
    }

    /// Builds a semantic error located at the instance under validation.
    pub fn error(&self, code: u32, message: impl Into<String>) -> SemanticError {
        SemanticError::new(self.instance.path().clone(), code, message)
    }
}

/// Runs every validator in the tree rooted at `root`.
///
/// # Errors
///
/// Returns the first [`SemanticError`] raised. Children are validated
/// before their parent; siblings in key (or list) order.
pub fn validate_tree(registry: &Registry, root: &ElementInstance) -> Result<(), SemanticError> {
    validate_node(registry, root, None)
}

fn validate_node<'a>(
    registry: &'a Registry,
    instance: &'a ElementInstance,
    ancestors: Option<&'a Ancestors<'a>>,
) -> Result<(), SemanticError> {
    let link = Ancestors {
        instance,
        parent: ancestors,
    };
    for child in instance.child_instances() {
        validate_node(registry, child, Some(&link))?;
    }

    let Some(definition) = registry.definition(instance.definition()) else {
        return Ok(());
    };
    let ctx = ValidationContext {
        registry,
        instance,
        ancestors,
    };
    for validator in &definition.validators {
        validator.run(&ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::registry::build_registry;
    use crate::types::{ElementDefinition, LeafType};

    use super::*;

    fn plugin_registry(executor: Validator) -> Registry {
        build_registry(
            "blueprint",
            [
                ElementDefinition::composite("blueprint")
                    .optional("plugins", "plugins")
                    .optional("node_types", "node_types")
                    .optional("node_templates", "node_templates"),
                ElementDefinition::map("plugins", "plugin"),
                ElementDefinition::composite("plugin")
                    .required("name", "plugin_name")
                    .optional("executor", "plugin_executor"),
                ElementDefinition::leaf("plugin_name", LeafType::String)
                    .with_validator(Validator::non_empty()),
                ElementDefinition::leaf("plugin_executor", LeafType::String)
                    .with_validator(executor),
                ElementDefinition::map("node_types", "node_type"),
                ElementDefinition::leaf("node_type", LeafType::Any),
                ElementDefinition::map("node_templates", "node_template"),
                ElementDefinition::composite("node_template").required("type", "type_reference"),
                ElementDefinition::leaf("type_reference", LeafType::String)
                    .with_validator(Validator::reference_to("node_types")),
            ],
            &[],
        )
        .unwrap()
    }

    fn check(registry: &Registry, doc: RawTree) -> Result<(), SemanticError> {
        let tree = ElementInstance::build(registry, "blueprint", &doc).unwrap();
        validate_tree(registry, &tree)
    }

    #[test]
    fn test_allowed_values_cites_owner() {
        let registry = plugin_registry(
            Validator::allowed_values(["central_deployment_agent", "host_agent"])
                .owned_by("plugin")
                .with_code(codes::ILLEGAL_PLUGIN_EXECUTOR),
        );
        let err = check(
            &registry,
            json!({"plugins": {"p1": {"name": "p1", "executor": "bogus"}}}),
        )
        .unwrap_err();
        assert_eq!(err.code, 18);
        assert_eq!(err.path.to_string(), "plugins.p1.executor");
        assert_eq!(
            err.message,
            "Plugin 'p1' has an illegal 'executor' value 'bogus'; value must be one of \
             'central_deployment_agent', 'host_agent'"
        );
    }

    #[test]
    fn test_allowed_values_without_matching_owner() {
        let registry =
            plugin_registry(Validator::allowed_values(["host_agent"]).owned_by("operation"));
        let err = check(
            &registry,
            json!({"plugins": {"p1": {"name": "p1", "executor": "x"}}}),
        )
        .unwrap_err();
        assert_eq!(
            err.message,
            "illegal 'executor' value 'x'; value must be one of 'host_agent'"
        );
    }

    #[test]
    fn test_reference_to_checks_root_section() {
        let registry = plugin_registry(Validator::non_empty());
        let ok = check(
            &registry,
            json!({"node_types": {"web": {}}, "node_templates": {"n1": {"type": "web"}}}),
        );
        assert!(ok.is_ok());

        let err = check(
            &registry,
            json!({"node_types": {"web": {}}, "node_templates": {"n1": {"type": "db"}}}),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::DANGLING_REFERENCE);
        assert!(err.message.contains("unknown node_types entry 'db'"));
    }

    #[test]
    fn test_first_failure_in_order_wins() {
        let registry = plugin_registry(Validator::pattern("^[a-z_]+$"));
        let err = check(
            &registry,
            json!({"plugins": {"a": {"name": " "}, "b": {"name": "b", "executor": "Host"}}}),
        )
        .unwrap_err();
        assert_eq!(err.path.to_string(), "plugins.a.name");
        assert_eq!(err.code, codes::NON_EMPTY);
    }

    #[test]
    fn test_custom_validator_reads_ancestor() {
        let registry = plugin_registry(Validator::custom("executor matches plugin", |ctx| {
            let plugin = ctx
                .ancestor("plugin")
                .map_err(|err| ctx.error(99, err.to_string()))?;
            let name = plugin.child("name").and_then(|n| n.raw()?.as_str());
            if ctx.instance().raw().and_then(RawTree::as_str) == name {
                Ok(())
            } else {
                Err(ctx.error(99, "executor must equal plugin name"))
            }
        }));
        assert!(check(
            &registry,
            json!({"plugins": {"p1": {"name": "p1", "executor": "p1"}}})
        )
        .is_ok());
        let err = check(
            &registry,
            json!({"plugins": {"p1": {"name": "p1", "executor": "p2"}}}),
        )
        .unwrap_err();
        assert_eq!(err.code, 99);
    }

    #[test]
    fn test_ancestor_not_found() {
        let registry = plugin_registry(Validator::custom("needs group", |ctx| {
            ctx.ancestor("group")
                .map(|_| ())
                .map_err(|err| ctx.error(7, err.to_string()))
        }));
        let err = check(
            &registry,
            json!({"plugins": {"p1": {"name": "p1", "executor": "x"}}}),
        )
        .unwrap_err();
        assert_eq!(err.message, "no enclosing 'group' above plugins.p1.executor");
    }

    #[test]
    fn test_validator_yaml_shape() {
        let validator: Validator = serde_yaml::from_str(
            "check: allowed_values\nvalues: [a, b]\nowner: plugin\ncode: 18\n",
        )
        .unwrap();
        assert_eq!(
            validator,
            Validator::allowed_values(["a", "b"]).owned_by("plugin").with_code(18)
        );
        let reference: Validator =
            serde_yaml::from_str("check: reference_to\nsection: node_types\n").unwrap();
        assert_eq!(reference, Validator::reference_to("node_types"));
    }
}
