//! Element definition types for blueprint schema modeling.
//!
//! An [`ElementDefinition`] is a named schema node. Definitions refer to
//! their children by *name*, never by value, so that replacing a definition
//! in the [`Registry`](crate::Registry) is observed by every composite, list
//! and map that points at it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::validate::Validator;

/// Generic nested mapping/sequence/scalar data produced by a document loader.
pub type RawTree = serde_json::Value;

/// Primitive type accepted by a leaf definition.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::LeafType;
/// use serde_json::json;
///
/// assert!(LeafType::String.accepts(&json!("host_agent")));
/// assert!(!LeafType::String.accepts(&json!(3)));
/// assert!(LeafType::Number.accepts(&json!(3)));
/// assert!(LeafType::Any.accepts(&json!({"a": 1})));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeafType {
    /// UTF-8 string (the default).
    #[default]
    String,
    /// Signed or unsigned integer.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` / `false`.
    Boolean,
    /// Any value, including nested structures.
    Any,
}

impl LeafType {
    /// Returns `true` when `value` satisfies this primitive type.
    pub fn accepts(self, value: &RawTree) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Any => true,
        }
    }

    /// Returns the lowercase name used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Any => "any",
        }
    }
}

/// Returns a short name for the shape of a raw value.
pub fn shape_of(value: &RawTree) -> &'static str {
    match value {
        RawTree::Null => "null",
        RawTree::Bool(_) => "boolean",
        RawTree::Number(n) if n.is_f64() => "number",
        RawTree::Number(_) => "integer",
        RawTree::String(_) => "string",
        RawTree::Array(_) => "sequence",
        RawTree::Object(_) => "mapping",
    }
}

/// A field declared on a composite definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Name of the definition the field value is built against.
    pub definition: String,
    /// Whether the field must be present in the raw fragment.
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    /// Raw value used when the field is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<RawTree>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FieldSpec {
    /// Creates an optional field.
    pub fn optional(definition: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            required: false,
            default: None,
        }
    }

    /// Creates a required field.
    pub fn required(definition: impl Into<String>) -> Self {
        Self {
            required: true,
            ..Self::optional(definition)
        }
    }

    /// Sets the value used when the field is absent.
    pub fn with_default(mut self, value: RawTree) -> Self {
        self.default = Some(value);
        self
    }
}

/// Structural shape of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementKind {
    /// A scalar (or opaque) value checked against a primitive type.
    Leaf {
        #[serde(rename = "type", default)]
        leaf_type: LeafType,
    },
    /// A mapping with a fixed set of declared fields.
    Composite {
        #[serde(default)]
        fields: BTreeMap<String, FieldSpec>,
    },
    /// A sequence whose items share one definition.
    List { item: String },
    /// A mapping of user-chosen names to entries sharing one definition.
    Map { item: String },
}

impl ElementKind {
    /// Returns the kind name (`leaf`, `composite`, `list`, `map`).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Leaf { .. } => "leaf",
            Self::Composite { .. } => "composite",
            Self::List { .. } => "list",
            Self::Map { .. } => "map",
        }
    }

    /// Returns the names of every definition this kind refers to.
    pub fn references(&self) -> Vec<&str> {
        match self {
            Self::Leaf { .. } => Vec::new(),
            Self::Composite { fields } => {
                fields.values().map(|f| f.definition.as_str()).collect()
            }
            Self::List { item } | Self::Map { item } => vec![item.as_str()],
        }
    }
}

/// A named schema node type.
///
/// Use the constructors [`leaf`](ElementDefinition::leaf),
/// [`composite`](ElementDefinition::composite),
/// [`list`](ElementDefinition::list) and [`map`](ElementDefinition::map),
/// then chain builder methods.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::{ElementDefinition, LeafType};
///
/// let plugin = ElementDefinition::composite("plugin")
///     .required("name", "plugin_name")
///     .optional("source", "plugin_source");
/// assert!(plugin.is_composite());
/// assert_eq!(plugin.required_fields().into_iter().collect::<Vec<_>>(), vec!["name"]);
///
/// let name = ElementDefinition::leaf("plugin_name", LeafType::String);
/// assert_eq!(name.kind.label(), "leaf");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDefinition {
    /// Unique definition name.
    pub name: String,
    /// Structural shape.
    #[serde(flatten)]
    pub kind: ElementKind,
    /// Semantic checks run, in order, after the structural parse.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
}

impl ElementDefinition {
    /// Creates a leaf definition.
    pub fn leaf(name: impl Into<String>, leaf_type: LeafType) -> Self {
        Self::with_kind(name, ElementKind::Leaf { leaf_type })
    }

    /// Creates a composite definition with no fields.
    pub fn composite(name: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            ElementKind::Composite {
                fields: BTreeMap::new(),
            },
        )
    }

    /// Creates a list definition.
    pub fn list(name: impl Into<String>, item: impl Into<String>) -> Self {
        Self::with_kind(name, ElementKind::List { item: item.into() })
    }

    /// Creates a map definition.
    pub fn map(name: impl Into<String>, item: impl Into<String>) -> Self {
        Self::with_kind(name, ElementKind::Map { item: item.into() })
    }

    fn with_kind(name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            kind,
            validators: Vec::new(),
        }
    }

    /// Declares a field. Has no effect on non-composite definitions.
    pub fn field(mut self, key: impl Into<String>, spec: FieldSpec) -> Self {
        if let ElementKind::Composite { fields } = &mut self.kind {
            fields.insert(key.into(), spec);
        }
        self
    }

    /// Declares a required field.
    pub fn required(self, key: impl Into<String>, definition: impl Into<String>) -> Self {
        self.field(key, FieldSpec::required(definition))
    }

    /// Declares an optional field.
    pub fn optional(self, key: impl Into<String>, definition: impl Into<String>) -> Self {
        self.field(key, FieldSpec::optional(definition))
    }

    /// Appends a validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Returns `true` for composite definitions.
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, ElementKind::Composite { .. })
    }

    /// Returns the declared fields of a composite definition.
    pub fn fields(&self) -> Option<&BTreeMap<String, FieldSpec>> {
        match &self.kind {
            ElementKind::Composite { fields } => Some(fields),
            _ => None,
        }
    }

    /// Returns the keys of all required fields.
    pub fn required_fields(&self) -> BTreeSet<&str> {
        self.fields()
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, spec)| spec.required)
                    .map(|(key, _)| key.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}
