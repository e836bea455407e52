//! Error types for every phase of the pipeline.
//!
//! Each phase fails fast with its own error family; [`ParseError`] wraps
//! the families a single parse call can produce. Every error carries
//! enough path or key context to locate the offending construct.

use thiserror::Error;

use crate::element::InstancePath;

/// Malformed profile composition. Always detected before any parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    /// A directive targets a definition the registry does not hold.
    #[error("unknown extension target: {target}")]
    UnknownTarget { target: String },
    /// ADD_TO_SCHEMA targets a field key the definition already declares.
    #[error("duplicate field key '{key}' on definition '{target}'")]
    DuplicateFieldKey { target: String, key: String },
    /// ADD_TO_SCHEMA targets a leaf, list or map definition.
    #[error("definition '{target}' is not composite")]
    NotComposite { target: String },
    /// A directive introduces a definition whose name is taken by a
    /// different definition.
    #[error("conflicting definition for '{name}'")]
    DefinitionConflict { name: String },
    /// The base vocabulary declares the same name twice.
    #[error("duplicate definition in base schema: {name}")]
    DuplicateDefinition { name: String },
    /// The base vocabulary lacks the root definition.
    #[error("root definition '{name}' is not registered")]
    MissingRoot { name: String },
    /// A child reference names no registered definition.
    #[error("definition '{definition}' refers to unknown definition '{reference}'")]
    UnresolvedReference { definition: String, reference: String },
    /// Composite nesting contains a cycle.
    #[error("definition cycle detected at path: {0}")]
    Cycle(String),
    /// A validator cannot be prepared (e.g. an invalid pattern).
    #[error("invalid validator on '{definition}': {reason}")]
    InvalidValidator { definition: String, reason: String },
    /// Directives were applied after the registry was frozen.
    #[error("registry is frozen")]
    Frozen,
}

/// Conflicting import contributions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// A MERGE_NO_OVERRIDE key (or one of its entries) is defined with
    /// different content by more than one document.
    #[error(
        "duplicate definition for '{}' in {}",
        qualified(.key, .entry.as_deref()),
        .documents.join(", ")
    )]
    DuplicateDefinition {
        key: String,
        entry: Option<String>,
        documents: Vec<String>,
    },
    /// A MERGE_UNION key received incompatible contributions.
    #[error(
        "union conflict for '{}' in {}",
        qualified(.key, .entry.as_deref()),
        .documents.join(", ")
    )]
    UnionConflict {
        key: String,
        entry: Option<String>,
        documents: Vec<String>,
    },
    /// A contributing document is not a mapping at top level.
    #[error("document '{document}' must be a mapping, found {found}")]
    NotAMapping { document: String, found: String },
}

fn qualified(key: &str, entry: Option<&str>) -> String {
    match entry {
        Some(entry) => format!("{key}.{entry}"),
        None => key.to_string(),
    }
}

/// Document shape mismatch against the schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// The raw fragment has the wrong shape or primitive type.
    #[error("{path}: expected {expected}, found {found}")]
    UnexpectedType {
        path: InstancePath,
        expected: String,
        found: String,
    },
    /// A required field is absent.
    #[error("{path}: missing required field '{field}'")]
    MissingField { path: InstancePath, field: String },
    /// A key is not declared by the composite definition.
    #[error("{path}: unknown field '{field}'")]
    UnknownField { path: InstancePath, field: String },
    /// A definition referenced during the build is not registered.
    #[error("{path}: unknown definition '{definition}'")]
    UnknownDefinition {
        path: InstancePath,
        definition: String,
    },
}

/// Validator rejection.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::{InstancePath, SemanticError};
///
/// let err = SemanticError::new(InstancePath::root().child("plugins"), 18, "bad executor");
/// assert_eq!(err.to_string(), "plugins: [18] bad executor");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: [{code}] {message}")]
pub struct SemanticError {
    /// Location of the offending instance.
    pub path: InstancePath,
    /// Stable numeric error code.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl SemanticError {
    /// Creates a semantic error.
    pub fn new(path: InstancePath, code: u32, message: impl Into<String>) -> Self {
        Self {
            path,
            code,
            message: message.into(),
        }
    }
}

/// No enclosing instance of the requested definition exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no enclosing '{definition}' above {path}")]
pub struct NotFound {
    pub definition: String,
    pub path: InstancePath,
}

/// Plan assembly failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    /// A profile-contributed section collides with a base section.
    #[error("duplicate plan section: {section}")]
    DuplicateSection { section: String },
}

/// Import resolution failure reported by an [`ImportResolver`](crate::ImportResolver).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The resolver knows no document for the reference.
    #[error("import not found: {reference}")]
    NotFound { reference: String },
    /// An `imports` entry is not a string.
    #[error("invalid import entry: {reference}")]
    InvalidImport { reference: String },
    /// The resolver located the document but could not produce a tree.
    #[error("failed to resolve import '{reference}': {reason}")]
    Failed { reference: String, reason: String },
}

/// Any failure produced by a parse call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The registry was handed to the parser before being frozen.
    #[error("registry must be frozen before parsing")]
    RegistryNotFrozen,
    #[error("import resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),
    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),
    #[error("emit failed: {0}")]
    Emit(#[from] EmitError),
}
