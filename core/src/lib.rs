//! Schema-driven parser and validator for blueprint documents.
//!
//! The engine is organized around a [`Registry`] of element definitions
//! that profiles can extend without touching the base vocabulary:
//!
//! - [`ElementDefinition`] describes one node of the schema tree (leaf,
//!   composite, list or map) plus its [`Validator`]s.
//! - [`ExtensionDirective`]s (replace, add-to-schema, add-behavior) are
//!   applied in order and the registry is then frozen.
//! - [`merge`] combines imported documents according to a
//!   [`MergePolicyTable`], after [`collect_sources`] has walked the imports.
//! - [`Parser`] runs the structural phase, then semantic validation, and
//!   emits a [`Plan`].
//! - [`profiles`] bundles directives into named profiles; [`vocabulary`]
//!   holds the base schema. A profile may also install a
//!   [`HostPlacement`] step that runs after emission.
//!
//! # Example
//!
//! ```
//! use blueprint_schema_core::*;
//! use serde_json::json;
//!
//! let activation = profiles::cloudify_v1_0().activate().unwrap();
//! let blueprint = json!({
//!     "tosca_definitions_version": "cloudify_dsl_1_0",
//!     "plugins": {"p1": {"name": "p1", "executor": "host_agent"}}
//! });
//!
//! let plan = parse(
//!     &activation.registry,
//!     &[SourceTree::new("blueprint.yaml", blueprint)],
//!     &activation.policies,
//! )
//! .unwrap();
//! assert_eq!(plan.lookup("plugins.p1.executor"), Some(&json!("host_agent")));
//! ```

mod element;
mod error;
mod imports;
mod merge;
mod parser;
mod placement;
mod plan;
pub mod profiles;
mod registry;
mod types;
mod validate;
pub mod vocabulary;

pub use element::{Children, ElementInstance, InstancePath};
pub use error::{
    EmitError, ExtensionError, MergeError, NotFound, ParseError, ResolveError, SemanticError,
    StructuralError,
};
pub use imports::{IMPORTS_KEY, ImportResolver, MapResolver, collect_sources};
pub use merge::{MergePolicy, MergePolicyTable, SourceTree, merge};
pub use parser::{Parser, StructuralTree, ValidatedTree, parse};
pub use placement::{HostPlacement, PLACEMENT_SECTION};
pub use plan::{Plan, emit};
pub use profiles::{Profile, ProfileActivation, activate};
pub use registry::{ExtensionDirective, Registry, build_registry};
pub use types::*;
pub use validate::{
    AncestorIter, Ancestors, CustomValidator, ValidationContext, Validator, codes, validate_tree,
};
