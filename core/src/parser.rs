//! Two-phase parse: structural build, then semantic validation.
//!
//! The phases are encoded as types so there is no way back:
//!
//! ```text
//! merged raw tree ──structural()──▶ StructuralTree ──validate()──▶ ValidatedTree ──emit()──▶ Plan
//! ```
//!
//! Any failure aborts the call and no partial tree is exposed.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::element::ElementInstance;
use crate::error::{EmitError, ParseError, SemanticError, StructuralError};
use crate::imports::{ImportResolver, collect_sources};
use crate::merge::{MergePolicyTable, SourceTree, merge};
use crate::plan::{Plan, emit};
use crate::registry::Registry;
use crate::types::RawTree;
use crate::validate::validate_tree;

/// Parses documents against a frozen registry.
#[derive(Debug, Clone, Copy)]
pub struct Parser<'r> {
    registry: &'r Registry,
}

impl<'r> Parser<'r> {
    /// Creates a parser.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::RegistryNotFrozen`] unless the registry has
    /// been frozen.
    pub fn new(registry: &'r Registry) -> Result<Self, ParseError> {
        if !registry.is_frozen() {
            return Err(ParseError::RegistryNotFrozen);
        }
        Ok(Self { registry })
    }

    /// The registry this parser reads.
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Merges `sources`, then parses, validates and emits the result.
    ///
    /// # Errors
    ///
    /// Returns the first merge, structural, semantic or emit error.
    pub fn parse(
        &self,
        sources: &[SourceTree],
        policies: &MergePolicyTable,
    ) -> Result<Plan, ParseError> {
        let merged = merge(sources, policies)?;
        let plan = self.structural(&merged)?.validate()?.emit()?;
        info!(
            sources = sources.len(),
            sections = plan.len(),
            "Parsed blueprint"
        );
        Ok(plan)
    }

    /// Resolves the imports of `main`, then behaves like [`parse`](Parser::parse).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Resolve`] if an import cannot be resolved, or
    /// any error [`parse`](Parser::parse) can return.
    pub fn parse_document(
        &self,
        main: SourceTree,
        resolver: &dyn ImportResolver,
        policies: &MergePolicyTable,
    ) -> Result<Plan, ParseError> {
        let sources = collect_sources(main, resolver)?;
        self.parse(&sources, policies)
    }

    /// Runs the structural phase on an already merged tree.
    ///
    /// # Errors
    ///
    /// Returns the first [`StructuralError`] found.
    pub fn structural(&self, merged: &RawTree) -> Result<StructuralTree<'r>, StructuralError> {
        let root = ElementInstance::build(self.registry, self.registry.root_name(), merged)?;
        debug!(root = %self.registry.root_name(), "Structural parse complete");
        Ok(StructuralTree {
            registry: self.registry,
            root,
        })
    }
}

/// A tree whose shape matches the schema but whose semantics are unchecked.
#[derive(Debug, Clone)]
pub struct StructuralTree<'r> {
    registry: &'r Registry,
    root: ElementInstance,
}

impl<'r> StructuralTree<'r> {
    /// The root instance.
    pub fn root(&self) -> &ElementInstance {
        &self.root
    }

    /// Runs every validator.
    ///
    /// # Errors
    ///
    /// Returns the first [`SemanticError`].
    pub fn validate(self) -> Result<ValidatedTree<'r>, SemanticError> {
        validate_tree(self.registry, &self.root)?;
        debug!("Semantic validation complete");
        Ok(ValidatedTree {
            registry: self.registry,
            root: self.root,
        })
    }
}

/// A fully validated tree, ready to be emitted.
#[derive(Debug, Clone)]
pub struct ValidatedTree<'r> {
    registry: &'r Registry,
    root: ElementInstance,
}

impl ValidatedTree<'_> {
    /// The root instance.
    pub fn root(&self) -> &ElementInstance {
        &self.root
    }

    /// Emits the plan. Root fields added by profiles are passed to the
    /// emitter as extra sections and are always present, null when the
    /// document omits them. A profile's host placement step runs last.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::DuplicateSection`] on a section collision.
    pub fn emit(&self) -> Result<Plan, EmitError> {
        let contributed = self.registry.contributed_fields(self.registry.root_name());
        let base = self.root.without_fields(&contributed);
        let extras: BTreeMap<String, &ElementInstance> = contributed
            .iter()
            .filter_map(|key| self.root.child(key).map(|child| (key.to_string(), child)))
            .collect();

        let mut plan = emit(&base, &extras)?;
        for key in contributed {
            if !plan.contains(key) {
                plan.insert_section(key, RawTree::Null)?;
            }
        }
        if let Some(placement) = self.registry.host_placement() {
            placement.assemble(&mut plan)?;
        }
        Ok(plan)
    }
}

/// Parses ordered raw trees against a frozen registry.
///
/// # Errors
///
/// See [`Parser::new`] and [`Parser::parse`].
pub fn parse(
    registry: &Registry,
    sources: &[SourceTree],
    policies: &MergePolicyTable,
) -> Result<Plan, ParseError> {
    Parser::new(registry)?.parse(sources, policies)
}
