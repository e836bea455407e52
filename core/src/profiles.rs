//! Profiles: named bundles of extension directives and merge-key
//! registrations, plus the built-in profiles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ExtensionError;
use crate::merge::{MergePolicy, MergePolicyTable};
use crate::placement::HostPlacement;
use crate::registry::{ExtensionDirective, Registry};
use crate::types::{ElementDefinition, LeafType};
use crate::validate::{Validator, codes};
use crate::vocabulary::{self, ROOT};

/// Executors accepted by the Cloudify 1.0 profile.
pub const CLOUDIFY_EXECUTORS: [&str; 2] = ["central_deployment_agent", "host_agent"];

/// Node type of Cloudify compute hosts.
pub const CLOUDIFY_HOST_TYPE: &str = "cloudify.nodes.Compute";

/// Relationship type placing a Cloudify node on its container.
pub const CLOUDIFY_CONTAINED_IN: &str = "cloudify.relationships.contained_in";

/// Names of the built-in profiles.
pub const BUILTIN_PROFILES: [&str; 1] = ["cloudify_v1_0"];

/// A named rule-set customizing the base schema.
///
/// Profiles are plain data and can be authored as YAML:
///
/// ```
/// use blueprint_schema_core::Profile;
///
/// let profile: Profile = serde_yaml::from_str(
///     r#"
/// name: strict_names
/// directives:
///   - action: add_behavior
///     target: description
///     validators:
///       - check: non_empty
/// "#,
/// )
/// .unwrap();
/// assert_eq!(profile.directives.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<ExtensionDirective>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub merge_policies: BTreeMap<String, MergePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_placement: Option<HostPlacement>,
}

/// The effective schema and merge policies of one profile activation.
#[derive(Debug, Clone)]
pub struct ProfileActivation {
    pub registry: Registry,
    pub policies: MergePolicyTable,
}

impl Profile {
    /// Creates an empty profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            directives: Vec::new(),
            merge_policies: BTreeMap::new(),
            host_placement: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a directive.
    pub fn with_directive(mut self, directive: ExtensionDirective) -> Self {
        self.directives.push(directive);
        self
    }

    /// Registers a per-key merge policy.
    pub fn with_merge_policy(mut self, key: impl Into<String>, policy: MergePolicy) -> Self {
        self.merge_policies.insert(key.into(), policy);
        self
    }

    /// Sets the host placement step.
    pub fn with_host_placement(mut self, placement: HostPlacement) -> Self {
        self.host_placement = Some(placement);
        self
    }

    /// Applies the directives and host placement to `registry` and the
    /// merge registrations to `policies`. Nothing is changed if a directive
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns the first [`ExtensionError`] raised by a directive.
    pub fn apply_to(
        &self,
        registry: &mut Registry,
        policies: &mut MergePolicyTable,
    ) -> Result<(), ExtensionError> {
        registry.apply(&self.directives)?;
        if let Some(placement) = &self.host_placement {
            registry.set_host_placement(placement.clone())?;
        }
        for (key, policy) in &self.merge_policies {
            policies.set(key.clone(), *policy);
        }
        Ok(())
    }

    /// Activates this profile alone over the base vocabulary.
    ///
    /// # Errors
    ///
    /// See [`activate`].
    pub fn activate(&self) -> Result<ProfileActivation, ExtensionError> {
        activate([self])
    }
}

/// Activates `profiles`, in order, over the base vocabulary and freezes the
/// result.
///
/// # Errors
///
/// Returns the first [`ExtensionError`] raised while applying or freezing.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::{MergePolicy, activate, profiles};
///
/// let activation = activate([&profiles::cloudify_v1_0()]).unwrap();
/// assert!(activation.registry.is_frozen());
/// assert_eq!(
///     activation.policies.policy_for("policy_types"),
///     MergePolicy::MergeNoOverride
/// );
/// ```
pub fn activate<'a>(
    profiles: impl IntoIterator<Item = &'a Profile>,
) -> Result<ProfileActivation, ExtensionError> {
    let mut registry = Registry::register(ROOT, vocabulary::base_definitions())?;
    let mut policies = vocabulary::base_merge_policies();
    for profile in profiles {
        profile.apply_to(&mut registry, &mut policies)?;
        info!(
            profile = %profile.name,
            directives = profile.directives.len(),
            "Activated profile"
        );
    }
    registry.freeze()?;
    Ok(ProfileActivation { registry, policies })
}

/// Looks up a built-in profile by name.
pub fn builtin(name: &str) -> Option<Profile> {
    match name {
        "cloudify_v1_0" => Some(cloudify_v1_0()),
        _ => None,
    }
}

/// Cloudify DSL 1.0 conventions.
pub fn cloudify_v1_0() -> Profile {
    Profile::new("cloudify_v1_0")
        .with_description("Cloudify DSL 1.0: executors, plugin executor, policies, host placement")
        .with_directive(ExtensionDirective::replace(
            "operation_executor",
            ElementDefinition::leaf("operation_executor", LeafType::String).with_validator(
                Validator::allowed_values(CLOUDIFY_EXECUTORS).owned_by("operation"),
            ),
        ))
        .with_directive(
            ExtensionDirective::add_to_schema(
                ROOT,
                "policy_triggers",
                ElementDefinition::map("policy_triggers", "policy_trigger"),
            )
            .with_supporting(vec![
                ElementDefinition::composite("policy_trigger")
                    .required("source", "policy_source")
                    .optional("parameters", "property_schemas"),
                policy_source(),
            ]),
        )
        .with_directive(
            ExtensionDirective::add_to_schema(
                ROOT,
                "policy_types",
                ElementDefinition::map("policy_types", "policy_type"),
            )
            .with_supporting(vec![
                ElementDefinition::composite("policy_type")
                    .required("source", "policy_source")
                    .optional("properties", "property_schemas"),
                policy_source(),
            ]),
        )
        .with_directive(
            ExtensionDirective::add_to_schema(
                "plugin",
                "executor",
                ElementDefinition::leaf("plugin_executor", LeafType::String).with_validator(
                    Validator::allowed_values(CLOUDIFY_EXECUTORS)
                        .owned_by("plugin")
                        .with_code(codes::ILLEGAL_PLUGIN_EXECUTOR),
                ),
            )
            .required(),
        )
        .with_directive(
            ExtensionDirective::add_to_schema(
                "group",
                "policies",
                ElementDefinition::map("group_policies", "group_policy"),
            )
            .with_supporting(vec![
                ElementDefinition::composite("group_policy")
                    .required("type", "group_policy_type")
                    .optional("properties", "any_value")
                    .optional("triggers", "group_policy_triggers"),
                ElementDefinition::leaf("group_policy_type", LeafType::String)
                    .with_validator(Validator::reference_to("policy_types")),
                ElementDefinition::map("group_policy_triggers", "group_policy_trigger"),
                ElementDefinition::composite("group_policy_trigger")
                    .required("type", "group_policy_trigger_type")
                    .optional("parameters", "any_value"),
                ElementDefinition::leaf("group_policy_trigger_type", LeafType::String)
                    .with_validator(Validator::reference_to("policy_triggers")),
            ]),
        )
        .with_merge_policy("policy_types", MergePolicy::MergeNoOverride)
        .with_merge_policy("policy_triggers", MergePolicy::MergeNoOverride)
        .with_host_placement(HostPlacement::new(
            CLOUDIFY_HOST_TYPE,
            CLOUDIFY_CONTAINED_IN,
            "host_agent",
        ))
}

fn policy_source() -> ElementDefinition {
    ElementDefinition::leaf("policy_source", LeafType::String)
        .with_validator(Validator::non_empty())
}
