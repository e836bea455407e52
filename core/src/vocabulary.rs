//! Built-in blueprint vocabulary.
//!
//! The base schema every profile starts from. Definitions reference each
//! other by name, so a profile replacing e.g. `operation_executor` changes
//! the executor of every operation in the document.

use serde_json::json;

use crate::error::ExtensionError;
use crate::merge::{MergePolicy, MergePolicyTable};
use crate::registry::{Registry, build_registry};
use crate::types::{ElementDefinition, FieldSpec, LeafType};
use crate::validate::Validator;

/// Name of the root definition.
pub const ROOT: &str = "blueprint";

/// Sections that may be declared in at most one contributing document.
pub const NO_OVERRIDE_SECTIONS: [&str; 7] = [
    "node_types",
    "relationships",
    "plugins",
    "node_templates",
    "groups",
    "inputs",
    "outputs",
];

/// Returns the base element definitions.
pub fn base_definitions() -> Vec<ElementDefinition> {
    let mut definitions = vec![
        ElementDefinition::composite(ROOT)
            .required("tosca_definitions_version", "definitions_version")
            .optional("description", "description")
            .optional("imports", "imports")
            .optional("inputs", "inputs")
            .optional("outputs", "outputs")
            .optional("node_types", "node_types")
            .optional("node_templates", "node_templates")
            .optional("relationships", "relationships")
            .optional("plugins", "plugins")
            .optional("groups", "groups"),
        ElementDefinition::leaf("definitions_version", LeafType::String)
            .with_validator(Validator::non_empty()),
        ElementDefinition::leaf("description", LeafType::String),
        ElementDefinition::list("imports", "import"),
        ElementDefinition::leaf("import", LeafType::String).with_validator(Validator::non_empty()),
        ElementDefinition::leaf("any_value", LeafType::Any),
        ElementDefinition::leaf("flag", LeafType::Boolean),
        ElementDefinition::leaf("data_type_name", LeafType::String),
    ];
    definitions.extend(inputs_and_outputs());
    definitions.extend(types_and_interfaces());
    definitions.extend(templates());
    definitions.extend(plugins_and_groups());
    definitions
}

fn inputs_and_outputs() -> Vec<ElementDefinition> {
    vec![
        ElementDefinition::map("inputs", "input"),
        ElementDefinition::composite("input")
            .optional("description", "description")
            .optional("type", "data_type_name")
            .optional("default", "any_value"),
        ElementDefinition::map("outputs", "output"),
        ElementDefinition::composite("output")
            .optional("description", "description")
            .required("value", "any_value"),
    ]
}

fn types_and_interfaces() -> Vec<ElementDefinition> {
    vec![
        ElementDefinition::map("node_types", "node_type"),
        ElementDefinition::composite("node_type")
            .optional("derived_from", "node_type_parent")
            .optional("properties", "property_schemas")
            .optional("interfaces", "interfaces"),
        ElementDefinition::leaf("node_type_parent", LeafType::String)
            .with_validator(Validator::reference_to("node_types")),
        ElementDefinition::map("property_schemas", "property_schema"),
        ElementDefinition::composite("property_schema")
            .optional("type", "data_type_name")
            .optional("description", "description")
            .optional("default", "any_value")
            .optional("required", "flag"),
        ElementDefinition::map("interfaces", "interface"),
        ElementDefinition::map("interface", "operation"),
        ElementDefinition::composite("operation")
            .optional("implementation", "operation_implementation")
            .optional("inputs", "any_value")
            .optional("executor", "operation_executor")
            .optional("max_retries", "retry_count"),
        ElementDefinition::leaf("operation_implementation", LeafType::String),
        ElementDefinition::leaf("operation_executor", LeafType::String),
        ElementDefinition::leaf("retry_count", LeafType::Integer),
        ElementDefinition::map("relationships", "relationship"),
        ElementDefinition::composite("relationship")
            .optional("derived_from", "relationship_parent")
            .optional("source_interfaces", "interfaces")
            .optional("target_interfaces", "interfaces")
            .optional("properties", "property_schemas"),
        ElementDefinition::leaf("relationship_parent", LeafType::String)
            .with_validator(Validator::reference_to("relationships")),
    ]
}

fn templates() -> Vec<ElementDefinition> {
    vec![
        ElementDefinition::map("node_templates", "node_template"),
        ElementDefinition::composite("node_template")
            .required("type", "node_template_type")
            .optional("properties", "any_value")
            .optional("interfaces", "interfaces")
            .optional("relationships", "node_template_relationships")
            .optional("instances", "instances"),
        ElementDefinition::leaf("node_template_type", LeafType::String)
            .with_validator(Validator::reference_to("node_types")),
        ElementDefinition::list("node_template_relationships", "node_template_relationship"),
        ElementDefinition::composite("node_template_relationship")
            .required("type", "relationship_type")
            .required("target", "relationship_target")
            .optional("source_interfaces", "interfaces")
            .optional("target_interfaces", "interfaces")
            .optional("properties", "any_value"),
        ElementDefinition::leaf("relationship_type", LeafType::String)
            .with_validator(Validator::reference_to("relationships")),
        ElementDefinition::leaf("relationship_target", LeafType::String)
            .with_validator(Validator::reference_to("node_templates")),
        ElementDefinition::composite("instances").field(
            "deploy",
            FieldSpec::optional("instance_count").with_default(json!(1)),
        ),
        ElementDefinition::leaf("instance_count", LeafType::Integer),
    ]
}

fn plugins_and_groups() -> Vec<ElementDefinition> {
    vec![
        ElementDefinition::map("plugins", "plugin"),
        ElementDefinition::composite("plugin")
            .required("name", "plugin_name")
            .optional("source", "plugin_source")
            .optional("install", "flag")
            .optional("install_arguments", "plugin_install_arguments"),
        ElementDefinition::leaf("plugin_name", LeafType::String)
            .with_validator(Validator::non_empty()),
        ElementDefinition::leaf("plugin_source", LeafType::String),
        ElementDefinition::leaf("plugin_install_arguments", LeafType::String),
        ElementDefinition::map("groups", "group"),
        ElementDefinition::composite("group").required("members", "group_members"),
        ElementDefinition::list("group_members", "group_member")
            .with_validator(Validator::non_empty()),
        ElementDefinition::leaf("group_member", LeafType::String)
            .with_validator(Validator::reference_to("node_templates")),
    ]
}

/// Returns the base merge policy table: [`NO_OVERRIDE_SECTIONS`] are
/// [`MergePolicy::MergeNoOverride`], everything else overrides.
pub fn base_merge_policies() -> MergePolicyTable {
    let mut table = MergePolicyTable::new().with_default(MergePolicy::Override);
    table.register_no_override(NO_OVERRIDE_SECTIONS);
    table
}

/// Builds and freezes a registry holding only the base vocabulary.
///
/// # Errors
///
/// Returns an [`ExtensionError`] if the base vocabulary is inconsistent.
pub fn base_registry() -> Result<Registry, ExtensionError> {
    build_registry(ROOT, base_definitions(), &[])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::error::{MergeError, ParseError, StructuralError};
    use crate::merge::SourceTree;
    use crate::parser::parse;
    use crate::plan::Plan;
    use crate::validate::codes;

    use super::*;

    fn blueprint() -> serde_json::Value {
        json!({
            "tosca_definitions_version": "cloudify_dsl_1_0",
            "node_types": {
                "compute": {
                    "properties": {"ip": {"type": "string", "default": ""}},
                    "interfaces": {
                        "lifecycle": {"create": {"implementation": "scripts/create.sh"}}
                    }
                },
                "server": {"derived_from": "compute"}
            },
            "relationships": {"contained_in": {}},
            "node_templates": {
                "vm": {"type": "server", "instances": {}},
                "app": {
                    "type": "compute",
                    "relationships": [{"type": "contained_in", "target": "vm"}]
                }
            },
            "groups": {"g": {"members": ["vm", "app"]}}
        })
    }

    fn parse_one(doc: serde_json::Value) -> Result<Plan, ParseError> {
        let registry = base_registry().unwrap();
        parse(
            &registry,
            &[SourceTree::new("blueprint.yaml", doc)],
            &base_merge_policies(),
        )
    }

    #[test]
    fn test_base_registry_freezes() {
        let registry = base_registry().unwrap();
        assert!(registry.is_frozen());
        assert_eq!(registry.root_name(), ROOT);
        assert!(registry.definition("operation_executor").is_some());
    }

    #[test]
    fn test_parse_representative_blueprint() {
        let plan = parse_one(blueprint()).unwrap();
        assert_eq!(
            plan.lookup("node_templates.app.relationships.0.target"),
            Some(&json!("vm"))
        );
        assert_eq!(
            plan.lookup("node_templates.vm.instances.deploy"),
            Some(&json!(1))
        );
        assert_eq!(
            plan.lookup("node_types.compute.interfaces.lifecycle.create.implementation"),
            Some(&json!("scripts/create.sh"))
        );
        assert!(!plan.contains("plugins"));
    }

    #[test]
    fn test_missing_version_is_structural() {
        let mut doc = blueprint();
        doc.as_object_mut().unwrap().remove("tosca_definitions_version");
        let err = parse_one(doc).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Structural(StructuralError::MissingField { ref field, .. })
                if field == "tosca_definitions_version"
        ));
    }

    #[test]
    fn test_dangling_template_type() {
        let mut doc = blueprint();
        doc["node_templates"]["vm"]["type"] = json!("missing_type");
        let ParseError::Semantic(err) = parse_one(doc).unwrap_err() else {
            panic!("expected semantic error");
        };
        assert_eq!(err.code, codes::DANGLING_REFERENCE);
        assert_eq!(err.path.to_string(), "node_templates.vm.type");
        assert!(err.message.contains("missing_type"));
    }

    #[test]
    fn test_dangling_group_member() {
        let mut doc = blueprint();
        doc["groups"]["g"]["members"] = json!(["vm", "db"]);
        let ParseError::Semantic(err) = parse_one(doc).unwrap_err() else {
            panic!("expected semantic error");
        };
        assert_eq!(err.path.to_string(), "groups.g.members.1");
    }

    #[test]
    fn test_empty_group_rejected() {
        let mut doc = blueprint();
        doc["groups"]["g"]["members"] = json!([]);
        let ParseError::Semantic(err) = parse_one(doc).unwrap_err() else {
            panic!("expected semantic error");
        };
        assert_eq!(err.code, codes::NON_EMPTY);
    }

    #[test]
    fn test_node_types_cannot_be_redeclared_across_documents() {
        let registry = base_registry().unwrap();
        let sources = [
            SourceTree::new("types.yaml", json!({"node_types": {"compute": {}}})),
            SourceTree::new(
                "blueprint.yaml",
                json!({
                    "tosca_definitions_version": "cloudify_dsl_1_0",
                    "node_types": {"compute": {"derived_from": "compute"}}
                }),
            ),
        ];
        let err = parse(&registry, &sources, &base_merge_policies()).unwrap_err();
        let ParseError::Merge(MergeError::DuplicateDefinition { key, .. }) = err else {
            panic!("expected duplicate definition, got {err}");
        };
        assert_eq!(key, "node_types");
    }

    #[test]
    fn test_description_overrides_across_documents() {
        let registry = base_registry().unwrap();
        let sources = [
            SourceTree::new("base.yaml", json!({"description": "base"})),
            SourceTree::new(
                "blueprint.yaml",
                json!({"tosca_definitions_version": "cloudify_dsl_1_0", "description": "main"}),
            ),
        ];
        let plan = parse(&registry, &sources, &base_merge_policies()).unwrap();
        assert_eq!(plan.section("description"), Some(&json!("main")));
    }
}
