//! Host placement: the plan-assembly step that decides, for every node
//! template, which host node it runs on and where its plugins are
//! installed.
//!
//! A template is a host when its type is (or derives from) the configured
//! host type. Any other template is placed on the host reached by following
//! its containment relationships. Plugins whose executor is the host
//! executor are installed on that host; all others run on the deployment
//! manager.
//!
//! # Examples
//!
//! ```
//! use blueprint_schema_core::{HostPlacement, PLACEMENT_SECTION, Plan};
//! use serde_json::json;
//!
//! let mut plan: Plan = serde_json::from_value(json!({
//!     "node_types": {"compute": {}, "app": {}},
//!     "relationships": {"contained_in": {}},
//!     "node_templates": {
//!         "vm": {"type": "compute"},
//!         "web": {"type": "app", "relationships": [{"type": "contained_in", "target": "vm"}]}
//!     }
//! }))
//! .unwrap();
//!
//! HostPlacement::new("compute", "contained_in", "host_agent")
//!     .assemble(&mut plan)
//!     .unwrap();
//! assert_eq!(
//!     plan.lookup(&format!("{PLACEMENT_SECTION}.web.host_id")),
//!     Some(&json!("vm"))
//! );
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use tracing::debug;

use crate::error::EmitError;
use crate::plan::Plan;
use crate::types::RawTree;

/// Plan section holding one placement entry per node template.
pub const PLACEMENT_SECTION: &str = "node_placement";

/// Names the types and executor that drive host placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPlacement {
    /// Node type marking a template as a host.
    pub host_type: String,
    /// Relationship type linking a template to its container.
    pub contained_in: String,
    /// Plugin executor whose plugins are installed on the host.
    pub host_executor: String,
}

type Entries<'a> = Option<&'a Map<String, RawTree>>;

#[derive(Default)]
struct PluginUsage<'a> {
    on_host: BTreeSet<&'a str>,
    on_manager: BTreeSet<&'a str>,
}

impl HostPlacement {
    pub fn new(
        host_type: impl Into<String>,
        contained_in: impl Into<String>,
        host_executor: impl Into<String>,
    ) -> Self {
        Self {
            host_type: host_type.into(),
            contained_in: contained_in.into(),
            host_executor: host_executor.into(),
        }
    }

    /// Adds the [`PLACEMENT_SECTION`] to `plan`.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::DuplicateSection`] if the plan already has a
    /// section with that name.
    pub fn assemble(&self, plan: &mut Plan) -> Result<(), EmitError> {
        let placements = self.placements(plan);
        plan.insert_section(PLACEMENT_SECTION, placements)
    }

    /// Computes the placement entry of every node template in `plan`.
    ///
    /// Each entry has `host_id` (null when no host is reachable),
    /// `host_plugins` and `deployment_plugins`. Host templates also carry
    /// `plugins_to_install`: the host plugins of every template placed on
    /// them.
    pub fn placements(&self, plan: &Plan) -> RawTree {
        let templates = entries(plan, "node_templates");
        let node_types = entries(plan, "node_types");
        let relationships = entries(plan, "relationships");
        let plugins = entries(plan, "plugins");

        let mut placements = Map::new();
        let mut to_install: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (name, template) in templates.into_iter().flatten() {
            let host = self.host_of(name, templates, node_types, relationships);
            let usage = self.plugin_usage(template, node_types, plugins);
            if let Some(host) = host {
                to_install
                    .entry(host)
                    .or_default()
                    .extend(usage.on_host.iter().copied());
            }
            placements.insert(
                name.clone(),
                json!({
                    "host_id": host,
                    "host_plugins": usage.on_host,
                    "deployment_plugins": usage.on_manager,
                }),
            );
        }

        for (host, installed) in &to_install {
            if let Some(RawTree::Object(entry)) = placements.get_mut(*host) {
                entry.insert("plugins_to_install".to_string(), json!(installed));
            }
        }
        debug!(
            nodes = placements.len(),
            hosts = to_install.len(),
            "Assembled host placement"
        );
        RawTree::Object(placements)
    }

    fn host_of<'a>(
        &self,
        name: &'a str,
        templates: Entries<'a>,
        node_types: Entries<'a>,
        relationships: Entries<'a>,
    ) -> Option<&'a str> {
        let mut visited = BTreeSet::new();
        let mut current = name;
        loop {
            if !visited.insert(current) {
                return None;
            }
            let template = entry(templates, current)?;
            let node_type = template.get("type").and_then(RawTree::as_str)?;
            if derives_from(node_types, node_type, &self.host_type) {
                return Some(current);
            }
            current = template
                .get("relationships")
                .and_then(RawTree::as_array)?
                .iter()
                .find_map(|relationship| {
                    let kind = relationship.get("type")?.as_str()?;
                    if derives_from(relationships, kind, &self.contained_in) {
                        relationship.get("target")?.as_str()
                    } else {
                        None
                    }
                })?;
        }
    }

    fn plugin_usage<'a>(
        &self,
        template: &'a RawTree,
        node_types: Entries<'a>,
        plugins: Entries<'a>,
    ) -> PluginUsage<'a> {
        let mut usage = PluginUsage::default();
        for operation in operations(template, node_types) {
            let Some((plugin_name, plugin)) = operation
                .get("implementation")
                .and_then(RawTree::as_str)
                .and_then(|implementation| implementation.split_once('.'))
                .and_then(|(prefix, _)| plugins?.get_key_value(prefix))
            else {
                continue;
            };
            let executor = operation
                .get("executor")
                .or_else(|| plugin.get("executor"))
                .and_then(RawTree::as_str);
            if executor == Some(self.host_executor.as_str()) {
                usage.on_host.insert(plugin_name.as_str());
            } else {
                usage.on_manager.insert(plugin_name.as_str());
            }
        }
        usage
    }
}

fn entries<'a>(plan: &'a Plan, section: &str) -> Entries<'a> {
    plan.section(section).and_then(RawTree::as_object)
}

fn entry<'a>(entries: Entries<'a>, name: &str) -> Option<&'a RawTree> {
    entries?.get(name)
}

/// Returns `true` if `name` is `ancestor` or reaches it through
/// `derived_from` links.
fn derives_from<'a>(types: Entries<'a>, name: &'a str, ancestor: &str) -> bool {
    let mut visited = BTreeSet::new();
    let mut current = Some(name);
    while let Some(type_name) = current {
        if type_name == ancestor {
            return true;
        }
        if !visited.insert(type_name) {
            return false;
        }
        current = entry(types, type_name)
            .and_then(|node_type| node_type.get("derived_from"))
            .and_then(RawTree::as_str);
    }
    false
}

/// Operations declared on the template and along its type's ancestry.
fn operations<'a>(template: &'a RawTree, node_types: Entries<'a>) -> Vec<&'a RawTree> {
    let mut interfaces = Vec::new();
    interfaces.extend(template.get("interfaces"));

    let mut visited = BTreeSet::new();
    let mut current = template.get("type").and_then(RawTree::as_str);
    while let Some(type_name) = current {
        if !visited.insert(type_name) {
            break;
        }
        let Some(node_type) = entry(node_types, type_name) else {
            break;
        };
        interfaces.extend(node_type.get("interfaces"));
        current = node_type.get("derived_from").and_then(RawTree::as_str);
    }

    interfaces
        .into_iter()
        .filter_map(RawTree::as_object)
        .flat_map(|interfaces| interfaces.values())
        .filter_map(RawTree::as_object)
        .flat_map(|operations| operations.values())
        .collect()
}
