use std::path::Path;

use blueprint_schema_core::{MergeError, ParseError, ResolveError, profiles};
use blueprint_schema_loader::{LoaderError, ParserConfig, parse_file};
use serde_json::json;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

const TYPES: &str = r#"
node_types:
  compute:
    interfaces:
      lifecycle:
        create:
          implementation: scripts/create.sh
          executor: central_deployment_agent
relationships:
  contained_in: {}
"#;

const MAIN: &str = r#"
tosca_definitions_version: cloudify_dsl_1_0
imports:
  - types.yaml
plugins:
  agent:
    name: agent
    executor: host_agent
    source: agent.zip
node_templates:
  vm:
    type: compute
  app:
    type: compute
    relationships:
      - type: contained_in
        target: vm
"#;

// ---------------------------------------------------------------------------
// Parsing from disk
// ---------------------------------------------------------------------------

#[test]
fn test_parse_file_with_imports() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "types.yaml", TYPES);
    write(dir.path(), "main.yaml", MAIN);

    let activation = profiles::cloudify_v1_0().activate().unwrap();
    let plan = parse_file(dir.path().join("main.yaml"), &activation).unwrap();

    assert_eq!(plan.lookup("plugins.agent.executor"), Some(&json!("host_agent")));
    assert_eq!(
        plan.lookup("node_types.compute.interfaces.lifecycle.create.executor"),
        Some(&json!("central_deployment_agent"))
    );
    assert_eq!(plan.section("imports"), Some(&json!(["types.yaml"])));
}

#[test]
fn test_parse_file_json_document() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "main.json",
        r#"{"tosca_definitions_version": "cloudify_dsl_1_0", "description": "json"}"#,
    );
    let activation = profiles::cloudify_v1_0().activate().unwrap();
    let plan = parse_file(dir.path().join("main.json"), &activation).unwrap();
    assert_eq!(plan.section("description"), Some(&json!("json")));
}

#[test]
fn test_nested_imports_resolve_from_main_directory() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "lib/types.yaml", TYPES);
    write(dir.path(), "lib/all.yaml", "imports:\n  - lib/types.yaml\n");
    write(
        dir.path(),
        "main.yaml",
        "tosca_definitions_version: cloudify_dsl_1_0\nimports: [lib/all.yaml]\n",
    );

    let activation = profiles::cloudify_v1_0().activate().unwrap();
    let plan = parse_file(dir.path().join("main.yaml"), &activation).unwrap();
    assert!(plan.lookup("node_types.compute").is_some());
}

#[test]
fn test_missing_import() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "main.yaml", MAIN);

    let activation = profiles::cloudify_v1_0().activate().unwrap();
    let err = parse_file(dir.path().join("main.yaml"), &activation).unwrap_err();
    assert!(matches!(
        err,
        LoaderError::Parse(ParseError::Resolve(ResolveError::NotFound { ref reference }))
            if reference == "types.yaml"
    ));
}

#[test]
fn test_conflicting_imports() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "types.yaml", TYPES);
    write(
        dir.path(),
        "more.yaml",
        "node_types:\n  compute:\n    derived_from: compute\n",
    );
    write(
        dir.path(),
        "main.yaml",
        "tosca_definitions_version: cloudify_dsl_1_0\nimports: [types.yaml, more.yaml]\n",
    );

    let activation = profiles::cloudify_v1_0().activate().unwrap();
    let err = parse_file(dir.path().join("main.yaml"), &activation).unwrap_err();
    match err {
        LoaderError::Parse(ParseError::Merge(MergeError::DuplicateDefinition {
            key,
            entry,
            documents,
        })) => {
            assert_eq!(key, "node_types");
            assert_eq!(entry.as_deref(), Some("compute"));
            assert_eq!(documents, ["types.yaml", "more.yaml"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "main.toml", "x = 1\n");
    let activation = profiles::cloudify_v1_0().activate().unwrap();
    assert!(matches!(
        parse_file(dir.path().join("main.toml"), &activation),
        Err(LoaderError::UnsupportedFormat(_))
    ));
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn test_config_with_profile_file() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "config.yaml",
        "profile: cloudify_v1_0\nprofile_files: [profiles/strict.yaml]\n",
    );
    write(
        dir.path(),
        "profiles/strict.yaml",
        r#"
name: strict
directives:
  - action: add_behavior
    target: plugin_source
    validators:
      - check: pattern
        pattern: "\\.zip$"
"#,
    );
    write(dir.path(), "types.yaml", TYPES);
    write(
        dir.path(),
        "main.yaml",
        &MAIN.replace("source: agent.zip", "source: agent.tar"),
    );

    let activation = ParserConfig::load(dir.path().join("config.yaml"))
        .unwrap()
        .activate()
        .unwrap();
    let err = parse_file(dir.path().join("main.yaml"), &activation).unwrap_err();
    match err {
        LoaderError::Parse(ParseError::Semantic(err)) => {
            assert_eq!(err.path.to_string(), "plugins.agent.source");
            assert_eq!(err.code, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_config_with_invalid_profile_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "config.yaml", "profile_files: [bad.yaml]\n");
    write(
        dir.path(),
        "bad.yaml",
        "name: bad\ndirectives:\n  - action: replace\n    target: nope\n    definition: {name: nope, kind: leaf}\n",
    );

    let err = ParserConfig::load(dir.path().join("config.yaml"))
        .unwrap()
        .activate()
        .unwrap_err();
    assert!(matches!(err, LoaderError::Extension(_)));
}
