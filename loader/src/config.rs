//! Parser configuration: which profiles to activate and how imports merge.
//!
//! # Example YAML
//!
//! ```yaml
//! version: "1.0"
//! profile: cloudify_v1_0
//! profile_files:
//!   - profiles/strict.yaml
//! default_policy: override
//! merge_policies:
//!   workflows: merge_no_override
//! ```

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use blueprint_schema_core::{MergePolicy, Profile, ProfileActivation, activate, profiles};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LoaderError, Result};
use crate::loader::load_path;

/// Top-level parser configuration.
///
/// # Examples
///
/// ```
/// use blueprint_schema_core::MergePolicy;
/// use blueprint_schema_loader::ParserConfig;
///
/// let config: ParserConfig = serde_yaml::from_str("profile: cloudify_v1_0").unwrap();
/// let activation = config.activate().unwrap();
/// assert_eq!(
///     activation.policies.policy_for("policy_types"),
///     MergePolicy::MergeNoOverride
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Configuration format version (e.g., `"1.0"`).
    pub version: String,
    /// Built-in profile to activate first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Profile files applied after the built-in profile, in order. Relative
    /// paths are resolved against the configuration file's directory.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profile_files: Vec<PathBuf>,
    /// Merge policy for keys without an explicit entry.
    pub default_policy: MergePolicy,
    /// Per-key merge policies, applied last.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub merge_policies: BTreeMap<String, MergePolicy>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            profile: None,
            profile_files: Vec::new(),
            default_policy: MergePolicy::Override,
            merge_policies: BTreeMap::new(),
            base_dir: None,
        }
    }
}

impl ParserConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](crate::LoaderError::IoError) if the file cannot
    /// be read, or [`YamlError`](crate::LoaderError::YamlError) if parsing
    /// fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut config: Self = serde_yaml::from_reader(reader)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](crate::LoaderError::IoError) if the file cannot
    /// be written, or [`YamlError`](crate::LoaderError::YamlError) if
    /// serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Replaces the built-in profile.
    pub fn with_profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    /// Resolves the configured profiles in activation order.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::UnknownProfile`] for an unknown built-in name,
    /// or a loading error for a profile file.
    pub fn profiles(&self) -> Result<Vec<Profile>> {
        let mut resolved = Vec::with_capacity(self.profile_files.len() + 1);
        if let Some(name) = &self.profile {
            let profile =
                profiles::builtin(name).ok_or_else(|| LoaderError::UnknownProfile(name.clone()))?;
            resolved.push(profile);
        }
        for file in &self.profile_files {
            let path = match &self.base_dir {
                Some(base) if file.is_relative() => base.join(file),
                _ => file.clone(),
            };
            resolved.push(load_profile(&path)?);
        }
        Ok(resolved)
    }

    /// Builds the frozen registry and merge table for this configuration.
    ///
    /// # Errors
    ///
    /// Returns a profile loading error or
    /// [`LoaderError::Extension`] if a profile cannot be applied.
    pub fn activate(&self) -> Result<ProfileActivation> {
        let profiles = self.profiles()?;
        let mut activation = activate(&profiles)?;
        activation.policies.default_policy = self.default_policy;
        for (key, policy) in &self.merge_policies {
            activation.policies.set(key.clone(), *policy);
        }
        debug!(
            profiles = profiles.len(),
            definitions = activation.registry.len(),
            "Activated parser configuration"
        );
        Ok(activation)
    }
}

/// Loads a profile from a JSON or YAML file.
///
/// # Errors
///
/// Returns a loading error if the file cannot be read, or
/// [`JsonError`](crate::LoaderError::JsonError) if its content is not a
/// valid profile.
pub fn load_profile(path: impl AsRef<Path>) -> Result<Profile> {
    let profile = serde_json::from_value(load_path(path)?)?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
version: "1.0"
profile: cloudify_v1_0
profile_files:
  - strict.yaml
default_policy: merge_union
merge_policies:
  workflows: merge_no_override
"#
    }

    fn strict_profile() -> &'static str {
        r#"
name: strict
directives:
  - action: add_behavior
    target: description
    validators:
      - check: non_empty
"#
    }

    #[test]
    fn test_deserialize_complete() {
        let config: ParserConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.profile.as_deref(), Some("cloudify_v1_0"));
        assert_eq!(config.profile_files, vec![PathBuf::from("strict.yaml")]);
        assert_eq!(config.default_policy, MergePolicy::MergeUnion);
        assert_eq!(
            config.merge_policies.get("workflows"),
            Some(&MergePolicy::MergeNoOverride)
        );
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: ParserConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ParserConfig::default());
    }

    #[test]
    fn test_unknown_profile() {
        let config = ParserConfig::default().with_profile("nope");
        assert!(matches!(
            config.activate(),
            Err(LoaderError::UnknownProfile(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_profile_files_relative_to_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yaml"), sample_yaml()).unwrap();
        std::fs::write(dir.path().join("strict.yaml"), strict_profile()).unwrap();

        let config = ParserConfig::load(dir.path().join("config.yaml")).unwrap();
        let profiles = config.profiles().unwrap();
        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["cloudify_v1_0", "strict"]);

        let activation = config.activate().unwrap();
        assert_eq!(activation.policies.default_policy, MergePolicy::MergeUnion);
        assert_eq!(
            activation.policies.policy_for("workflows"),
            MergePolicy::MergeNoOverride
        );
        assert_eq!(
            activation.policies.policy_for("policy_types"),
            MergePolicy::MergeNoOverride
        );
    }

    #[test]
    fn test_load_save_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let original: ParserConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        original.save(&path).unwrap();

        let loaded = ParserConfig::load(&path).unwrap();
        assert_eq!(loaded.profile, original.profile);
        assert_eq!(loaded.profile_files, original.profile_files);
        assert_eq!(loaded.merge_policies, original.merge_policies);
    }

    #[test]
    fn test_load_profile_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strict.json");
        std::fs::write(
            &path,
            r#"{"name": "strict", "merge_policies": {"workflows": "merge_union"}}"#,
        )
        .unwrap();
        let profile = load_profile(&path).unwrap();
        assert_eq!(profile.name, "strict");
        assert_eq!(
            profile.merge_policies.get("workflows"),
            Some(&MergePolicy::MergeUnion)
        );
    }
}
