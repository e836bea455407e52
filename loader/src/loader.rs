//! Reading blueprint documents from disk.
//!
//! Documents are JSON or YAML, chosen by file extension, and are loaded into
//! the engine's [`RawTree`]. [`DirectoryResolver`] resolves imports relative
//! to the main document's directory.
//!
//! ```no_run
//! use blueprint_schema_core::profiles;
//! use blueprint_schema_loader::parse_file;
//!
//! let activation = profiles::cloudify_v1_0().activate().unwrap();
//! let plan = parse_file("blueprint.yaml", &activation).unwrap();
//! println!("{} sections", plan.len());
//! ```

use std::io::BufReader;
use std::path::{Path, PathBuf};

use blueprint_schema_core::{
    ImportResolver, Parser, Plan, ProfileActivation, RawTree, ResolveError, SourceTree,
};
use tracing::debug;

use crate::error::{LoaderError, Result};

/// Serialization format of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Picks the format from a path's extension.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::UnsupportedFormat`] for anything other than
    /// `.json`, `.yaml` or `.yml`.
    ///
    /// # Examples
    ///
    /// ```
    /// use blueprint_schema_loader::DocumentFormat;
    ///
    /// assert_eq!(DocumentFormat::from_path("a/b.yml").unwrap(), DocumentFormat::Yaml);
    /// assert_eq!(DocumentFormat::from_path("b.JSON").unwrap(), DocumentFormat::Json);
    /// assert!(DocumentFormat::from_path("b.toml").is_err());
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            _ => Err(LoaderError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Parses a document held in memory.
///
/// # Errors
///
/// Returns [`LoaderError::JsonError`] or [`LoaderError::YamlError`] when the
/// text is malformed.
pub fn load_str(text: &str, format: DocumentFormat) -> Result<RawTree> {
    let tree = match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
    };
    Ok(tree)
}

/// Reads and parses a document file.
///
/// # Errors
///
/// Returns [`LoaderError::UnsupportedFormat`] for an unknown extension,
/// [`LoaderError::IoError`] if the file cannot be read, or a JSON/YAML error
/// if parsing fails.
pub fn load_path(path: impl AsRef<Path>) -> Result<RawTree> {
    let path = path.as_ref();
    let format = DocumentFormat::from_path(path)?;
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let tree = match format {
        DocumentFormat::Json => serde_json::from_reader(reader)?,
        DocumentFormat::Yaml => serde_yaml::from_reader(reader)?,
    };
    debug!(path = %path.display(), "Loaded document");
    Ok(tree)
}

/// Reads a document file as a merge source identified by its path.
///
/// # Errors
///
/// See [`load_path`].
pub fn load_source(path: impl AsRef<Path>) -> Result<SourceTree> {
    let path = path.as_ref();
    Ok(SourceTree::new(path.display().to_string(), load_path(path)?))
}

/// Resolves imports as files relative to a base directory.
///
/// Remote references (anything with a URL scheme) are rejected.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    base: PathBuf,
}

impl DirectoryResolver {
    /// Creates a resolver rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Creates a resolver rooted at the directory containing `document`.
    pub fn for_document(document: impl AsRef<Path>) -> Self {
        let base = document
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::new(base)
    }

    /// Directory imports are resolved against.
    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ImportResolver for DirectoryResolver {
    fn resolve(&self, reference: &str) -> std::result::Result<RawTree, ResolveError> {
        if reference.contains("://") {
            return Err(ResolveError::Failed {
                reference: reference.to_string(),
                reason: "remote imports are not supported".to_string(),
            });
        }
        let path = self.base.join(reference);
        if !path.is_file() {
            return Err(ResolveError::NotFound {
                reference: reference.to_string(),
            });
        }
        load_path(&path).map_err(|err| ResolveError::Failed {
            reference: reference.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Loads `path`, resolves its imports from disk and parses it.
///
/// # Errors
///
/// Returns a loading error for the main document, or
/// [`LoaderError::Parse`] for any import, merge, structural or semantic
/// failure.
pub fn parse_file(path: impl AsRef<Path>, activation: &ProfileActivation) -> Result<Plan> {
    let path = path.as_ref();
    let main = load_source(path)?;
    let resolver = DirectoryResolver::for_document(path);
    let plan = Parser::new(&activation.registry)?.parse_document(
        main,
        &resolver,
        &activation.policies,
    )?;
    Ok(plan)
}
