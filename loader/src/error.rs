//! Error types for document loading and parser configuration.

use std::path::PathBuf;

use blueprint_schema_core::{ExtensionError, ParseError};
use thiserror::Error;

/// Errors that can occur while loading documents, profiles or configuration.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing or serialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// The file extension is not one of `json`, `yaml` or `yml`.
    #[error("unsupported document format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// The configuration names a profile that is not built in.
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    /// A profile could not be applied.
    #[error("profile error: {0}")]
    Extension(#[from] ExtensionError),

    /// The document failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Convenience alias for results with [`LoaderError`].
pub type Result<T> = std::result::Result<T, LoaderError>;
