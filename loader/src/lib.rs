//! Document loading, filesystem imports and parser configuration for
//! blueprint schemas.
//!
//! This crate connects the engine in `blueprint_schema_core` to the
//! filesystem: it reads JSON/YAML documents, resolves `imports` relative to
//! the main document, and builds a profile activation from a
//! [`ParserConfig`] file.
//!
//! # Quick start
//!
//! ```no_run
//! use blueprint_schema_loader::{ParserConfig, parse_file};
//!
//! let config = ParserConfig::load("blueprint-parse.yaml").unwrap();
//! let activation = config.activate().unwrap();
//! let plan = parse_file("blueprints/main.yaml", &activation).unwrap();
//! println!("digest {}", plan.digest());
//! ```

mod config;
mod error;
mod loader;

pub use config::{ParserConfig, load_profile};
pub use error::{LoaderError, Result};
pub use loader::{
    DirectoryResolver, DocumentFormat, load_path, load_source, load_str, parse_file,
};
