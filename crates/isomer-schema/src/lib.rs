//! Flavor language front end for isomer.
//!
//! This crate turns flavor files into a validated [`FlavorConfig`]: tokenizing
//! and parsing the restricted literal syntax (`parse_statements`), resolving
//! `include(...)` directives into one ordered namespace (`load_flavor`), and
//! type-checking that namespace (`FlavorConfig::from_namespace`).

mod lexer;

pub mod flavor;
pub mod locate;
pub mod namespace;
pub mod parser;
pub mod types;
pub mod value;

pub use flavor::{FlavorConfig, ValidateOptions, KS_REL_PATH};
pub use locate::{cfg_dir, locate_flavor, locate_flavor_in, CFG_DIR_ENV, DEFAULT_CFG_DIR};
pub use namespace::{load_flavor, MergedFlavor, Namespace};
pub use parser::{parse_statements, Statement, SyntaxError};
pub use types::{IsoPath, VolumeId};
pub use value::Literal;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlavorError {
    #[error("unable to locate flavor or file: {0}")]
    FlavorNotFound(String),
    #[error("{}: {error}", .path.display())]
    Syntax { path: PathBuf, error: SyntaxError },
    #[error(
        "cannot read {}{}: {source}",
        .path.display(),
        included_from_suffix(.included_from.as_deref())
    )]
    IncludeNotFound {
        path: PathBuf,
        included_from: Option<PathBuf>,
        source: std::io::Error,
    },
    #[error("cyclic include of {}: {}", .path.display(), format_chain(.chain))]
    CyclicInclude { path: PathBuf, chain: Vec<PathBuf> },
    #[error("invalid field '{field}': {reason}")]
    Validation { field: String, reason: String },
}

fn included_from_suffix(from: Option<&Path>) -> String {
    from.map(|p| format!(" (included from {})", p.display()))
        .unwrap_or_default()
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Load, merge, and validate the flavor file at `path`.
pub fn load_flavor_config(
    path: &Path,
    options: &ValidateOptions,
) -> Result<FlavorConfig, FlavorError> {
    let merged = load_flavor(path)?;
    FlavorConfig::from_namespace_with(merged.namespace, options)
}
