//! Build pipeline for isomer images.
//!
//! This crate turns a validated [`FlavorConfig`](isomer_schema::FlavorConfig)
//! into an image: it renders the boot menu template, composes the
//! exclude/include overlay over the source tree, materializes it as a
//! symlink farm in a working directory and hands that to a mastering
//! backend. The [`Engine`] drives those steps in order.

pub mod compose;
pub mod concurrency;
pub mod engine;
pub mod template;
pub mod working;

pub use compose::{compose, ManifestEntry, ManifestSummary, TreeManifest, GRUB_REL_PATH};
pub use concurrency::{install_interrupt_handler, interrupt_requested};
pub use engine::{BuildReport, Engine, EngineOptions, Stage};
pub use template::{bindings, render, render_template, TemplateError};
pub use working::{clean_dir, materialize};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("flavor error: {0}")]
    Flavor(#[from] isomer_schema::FlavorError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("runtime error: {0}")]
    Runtime(#[from] isomer_runtime::RuntimeError),
    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("output directory not found: {}", .0.display())]
    OutputDirNotFound(PathBuf),
    #[error("working directory not found: {}", .0.display())]
    WorkingDirNotFound(PathBuf),
    #[error("cannot walk source tree: {0}")]
    Traverse(#[from] walkdir::Error),
    #[error("unusable path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("interrupted")]
    Interrupted,
}
