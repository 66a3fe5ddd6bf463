//! Image mastering backends for isomer.
//!
//! This crate is the boundary to the external tools: a pluggable
//! `MasteringBackend` trait with an `xorrisofs`/`implantisomd5` backend and a
//! recording mock, plus prerequisite checking for the tools a build needs.

pub mod backend;
pub mod mock;
pub mod prereq;
pub mod xorriso;

pub use backend::{select_backend, MasterSpec, MasteringBackend, DEFAULT_BACKEND};
pub use mock::{MockBackend, MockCall};
pub use prereq::{check_mastering_prereqs, format_missing, MissingPrereq};
pub use xorriso::{master_args, XorrisoBackend};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("required tool '{0}' was not found in PATH")]
    ToolNotFound(String),
    #[error("{tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },
    #[error("interrupted while waiting for {0}")]
    Interrupted(String),
}
