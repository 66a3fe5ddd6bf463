use crate::RuntimeError;
use isomer_schema::VolumeId;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Backend used when none is requested.
pub const DEFAULT_BACKEND: &str = "xorriso";

/// Everything a backend needs to master one image.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MasterSpec {
    pub volume_id: VolumeId,
    /// Fully materialized tree; symlinks are followed when mastering.
    pub working_dir: PathBuf,
    pub outfile: PathBuf,
    pub bios_boot: bool,
    pub efi_boot: bool,
    /// Discard the tools' standard output.
    pub quiet: bool,
}

pub trait MasteringBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Write the image at `spec.outfile` from `spec.working_dir`,
    /// overwriting any existing file.
    fn create_image(&self, spec: &MasterSpec) -> Result<(), RuntimeError>;

    /// Embed a checksum into a finished image.
    ///
    /// `cancel` is polled while the tool runs; when it returns true the tool
    /// is stopped and [`RuntimeError::Interrupted`] is returned.
    fn implant_checksum(
        &self,
        image: &Path,
        quiet: bool,
        cancel: &dyn Fn() -> bool,
    ) -> Result<(), RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn MasteringBackend>, RuntimeError> {
    match name {
        "xorriso" => Ok(Box::new(crate::xorriso::XorrisoBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
