use crate::compose::{compose, ManifestSummary};
use crate::concurrency::interrupt_requested;
use crate::working::{clean_dir, materialize};
use crate::{template, CoreError};
use isomer_runtime::{MasterSpec, MasteringBackend, RuntimeError};
use isomer_schema::{FlavorConfig, VolumeId};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

/// Steps of a build, reported to the caller as they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Render,
    Compose,
    Materialize,
    Master,
    Checksum,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Render => "rendering boot menu",
            Stage::Compose => "composing source tree",
            Stage::Materialize => "populating working directory",
            Stage::Master => "mastering image",
            Stage::Checksum => "implanting checksum",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Existing directory to build in; it is emptied first.
    /// A temporary directory is used when unset.
    pub working: Option<PathBuf>,
    /// Discard the mastering tools' standard output.
    pub quiet: bool,
}

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub outfile: PathBuf,
    pub volume_id: VolumeId,
    pub working_dir: PathBuf,
    pub backend: String,
    pub checksum: bool,
    pub boot_menu: bool,
    pub manifest: ManifestSummary,
}

enum WorkingDir {
    Provided(PathBuf),
    Temporary(TempDir),
}

impl WorkingDir {
    fn path(&self) -> &Path {
        match self {
            WorkingDir::Provided(path) => path,
            WorkingDir::Temporary(dir) => dir.path(),
        }
    }
}

/// Builds one image from a source tree.
///
/// A temporary working directory lives as long as the engine.
pub struct Engine {
    source: PathBuf,
    outfile: PathBuf,
    working: WorkingDir,
    quiet: bool,
    backend: Arc<dyn MasteringBackend>,
}

impl Engine {
    /// Check the locations a build needs and prepare the working directory.
    pub fn new(
        source: impl Into<PathBuf>,
        outfile: impl Into<PathBuf>,
        options: EngineOptions,
        backend: Arc<dyn MasteringBackend>,
    ) -> Result<Self, CoreError> {
        let source = source.into();
        let outfile = outfile.into();

        if !source.is_dir() {
            return Err(CoreError::SourceNotFound(source));
        }
        let out_dir = match outfile.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !out_dir.is_dir() {
            return Err(CoreError::OutputDirNotFound(out_dir));
        }

        let working = match options.working {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(CoreError::WorkingDirNotFound(dir));
                }
                clean_dir(&dir)?;
                WorkingDir::Provided(dir)
            }
            None => {
                let dir = tempfile::Builder::new().prefix("isomer_").tempdir()?;
                debug!("using temporary working directory {}", dir.path().display());
                WorkingDir::Temporary(dir)
            }
        };

        Ok(Self {
            source,
            outfile,
            working,
            quiet: options.quiet,
            backend,
        })
    }

    pub fn working_dir(&self) -> &Path {
        self.working.path()
    }

    pub fn backend(&self) -> &dyn MasteringBackend {
        self.backend.as_ref()
    }

    /// Run the whole pipeline for `flavor`, calling `observer` as each
    /// stage starts.
    pub fn generate(
        &self,
        flavor: &FlavorConfig,
        mut observer: impl FnMut(Stage),
    ) -> Result<BuildReport, CoreError> {
        info!(
            "building {} from {} (volume {})",
            self.outfile.display(),
            self.source.display(),
            flavor.volume_id
        );
        flavor.verify_paths()?;

        observer(Stage::Render);
        let boot_menu = template::render(flavor)?;

        observer(Stage::Compose);
        let manifest = compose(flavor, &self.source, boot_menu.as_deref())?;
        let summary = manifest.summary();
        debug!(
            "manifest: {} directories, {} files, {} excluded, {} linked",
            summary.directories, summary.files, summary.excluded, summary.linked
        );

        observer(Stage::Materialize);
        materialize(&manifest, self.working_dir())?;
        if interrupt_requested() {
            return Err(CoreError::Interrupted);
        }

        observer(Stage::Master);
        let spec = MasterSpec {
            volume_id: flavor.volume_id.clone(),
            working_dir: self.working_dir().to_path_buf(),
            outfile: self.outfile.clone(),
            bios_boot: flavor.bios_boot,
            efi_boot: flavor.efi_boot,
            quiet: self.quiet,
        };
        self.backend.create_image(&spec)?;

        if flavor.checksum {
            if interrupt_requested() {
                return Err(CoreError::Interrupted);
            }
            observer(Stage::Checksum);
            self.backend
                .implant_checksum(&self.outfile, self.quiet, &interrupt_requested)
                .map_err(|e| match e {
                    RuntimeError::Interrupted(_) => CoreError::Interrupted,
                    other => CoreError::Runtime(other),
                })?;
        }

        info!("image written to {}", self.outfile.display());
        Ok(BuildReport {
            outfile: self.outfile.clone(),
            volume_id: flavor.volume_id.clone(),
            working_dir: self.working_dir().to_path_buf(),
            backend: self.backend.name().to_owned(),
            checksum: flavor.checksum,
            boot_menu: boot_menu.is_some(),
            manifest: summary,
        })
    }
}
