use crate::backend::{MasterSpec, MasteringBackend};
use crate::RuntimeError;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

/// A request received by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateImage(MasterSpec),
    ImplantChecksum(PathBuf),
}

/// Records requests and writes a text placeholder instead of an image.
///
/// The placeholder lists the working tree (with symlink targets) so tests can
/// check exactly what would have been mastered.
pub struct MockBackend {
    calls: Mutex<Vec<MockCall>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: MockCall) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .map_err(|e| RuntimeError::ToolFailed {
                tool: "mock".to_owned(),
                reason: format!("mutex poisoned: {e}"),
            })?
            .push(call);
        Ok(())
    }
}

/// One line per entry under `root`, sorted, symlinks shown with targets.
fn describe_tree(root: &Path) -> Result<String, RuntimeError> {
    let mut out = String::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| RuntimeError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        if entry.path_is_symlink() {
            let target = fs::read_link(entry.path())?;
            let _ = writeln!(out, "{rel} -> {}", target.display());
        } else if entry.file_type().is_dir() {
            let _ = writeln!(out, "{rel}/");
        } else {
            let _ = writeln!(out, "{rel}");
        }
    }
    Ok(out)
}

impl MasteringBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn create_image(&self, spec: &MasterSpec) -> Result<(), RuntimeError> {
        self.record(MockCall::CreateImage(spec.clone()))?;

        let mut body = format!("mock-iso:{}\n", spec.volume_id);
        let _ = writeln!(body, "bios_boot={} efi_boot={}", spec.bios_boot, spec.efi_boot);
        body.push_str(&describe_tree(&spec.working_dir)?);
        fs::write(&spec.outfile, body)?;
        Ok(())
    }

    fn implant_checksum(
        &self,
        image: &Path,
        _quiet: bool,
        cancel: &dyn Fn() -> bool,
    ) -> Result<(), RuntimeError> {
        self.record(MockCall::ImplantChecksum(image.to_path_buf()))?;
        if cancel() {
            return Err(RuntimeError::Interrupted("mock".to_owned()));
        }
        let mut file = fs::OpenOptions::new().append(true).open(image)?;
        writeln!(file, "checksum=implanted")?;
        Ok(())
    }
}
