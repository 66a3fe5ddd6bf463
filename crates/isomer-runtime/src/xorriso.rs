use crate::backend::{MasterSpec, MasteringBackend};
use crate::prereq::command_exists;
use crate::RuntimeError;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const XORRISOFS: &str = "xorrisofs";
pub const IMPLANTISOMD5: &str = "implantisomd5";

/// How often a running checksum tool is checked for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const BIOS_BOOT_ARGS: &[&str] = &[
    "-b",
    "isolinux/isolinux.bin",
    "-c",
    "isolinux/boot.cat",
    "-no-emul-boot",
    "-boot-load-size",
    "4",
    "-boot-info-table",
    "-eltorito-alt-boot",
];

const EFI_BOOT_ARGS: &[&str] = &["-e", "images/efiboot.img", "-no-emul-boot"];

/// Masters images with `xorrisofs` and embeds checksums with `implantisomd5`.
pub struct XorrisoBackend {
    mkisofs: String,
    implant: String,
}

impl Default for XorrisoBackend {
    fn default() -> Self {
        Self::with_tools(XORRISOFS, IMPLANTISOMD5)
    }
}

impl XorrisoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use alternative executables for mastering and checksumming.
    pub fn with_tools(mkisofs: impl Into<String>, implant: impl Into<String>) -> Self {
        Self {
            mkisofs: mkisofs.into(),
            implant: implant.into(),
        }
    }
}

/// Arguments passed to `xorrisofs` for `spec`, without the program name.
pub fn master_args(spec: &MasterSpec) -> Vec<String> {
    let mut args: Vec<String> = [
        "-v",
        "-follow-links",
        "-J",
        "-joliet-long",
        "-r",
        "-U",
        "-V",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect();
    args.push(spec.volume_id.to_string());

    if spec.bios_boot {
        args.extend(BIOS_BOOT_ARGS.iter().map(|s| (*s).to_owned()));
    }
    if spec.efi_boot {
        args.extend(EFI_BOOT_ARGS.iter().map(|s| (*s).to_owned()));
    }

    args.push("-o".to_owned());
    args.push(spec.outfile.to_string_lossy().into_owned());
    args.push(spec.working_dir.to_string_lossy().into_owned());
    args
}

fn stdout_for(quiet: bool) -> Stdio {
    if quiet {
        Stdio::null()
    } else {
        Stdio::inherit()
    }
}

fn spawn_error(tool: &str, err: &io::Error) -> RuntimeError {
    if err.kind() == io::ErrorKind::NotFound {
        RuntimeError::ToolNotFound(tool.to_owned())
    } else {
        RuntimeError::ToolFailed {
            tool: tool.to_owned(),
            reason: format!("failed to start: {err}"),
        }
    }
}

impl MasteringBackend for XorrisoBackend {
    fn name(&self) -> &'static str {
        "xorriso"
    }

    fn available(&self) -> bool {
        command_exists(&self.mkisofs)
    }

    fn create_image(&self, spec: &MasterSpec) -> Result<(), RuntimeError> {
        let args = master_args(spec);
        info!("running command: {} {}", self.mkisofs, args.join(" "));

        let status = Command::new(&self.mkisofs)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout_for(spec.quiet))
            .status()
            .map_err(|e| spawn_error(&self.mkisofs, &e))?;

        if !status.success() {
            return Err(RuntimeError::ToolFailed {
                tool: self.mkisofs.clone(),
                reason: format!("failed to generate image ({status})"),
            });
        }
        debug!("{} written", spec.outfile.display());
        Ok(())
    }

    fn implant_checksum(
        &self,
        image: &Path,
        quiet: bool,
        cancel: &dyn Fn() -> bool,
    ) -> Result<(), RuntimeError> {
        info!("running command: {} {}", self.implant, image.display());

        let mut child = Command::new(&self.implant)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(stdout_for(quiet))
            .spawn()
            .map_err(|e| spawn_error(&self.implant, &e))?;

        // The tool reports nothing while hashing, so poll until it exits.
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                return Err(RuntimeError::ToolFailed {
                    tool: self.implant.clone(),
                    reason: format!("failed to implant checksum ({status})"),
                });
            }
            if cancel() {
                warn!("stopping {} (pid {})", self.implant, child.id());
                let _ = child.kill();
                let _ = child.wait();
                return Err(RuntimeError::Interrupted(self.implant.clone()));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
