use crate::xorriso::{IMPLANTISOMD5, XORRISOFS};
use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub(crate) fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools the xorriso backend shells out to.
/// `implantisomd5` is only required when the flavor asks for a checksum.
pub fn check_mastering_prereqs(checksum: bool) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists(XORRISOFS) {
        missing.push(MissingPrereq {
            name: XORRISOFS,
            purpose: "mastering the ISO image",
            install_hint: "dnf install xorriso | apt install xorriso | zypper install xorriso | pacman -S libisoburn",
        });
    }

    if checksum && !command_exists(IMPLANTISOMD5) {
        missing.push(MissingPrereq {
            name: IMPLANTISOMD5,
            purpose: "embedding the media checksum",
            install_hint: "dnf install isomd5sum | apt install isomd5sum | zypper install checkmedia | pacman -S isomd5sum",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nisomer requires these tools to master images.");
    msg
}
