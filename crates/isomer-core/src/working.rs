//! Working directory handling: clearing it and materializing a manifest.

use crate::compose::{ManifestEntry, TreeManifest};
use std::fs;
use std::io;
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::Path;
use tracing::{debug, info};

const DIR_MODE: u32 = 0o755;

/// Remove everything inside `dir`, leaving `dir` itself.
///
/// Symlinks are removed, never followed.
pub fn clean_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    debug!("cleared working directory {}", dir.display());
    Ok(())
}

fn create_dirs(path: &Path) -> io::Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
}

/// Fail if any existing ancestor of `path` below `working` is a symlink.
fn ensure_no_link_above(working: &Path, path: &Path) -> io::Result<()> {
    for ancestor in path.ancestors().skip(1) {
        if ancestor == working || !ancestor.starts_with(working) {
            break;
        }
        match fs::symlink_metadata(ancestor) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "refusing to create {} below the symlink {}",
                        path.display(),
                        ancestor.display()
                    ),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Recreate `manifest` under `working` as directories and symlinks.
///
/// `working` must already exist and be empty. Nothing is ever written
/// through a symlink in the working tree.
pub fn materialize(manifest: &TreeManifest, working: &Path) -> io::Result<()> {
    for (dest, entry) in &manifest.entries {
        let path = working.join(dest);
        if !matches!(entry, ManifestEntry::Excluded) {
            ensure_no_link_above(working, &path)?;
        }
        match entry {
            ManifestEntry::Excluded => {}
            ManifestEntry::FromSource { is_dir: true, .. } => {
                info!("creating directory {}", path.display());
                fs::DirBuilder::new().mode(DIR_MODE).create(&path)?;
            }
            ManifestEntry::FromSource {
                source,
                is_dir: false,
            } => {
                info!("creating link {} -> {}", path.display(), source.display());
                symlink(source, &path)?;
            }
            ManifestEntry::LinkedTo(target) => {
                if let Some(parent) = path.parent() {
                    create_dirs(parent)?;
                }
                info!("creating link {} -> {}", path.display(), target.display());
                symlink(target, &path)?;
            }
        }
    }
    Ok(())
}
