//! Flavor file lookup.

use crate::FlavorError;
use std::path::{Path, PathBuf};

/// Environment variable naming the system flavor directory.
pub const CFG_DIR_ENV: &str = "ISOMER_CFG_DIR";
/// Flavor directory used when [`CFG_DIR_ENV`] is unset.
pub const DEFAULT_CFG_DIR: &str = "/etc/isomer";

/// The flavor directory from the environment, or the default.
pub fn cfg_dir() -> PathBuf {
    std::env::var_os(CFG_DIR_ENV).map_or_else(|| PathBuf::from(DEFAULT_CFG_DIR), PathBuf::from)
}

/// Resolve a `--flavor` argument to a file.
///
/// Tries the argument as a path, then `<name>.cfg` in the current directory,
/// then `<name>.cfg` in the flavor directory.
pub fn locate_flavor(flavor: &Path) -> Result<PathBuf, FlavorError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    locate_flavor_in(flavor, &cwd, &cfg_dir())
        .ok_or_else(|| FlavorError::FlavorNotFound(flavor.display().to_string()))
}

/// [`locate_flavor`] with explicit search directories.
pub fn locate_flavor_in(flavor: &Path, cwd: &Path, cfg_dir: &Path) -> Option<PathBuf> {
    if flavor.is_file() {
        return Some(flavor.to_path_buf());
    }
    let name = flavor.with_extension("cfg");
    [cwd.join(&name), cfg_dir.join(&name)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}
