//! Source tree composition: the exclude/include overlay over a source tree.

use crate::CoreError;
use glob::{MatchOptions, Pattern};
use isomer_schema::{FlavorConfig, FlavorError, IsoPath};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Where the generated boot menu lands inside the image.
pub const GRUB_REL_PATH: &str = "EFI/BOOT/grub.cfg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    /// Taken from the source tree unchanged.
    FromSource { source: PathBuf, is_dir: bool },
    /// Suppressed by an `exclude` pattern.
    Excluded,
    /// Overlaid with a host path.
    LinkedTo(PathBuf),
}

/// The composed image tree, keyed by destination path.
#[derive(Debug)]
pub struct TreeManifest {
    pub entries: BTreeMap<IsoPath, ManifestEntry>,
    /// Backing file for the rendered boot menu; removed on drop.
    boot_menu: Option<NamedTempFile>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    pub directories: usize,
    pub files: usize,
    pub excluded: usize,
    pub linked: usize,
}

impl TreeManifest {
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn boot_menu_path(&self) -> Option<&Path> {
        self.boot_menu.as_ref().map(NamedTempFile::path)
    }

    pub fn summary(&self) -> ManifestSummary {
        let mut summary = ManifestSummary::default();
        for entry in self.entries.values() {
            match entry {
                ManifestEntry::FromSource { is_dir: true, .. } => summary.directories += 1,
                ManifestEntry::FromSource { is_dir: false, .. } => summary.files += 1,
                ManifestEntry::Excluded => summary.excluded += 1,
                ManifestEntry::LinkedTo(_) => summary.linked += 1,
            }
        }
        summary
    }

    /// The nearest overlay above `path`, if any.
    fn overlay_covering(&self, path: &IsoPath) -> Option<&IsoPath> {
        self.entries.iter().find_map(|(p, entry)| {
            (matches!(entry, ManifestEntry::LinkedTo(_)) && path.is_below(p)).then_some(p)
        })
    }

    /// The outermost non-directory source entry above `path`. The walk does
    /// not descend into symlinks, so a symlinked directory shows up here.
    fn source_link_above(&self, path: &IsoPath) -> Option<(IsoPath, PathBuf)> {
        self.entries.iter().find_map(|(p, entry)| match entry {
            ManifestEntry::FromSource {
                source,
                is_dir: false,
            } if path.is_below(p) => Some((p.clone(), source.clone())),
            _ => None,
        })
    }
}

/// One `exclude` entry, split into glob components.
struct ExcludeRule {
    raw: String,
    anchored: bool,
    parts: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl ExcludeRule {
    fn compile(raw: &str) -> Result<Self, FlavorError> {
        let invalid = |reason: String| FlavorError::Validation {
            field: "exclude".to_owned(),
            reason,
        };
        let parts = raw
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .map(|part| {
                Pattern::new(part).map_err(|e| invalid(format!("bad pattern '{raw}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if parts.is_empty() {
            return Err(invalid(format!("pattern '{raw}' matches nothing")));
        }
        Ok(Self {
            raw: raw.to_owned(),
            anchored: raw.starts_with('/'),
            parts,
        })
    }

    /// Whether the rule names exactly `components` (not an ancestor of it).
    fn matches(&self, components: &[&str]) -> bool {
        let n = self.parts.len();
        if components.len() < n || (self.anchored && components.len() != n) {
            return false;
        }
        self.parts
            .iter()
            .zip(&components[components.len() - n..])
            .all(|(pattern, name)| pattern.matches_with(name, MATCH_OPTIONS))
    }

    /// Whether `components` or any of its ancestors is excluded.
    fn covers(&self, components: &[&str]) -> bool {
        (1..=components.len()).any(|len| self.matches(&components[..len]))
    }
}

fn make_absolute(path: &Path) -> Result<PathBuf, CoreError> {
    Ok(std::path::absolute(path)?)
}

/// Build the manifest for `flavor` over `source`.
///
/// `boot_menu` is the rendered template; it is written to a temporary file
/// that lives as long as the manifest.
pub fn compose(
    flavor: &FlavorConfig,
    source: &Path,
    boot_menu: Option<&str>,
) -> Result<TreeManifest, CoreError> {
    let source = make_absolute(source)?;
    let rules = flavor
        .exclude
        .iter()
        .map(|raw| ExcludeRule::compile(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut manifest = TreeManifest {
        entries: BTreeMap::new(),
        boot_menu: None,
    };

    add_tree(&mut manifest, &source, None, &rules)?;

    for (dest, target) in &flavor.include {
        if let Some(outer) = manifest.overlay_covering(dest) {
            warn!(
                "include entry {dest} is shadowed by the overlay at {outer}; ignoring it"
            );
            continue;
        }
        expand_source_links(&mut manifest, dest, &rules)?;
        let target = make_absolute(target)?;
        if !target.exists() {
            warn!(
                "include target {} for {dest} does not exist",
                target.display()
            );
        }
        link(&mut manifest, dest.clone(), target);
    }

    if let Some(text) = boot_menu {
        let dest = IsoPath::normalize(GRUB_REL_PATH).map_err(|reason| CoreError::InvalidPath {
            path: PathBuf::from(GRUB_REL_PATH),
            reason,
        })?;
        if let Some(outer) = manifest.overlay_covering(&dest) {
            return Err(FlavorError::Validation {
                field: "grub_template".to_owned(),
                reason: format!("{GRUB_REL_PATH} lies inside the overlay at {outer}"),
            }
            .into());
        }
        expand_source_links(&mut manifest, &dest, &rules)?;
        if let Some(ManifestEntry::LinkedTo(previous)) = manifest.entries.get(&dest) {
            warn!(
                "rendered boot menu replaces include entry {dest} ({})",
                previous.display()
            );
        }

        let mut file = tempfile::Builder::new()
            .prefix("isomer_grub_")
            .suffix(".cfg")
            .tempfile()?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        link(&mut manifest, dest, file.path().to_path_buf());
        manifest.boot_menu = Some(file);
    }

    Ok(manifest)
}

/// Add every entry below `root` to the manifest, under `prefix` if given.
fn add_tree(
    manifest: &mut TreeManifest,
    root: &Path,
    prefix: Option<&IsoPath>,
    rules: &[ExcludeRule],
) -> Result<(), CoreError> {
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel = rel.to_str().ok_or_else(|| CoreError::InvalidPath {
            path: entry.path().to_path_buf(),
            reason: "file name is not valid UTF-8".to_owned(),
        })?;
        let rel = match prefix {
            Some(prefix) => format!("{prefix}/{rel}"),
            None => rel.to_owned(),
        };
        let dest = IsoPath::normalize(&rel).map_err(|reason| CoreError::InvalidPath {
            path: entry.path().to_path_buf(),
            reason,
        })?;

        let components: Vec<&str> = dest.components().collect();
        let value = match rules.iter().find(|rule| rule.covers(&components)) {
            Some(rule) => {
                debug!("excluding {dest} (matched '{}')", rule.raw);
                ManifestEntry::Excluded
            }
            None => ManifestEntry::FromSource {
                source: entry.path().to_path_buf(),
                is_dir: entry.file_type().is_dir(),
            },
        };
        manifest.entries.insert(dest, value);
    }
    Ok(())
}

/// Turn symlinked source directories above `dest` into real directories.
///
/// Without this the working tree would hold a link at that point and the
/// overlay would be created inside the link target.
fn expand_source_links(
    manifest: &mut TreeManifest,
    dest: &IsoPath,
    rules: &[ExcludeRule],
) -> Result<(), CoreError> {
    while let Some((path, source)) = manifest.source_link_above(dest) {
        if !source.is_dir() {
            return Err(CoreError::InvalidPath {
                path: source,
                reason: format!(
                    "{dest} cannot be placed below {path}, which is not a directory"
                ),
            });
        }
        debug!("expanding symlinked directory {path} to place {dest}");
        manifest.entries.insert(
            path.clone(),
            ManifestEntry::FromSource {
                source: source.clone(),
                is_dir: true,
            },
        );
        add_tree(manifest, &source, Some(&path), rules)?;
    }
    Ok(())
}

/// Overlay `target` at `dest`, dropping anything that was below it.
fn link(manifest: &mut TreeManifest, dest: IsoPath, target: PathBuf) {
    manifest.entries.retain(|path, _| !path.is_below(&dest));
    manifest
        .entries
        .insert(dest, ManifestEntry::LinkedTo(target));
}

#[cfg(test)]
mod tests {
    use super::*;
    use isomer_schema::{Literal, Namespace, ValidateOptions};
    use std::fs;

    fn source_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for d in ["boot", "EFI/BOOT", "images", "isolinux", "docs/old"] {
            fs::create_dir_all(root.join(d)).unwrap();
        }
        for f in [
            "boot/vmlinuz",
            "EFI/BOOT/grub.cfg",
            "EFI/BOOT/BOOTX64.EFI",
            "images/efiboot.img",
            "isolinux/isolinux.bin",
            "docs/readme.txt",
            "docs/old/notes.txt",
            "notes.txt",
        ] {
            fs::write(root.join(f), f).unwrap();
        }
        dir
    }

    fn flavor(pairs: &[(&str, Literal)]) -> FlavorConfig {
        let mut ns: Namespace = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect();
        ns.entry("volume_id".to_owned())
            .or_insert_with(|| Literal::from("TEST"));
        FlavorConfig::from_namespace_with(ns, &ValidateOptions::default()).unwrap()
    }

    fn include(pairs: &[(&str, &Path)]) -> Literal {
        Literal::dict(
            pairs
                .iter()
                .map(|(k, v)| (Literal::from(*k), Literal::from(v.to_str().unwrap()))),
        )
    }

    #[test]
    fn plain_tree_comes_from_source() {
        let src = source_tree();
        let manifest = compose(&flavor(&[]), src.path(), None).unwrap();

        assert_eq!(
            manifest.get("boot"),
            Some(&ManifestEntry::FromSource {
                source: src.path().join("boot"),
                is_dir: true
            })
        );
        assert_eq!(
            manifest.get("boot/vmlinuz"),
            Some(&ManifestEntry::FromSource {
                source: src.path().join("boot/vmlinuz"),
                is_dir: false
            })
        );
        let summary = manifest.summary();
        assert_eq!(summary.directories, 7);
        assert_eq!(summary.files, 8);
        assert_eq!(summary.excluded + summary.linked, 0);
        assert!(manifest.boot_menu_path().is_none());
    }

    #[test]
    fn exclude_suppresses_entry_and_descendants() {
        let src = source_tree();
        let manifest =
            compose(&flavor(&[("exclude", "docs".into())]), src.path(), None).unwrap();
        for path in ["docs", "docs/readme.txt", "docs/old", "docs/old/notes.txt"] {
            assert_eq!(manifest.get(path), Some(&ManifestEntry::Excluded), "{path}");
        }
        assert!(matches!(
            manifest.get("notes.txt"),
            Some(ManifestEntry::FromSource { .. })
        ));
    }

    #[test]
    fn relative_patterns_match_at_any_depth() {
        let src = source_tree();
        let manifest = compose(
            &flavor(&[("exclude", "notes.txt".into())]),
            src.path(),
            None,
        )
        .unwrap();
        assert_eq!(manifest.get("notes.txt"), Some(&ManifestEntry::Excluded));
        assert_eq!(
            manifest.get("docs/old/notes.txt"),
            Some(&ManifestEntry::Excluded)
        );
        assert!(matches!(
            manifest.get("docs/readme.txt"),
            Some(ManifestEntry::FromSource { .. })
        ));
    }

    #[test]
    fn anchored_and_glob_patterns() {
        let src = source_tree();
        let cfg = flavor(&[(
            "exclude",
            Literal::List(vec!["/notes.txt".into(), "docs/*.txt".into()]),
        )]);
        let manifest = compose(&cfg, src.path(), None).unwrap();
        assert_eq!(manifest.get("notes.txt"), Some(&ManifestEntry::Excluded));
        assert_eq!(manifest.get("docs/readme.txt"), Some(&ManifestEntry::Excluded));
        assert!(matches!(
            manifest.get("docs/old/notes.txt"),
            Some(ManifestEntry::FromSource { .. })
        ));
    }

    #[test]
    fn bad_pattern_is_a_validation_error() {
        let src = source_tree();
        let err = compose(&flavor(&[("exclude", "[".into())]), src.path(), None).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Flavor(FlavorError::Validation { ref field, .. }) if field == "exclude"
        ));
    }

    #[test]
    fn overlay_wins_over_exclusion() {
        let src = source_tree();
        let alt = tempfile::tempdir().unwrap();
        let cfg = flavor(&[
            ("exclude", Literal::List(vec!["boot".into()])),
            ("include", include(&[("boot", alt.path())])),
        ]);
        let manifest = compose(&cfg, src.path(), None).unwrap();
        assert_eq!(
            manifest.get("boot"),
            Some(&ManifestEntry::LinkedTo(alt.path().to_path_buf()))
        );
        assert_eq!(manifest.get("boot/vmlinuz"), None);
    }

    #[test]
    fn overlay_adds_new_paths() {
        let src = source_tree();
        let extra = src.path().join("notes.txt");
        let cfg = flavor(&[("include", include(&[("extras/new/file.txt", &extra)]))]);
        let manifest = compose(&cfg, src.path(), None).unwrap();
        assert_eq!(
            manifest.get("extras/new/file.txt"),
            Some(&ManifestEntry::LinkedTo(extra))
        );
    }

    #[test]
    fn nested_overlay_is_shadowed() {
        let src = source_tree();
        let outer = tempfile::tempdir().unwrap();
        let inner = outer.path().join("inner");
        let cfg = flavor(&[(
            "include",
            include(&[("docs", outer.path()), ("docs/old/x", &inner)]),
        )]);
        let manifest = compose(&cfg, src.path(), None).unwrap();
        assert_eq!(
            manifest.get("docs"),
            Some(&ManifestEntry::LinkedTo(outer.path().to_path_buf()))
        );
        assert_eq!(manifest.get("docs/old/x"), None);
        assert_eq!(manifest.get("docs/old"), None);
    }

    #[test]
    fn relative_include_targets_become_absolute() {
        let src = source_tree();
        let cfg = flavor(&[(
            "include",
            Literal::dict([(Literal::from("ks.cfg"), Literal::from("relative/ks.cfg"))]),
        )]);
        let manifest = compose(&cfg, src.path(), None).unwrap();
        let Some(ManifestEntry::LinkedTo(target)) = manifest.get("ks.cfg") else {
            panic!("ks.cfg not linked");
        };
        assert!(target.is_absolute());
        assert!(target.ends_with("relative/ks.cfg"));
    }

    #[test]
    fn kickstart_is_overlaid_at_ks_path() {
        let src = source_tree();
        let ks = src.path().join("notes.txt");
        let cfg = flavor(&[
            ("kickstart", Literal::from(ks.to_str().unwrap())),
            ("ks_path", "/kickstart/custom.ks".into()),
        ]);
        let manifest = compose(&cfg, src.path(), None).unwrap();
        assert_eq!(
            manifest.get("kickstart/custom.ks"),
            Some(&ManifestEntry::LinkedTo(ks))
        );
    }

    #[test]
    fn boot_menu_replaces_source_and_overlay() {
        let src = source_tree();
        let other = src.path().join("notes.txt");
        let cfg = flavor(&[("include", include(&[(GRUB_REL_PATH, &other)]))]);
        let manifest = compose(&cfg, src.path(), Some("menuentry 'TEST' {}\n")).unwrap();

        let menu = manifest.boot_menu_path().unwrap().to_path_buf();
        assert_eq!(
            manifest.get(GRUB_REL_PATH),
            Some(&ManifestEntry::LinkedTo(menu.clone()))
        );
        assert_eq!(fs::read_to_string(&menu).unwrap(), "menuentry 'TEST' {}\n");
        assert!(matches!(
            manifest.get("EFI/BOOT/BOOTX64.EFI"),
            Some(ManifestEntry::FromSource { .. })
        ));

        drop(manifest);
        assert!(!menu.exists());
    }

    #[test]
    fn boot_menu_inside_overlay_is_rejected() {
        let src = source_tree();
        let efi = tempfile::tempdir().unwrap();
        let cfg = flavor(&[("include", include(&[("EFI", efi.path())]))]);
        let err = compose(&cfg, src.path(), Some("menu")).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Flavor(FlavorError::Validation { ref field, .. }) if field == "grub_template"
        ));
    }

    fn linked_source() -> (tempfile::TempDir, tempfile::TempDir) {
        use std::os::unix::fs::symlink;
        let src = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::create_dir_all(outside.path().join("BOOT")).unwrap();
        fs::write(outside.path().join("BOOT/grub.cfg"), "original").unwrap();
        fs::write(outside.path().join("BOOT/BOOTX64.EFI"), "efi").unwrap();
        fs::write(outside.path().join("kernel"), "kernel").unwrap();
        symlink(outside.path(), src.path().join("EFI")).unwrap();
        symlink(outside.path().join("kernel"), src.path().join("vmlinuz")).unwrap();
        (src, outside)
    }

    #[test]
    fn symlinks_without_overlays_stay_links() {
        let (src, _outside) = linked_source();
        let manifest = compose(&flavor(&[]), src.path(), None).unwrap();
        assert_eq!(
            manifest.get("EFI"),
            Some(&ManifestEntry::FromSource {
                source: src.path().join("EFI"),
                is_dir: false
            })
        );
        assert_eq!(
            manifest.get("vmlinuz"),
            Some(&ManifestEntry::FromSource {
                source: src.path().join("vmlinuz"),
                is_dir: false
            })
        );
        assert_eq!(manifest.get("EFI/BOOT"), None);
    }

    #[test]
    fn boot_menu_below_symlinked_dir_expands_it() {
        let (src, _outside) = linked_source();
        let manifest = compose(&flavor(&[]), src.path(), Some("menu")).unwrap();

        assert_eq!(
            manifest.get("EFI"),
            Some(&ManifestEntry::FromSource {
                source: src.path().join("EFI"),
                is_dir: true
            })
        );
        assert_eq!(
            manifest.get("EFI/BOOT"),
            Some(&ManifestEntry::FromSource {
                source: src.path().join("EFI/BOOT"),
                is_dir: true
            })
        );
        assert_eq!(
            manifest.get("EFI/BOOT/BOOTX64.EFI"),
            Some(&ManifestEntry::FromSource {
                source: src.path().join("EFI/BOOT/BOOTX64.EFI"),
                is_dir: false
            })
        );
        let menu = manifest.boot_menu_path().unwrap().to_path_buf();
        assert_eq!(
            manifest.get(GRUB_REL_PATH),
            Some(&ManifestEntry::LinkedTo(menu))
        );
    }

    #[test]
    fn include_below_symlinked_dir_respects_excludes() {
        let (src, _outside) = linked_source();
        let extra = tempfile::NamedTempFile::new().unwrap();
        let cfg = flavor(&[
            ("exclude", "BOOTX64.EFI".into()),
            ("include", include(&[("EFI/extra.cfg", extra.path())])),
        ]);
        let manifest = compose(&cfg, src.path(), None).unwrap();
        assert!(matches!(
            manifest.get("EFI"),
            Some(ManifestEntry::FromSource { is_dir: true, .. })
        ));
        assert_eq!(
            manifest.get("EFI/BOOT/BOOTX64.EFI"),
            Some(&ManifestEntry::Excluded)
        );
        assert_eq!(
            manifest.get("EFI/extra.cfg"),
            Some(&ManifestEntry::LinkedTo(extra.path().to_path_buf()))
        );
    }

    #[test]
    fn include_below_symlinked_file_is_rejected() {
        let (src, _outside) = linked_source();
        let extra = tempfile::NamedTempFile::new().unwrap();
        let cfg = flavor(&[("include", include(&[("vmlinuz/extra", extra.path())]))]);
        let err = compose(&cfg, src.path(), None).unwrap_err();
        assert!(
            matches!(err, CoreError::InvalidPath { ref reason, .. } if reason.contains("not a directory")),
            "{err:?}"
        );
    }

    #[test]
    fn non_utf8_names_are_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let src = tempfile::tempdir().unwrap();
        let latin1 = src.path().join(OsStr::from_bytes(b"caf\xe9.txt"));
        let broken = src.path().join(OsStr::from_bytes(b"caf\xff.txt"));
        // Some filesystems refuse names that are not valid UTF-8.
        if fs::write(&latin1, "a").is_err() || fs::write(&broken, "b").is_err() {
            return;
        }
        let err = compose(&flavor(&[]), src.path(), None).unwrap_err();
        assert!(
            matches!(err, CoreError::InvalidPath { ref reason, .. } if reason.contains("UTF-8")),
            "{err:?}"
        );
    }
}
