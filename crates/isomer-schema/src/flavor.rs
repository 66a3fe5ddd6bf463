//! Validation of a merged namespace into a typed [`FlavorConfig`].

use crate::namespace::Namespace;
use crate::types::{IsoPath, VolumeId};
use crate::value::Literal;
use crate::FlavorError;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default destination of the kickstart file inside the image.
pub const KS_REL_PATH: &str = "ks.cfg";

/// A validated flavor, ready for rendering and composition.
#[derive(Debug, Clone, PartialEq)]
pub struct FlavorConfig {
    pub volume_id: VolumeId,
    /// Glob patterns of source entries to leave out of the image.
    pub exclude: BTreeSet<String>,
    /// Image path to host path overlays.
    pub include: BTreeMap<IsoPath, PathBuf>,
    pub kickstart: Option<PathBuf>,
    pub ks_path: IsoPath,
    pub grub_template: Option<String>,
    /// Fields with no meaning of their own, bound as template variables.
    pub extra_fields: IndexMap<String, Literal>,
    pub checksum: bool,
    pub bios_boot: bool,
    pub efi_boot: bool,
}

/// Caller-supplied fallbacks applied during validation.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Used only when the flavor itself sets no `volume_id`.
    pub default_volume_id: Option<String>,
}

fn invalid(field: &str, reason: impl Into<String>) -> FlavorError {
    FlavorError::Validation {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

fn wrong_type(field: &str, expected: &str, got: &Literal) -> FlavorError {
    invalid(field, format!("expected {expected}, got {}", got.type_name()))
}

/// Take `field` out of the namespace as a string. `None` counts as unset.
fn take_str(ns: &mut Namespace, field: &str) -> Result<Option<String>, FlavorError> {
    match ns.shift_remove(field) {
        None | Some(Literal::None) => Ok(None),
        Some(Literal::Str(s)) => Ok(Some(s)),
        Some(other) => Err(wrong_type(field, "str", &other)),
    }
}

/// Like [`take_str`], but an empty string also means "not set".
fn take_nonempty_str(ns: &mut Namespace, field: &str) -> Result<Option<String>, FlavorError> {
    Ok(take_str(ns, field)?.filter(|s| !s.is_empty()))
}

fn take_bool(ns: &mut Namespace, field: &str, default: bool) -> Result<bool, FlavorError> {
    match ns.shift_remove(field) {
        None => Ok(default),
        Some(Literal::Bool(b)) => Ok(b),
        Some(other) => Err(wrong_type(field, "bool", &other)),
    }
}

fn exclude_patterns(value: Literal) -> Result<BTreeSet<String>, FlavorError> {
    let items = match value {
        Literal::Str(s) => vec![Literal::Str(s)],
        Literal::List(items) | Literal::Tuple(items) | Literal::Set(items) => items,
        other => return Err(wrong_type("exclude", "str or a list of str", &other)),
    };

    let mut patterns = BTreeSet::new();
    for item in items {
        let pattern = match item {
            Literal::Str(pattern) => pattern,
            other => return Err(wrong_type("exclude", "str entries", &other)),
        };
        if pattern.is_empty() {
            return Err(invalid("exclude", "empty pattern"));
        }
        patterns.insert(pattern);
    }
    Ok(patterns)
}

fn include_map(value: Literal) -> Result<BTreeMap<IsoPath, PathBuf>, FlavorError> {
    let pairs = match value {
        Literal::Dict(pairs) => pairs,
        other => return Err(wrong_type("include", "dict", &other)),
    };

    let mut include = BTreeMap::new();
    for (key, target) in pairs {
        let key = match key {
            Literal::Str(key) => key,
            other => return Err(wrong_type("include", "str keys", &other)),
        };
        let target = match target {
            Literal::Str(target) => target,
            other => {
                return Err(invalid(
                    "include",
                    format!("entry '{key}': expected str target, got {}", other.type_name()),
                ))
            }
        };
        let dest = IsoPath::normalize(&key).map_err(|reason| invalid("include", reason))?;
        if let Some(previous) = include.insert(dest.clone(), PathBuf::from(target)) {
            debug!(
                "include entry '{key}' replaces {} at {dest}",
                previous.display()
            );
        }
    }
    Ok(include)
}

impl FlavorConfig {
    /// Validate a merged namespace with default options.
    pub fn from_namespace(ns: Namespace) -> Result<Self, FlavorError> {
        Self::from_namespace_with(ns, &ValidateOptions::default())
    }

    /// Validate a merged namespace.
    ///
    /// Recognized fields are type-checked and consumed; whatever is left
    /// becomes `extra_fields`, with an explicit `extra_fields` dict merged
    /// over it.
    pub fn from_namespace_with(
        mut ns: Namespace,
        options: &ValidateOptions,
    ) -> Result<Self, FlavorError> {
        let raw_volume_id = match ns.shift_remove("volume_id") {
            Some(Literal::Str(s)) => s,
            Some(other) => return Err(wrong_type("volume_id", "str", &other)),
            None => options
                .default_volume_id
                .clone()
                .ok_or_else(|| invalid("volume_id", "missing required field"))?,
        };
        let volume_id =
            VolumeId::parse(&raw_volume_id).map_err(|reason| invalid("volume_id", reason))?;

        let exclude = match ns.shift_remove("exclude") {
            None => BTreeSet::new(),
            Some(value) => exclude_patterns(value)?,
        };
        let mut include = match ns.shift_remove("include") {
            None => BTreeMap::new(),
            Some(value) => include_map(value)?,
        };

        let kickstart = take_nonempty_str(&mut ns, "kickstart")?.map(PathBuf::from);
        let ks_path = take_str(&mut ns, "ks_path")?;
        let ks_path = IsoPath::normalize(ks_path.as_deref().unwrap_or(KS_REL_PATH))
            .map_err(|reason| invalid("ks_path", reason))?;
        let grub_template = take_nonempty_str(&mut ns, "grub_template")?;

        let checksum = take_bool(&mut ns, "checksum", true)?;
        let bios_boot = take_bool(&mut ns, "bios_boot", false)?;
        let efi_boot = take_bool(&mut ns, "efi_boot", true)?;

        let explicit_extra = ns.shift_remove("extra_fields");
        for field in ns.keys() {
            debug!("unrecognized field '{field}' kept as a template variable");
        }
        let mut extra_fields = ns;
        match explicit_extra {
            None => {}
            Some(Literal::Dict(pairs)) => {
                for (key, value) in pairs {
                    let key = match key {
                        Literal::Str(key) => key,
                        other => return Err(wrong_type("extra_fields", "str keys", &other)),
                    };
                    extra_fields.insert(key, value);
                }
            }
            Some(other) => return Err(wrong_type("extra_fields", "dict", &other)),
        }

        if let Some(ks) = &kickstart {
            if let Some(existing) = include.get(&ks_path) {
                debug!(
                    "include entry at {ks_path} ({}) takes precedence over kickstart {}",
                    existing.display(),
                    ks.display()
                );
            } else {
                include.insert(ks_path.clone(), ks.clone());
            }
        }

        Ok(Self {
            volume_id,
            exclude,
            include,
            kickstart,
            ks_path,
            grub_template,
            extra_fields,
            checksum,
            bios_boot,
            efi_boot,
        })
    }

    /// Check the host-side inputs the flavor names.
    pub fn verify_paths(&self) -> Result<(), FlavorError> {
        if let Some(ks) = &self.kickstart {
            if !ks.is_file() {
                return Err(invalid(
                    "kickstart",
                    format!("unable to find kickstart file: {}", ks.display()),
                ));
            }
        }
        Ok(())
    }

    /// Host path overlaid at `dest`, if any.
    pub fn include_target(&self, dest: &str) -> Option<&Path> {
        self.include.get(dest).map(PathBuf::as_path)
    }
}
