//! Newtype wrappers for validated strings, providing compile-time type safety.
//!
//! All newtypes serialize as plain strings.

use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_newtype!(
    /// Slash-separated path inside the image, relative to its root.
    ///
    /// Never empty, never contains `.`, `..`, or empty components, and never
    /// starts with `/`.
    IsoPath
);

string_newtype!(
    /// Volume label written into the image header. Contains no whitespace.
    VolumeId
);

impl IsoPath {
    /// Normalize a user-supplied destination path.
    ///
    /// Leading `/`, repeated separators and `.` components are dropped.
    /// Returns the reason on failure.
    pub fn normalize(raw: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => return Err(format!("'{raw}' escapes the image root")),
                _ => parts.push(part),
            }
        }
        if parts.is_empty() {
            return Err(format!("'{raw}' does not name a path inside the image"));
        }
        Ok(Self(parts.join("/")))
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn is_below(&self, ancestor: &IsoPath) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(ancestor.as_str())
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    /// Path components, root first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl AsRef<std::path::Path> for IsoPath {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl VolumeId {
    /// Validate a volume label. Returns the reason on failure.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("must not be empty".to_owned());
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(format!("'{raw}' contains whitespace"));
        }
        Ok(Self(raw.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_path_normalizes_separators_and_dots() {
        assert_eq!(IsoPath::normalize("/EFI//BOOT/./grub.cfg").unwrap(), "EFI/BOOT/grub.cfg");
        assert_eq!(IsoPath::normalize("ks.cfg").unwrap(), "ks.cfg");
        assert_eq!(IsoPath::normalize("isolinux/").unwrap(), "isolinux");
    }

    #[test]
    fn iso_path_rejects_escape_and_empty() {
        assert!(IsoPath::normalize("../etc/passwd").is_err());
        assert!(IsoPath::normalize("a/../b").is_err());
        assert!(IsoPath::normalize("").is_err());
        assert!(IsoPath::normalize("/./").is_err());
    }

    #[test]
    fn iso_path_is_below() {
        let boot = IsoPath::normalize("boot").unwrap();
        let grub = IsoPath::normalize("boot/grub/grub.cfg").unwrap();
        let bootx = IsoPath::normalize("bootx").unwrap();
        assert!(grub.is_below(&boot));
        assert!(!bootx.is_below(&boot));
        assert!(!boot.is_below(&boot));
        assert_eq!(grub.components().collect::<Vec<_>>(), ["boot", "grub", "grub.cfg"]);
    }

    #[test]
    fn volume_id_rejects_whitespace() {
        assert!(VolumeId::parse("bad id").is_err());
        assert!(VolumeId::parse("tab\tid").is_err());
        assert!(VolumeId::parse("").is_err());
        assert_eq!(VolumeId::parse("Fedora-39").unwrap().as_str(), "Fedora-39");
    }

    #[test]
    fn newtypes_serialize_as_strings() {
        let id = VolumeId::parse("LIVE").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"LIVE\"");
        let path = IsoPath::normalize("a/b").unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"a/b\"");
    }

    #[test]
    fn borrow_allows_str_lookup() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(IsoPath::normalize("ks.cfg").unwrap(), 1);
        assert_eq!(map.get("ks.cfg"), Some(&1));
    }
}
