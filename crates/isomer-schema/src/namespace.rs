//! Include resolution and namespace merging.
//!
//! Statements run strictly in file order. An `include` is inlined at the
//! call site: the included file's assignments land in the same namespace at
//! that point, so later assignments in the including file override them.

use crate::parser::{parse_statements, Statement};
use crate::value::Literal;
use crate::FlavorError;
use indexmap::IndexMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Field name to value, in first-assignment order.
pub type Namespace = IndexMap<String, Literal>;

/// The result of loading a flavor file and everything it includes.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFlavor {
    pub namespace: Namespace,
    /// Every file read, in the order it was opened.
    pub files: Vec<PathBuf>,
}

/// Load `path`, resolving includes recursively, into one namespace.
pub fn load_flavor(path: &Path) -> Result<MergedFlavor, FlavorError> {
    let mut merger = Merger::default();
    merger.merge_file(path, None)?;
    debug!(
        "merged {} field(s) from {} file(s)",
        merger.namespace.len(),
        merger.files.len()
    );
    Ok(MergedFlavor {
        namespace: merger.namespace,
        files: merger.files,
    })
}

#[derive(Default)]
struct Merger {
    namespace: Namespace,
    files: Vec<PathBuf>,
    /// Canonical paths of the files currently being merged.
    stack: Vec<PathBuf>,
}

impl Merger {
    fn merge_file(&mut self, path: &Path, included_from: Option<&Path>) -> Result<(), FlavorError> {
        let not_found = |source: io::Error| FlavorError::IncludeNotFound {
            path: path.to_path_buf(),
            included_from: included_from.map(Path::to_path_buf),
            source,
        };

        let canonical = fs::canonicalize(path).map_err(not_found)?;
        if self.stack.contains(&canonical) {
            let mut chain = self.stack.clone();
            chain.push(canonical);
            return Err(FlavorError::CyclicInclude {
                path: path.to_path_buf(),
                chain,
            });
        }

        let text = fs::read_to_string(path).map_err(not_found)?;
        let statements = parse_statements(&text).map_err(|error| FlavorError::Syntax {
            path: path.to_path_buf(),
            error,
        })?;
        debug!(
            "parsed {} statement(s) from {}",
            statements.len(),
            path.display()
        );

        self.files.push(path.to_path_buf());
        self.stack.push(canonical);
        let base = path.parent().unwrap_or_else(|| Path::new(""));

        for statement in statements {
            match statement {
                Statement::Assignment { targets, value, .. } => {
                    for target in targets {
                        trace!("{}: {target} = {}", path.display(), value.repr());
                        self.namespace.insert(target, value.clone());
                    }
                }
                Statement::IncludeCall { paths, line } => {
                    for include in paths {
                        let resolved = base.join(&include);
                        debug!(
                            "{}:{line}: including {}",
                            path.display(),
                            resolved.display()
                        );
                        self.merge_file(&resolved, Some(path))?;
                    }
                }
            }
        }

        self.stack.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn later_assignment_overrides_include() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "other.cfg", "x = 2\n");
        let main = write(dir.path(), "main.cfg", "x = 1\ninclude('other.cfg')\nx = 3\n");

        let merged = load_flavor(&main).unwrap();
        assert_eq!(merged.namespace["x"], Literal::Int(3));

        fs::write(&main, "x = 1\ninclude('other.cfg')\n").unwrap();
        let merged = load_flavor(&main).unwrap();
        assert_eq!(merged.namespace["x"], Literal::Int(2));
    }

    #[test]
    fn overwrite_keeps_first_position() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "main.cfg", "a = 1\nb = 2\na = 3\n");
        let merged = load_flavor(&main).unwrap();
        let keys: Vec<_> = merged.namespace.keys().collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(merged.namespace["a"], Literal::Int(3));
    }

    #[test]
    fn merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "base.cfg", "volume_id = 'BASE'\nexclude = ['a', 'b']\n");
        let main = write(
            dir.path(),
            "main.cfg",
            "include('base.cfg')\nfields = {'k': (1, 2.5, None)}\n",
        );
        assert_eq!(load_flavor(&main).unwrap(), load_flavor(&main).unwrap());
    }

    #[test]
    fn relative_includes_resolve_against_including_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "common/base.cfg", "include('parts/boot.cfg')\n");
        write(dir.path(), "common/parts/boot.cfg", "bios_boot = True\n");
        let main = write(dir.path(), "main.cfg", "include('common/base.cfg')\n");

        let merged = load_flavor(&main).unwrap();
        assert_eq!(merged.namespace["bios_boot"], Literal::Bool(true));
        assert_eq!(merged.files.len(), 3);
        assert_eq!(merged.files[2], dir.path().join("common").join("parts/boot.cfg"));
    }

    #[test]
    fn absolute_include_paths_are_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let other = write(dir.path(), "abs/other.cfg", "y = 'abs'\n");
        let main = write(
            dir.path(),
            "main.cfg",
            &format!("include({:?})\n", other.display().to_string()),
        );
        assert_eq!(load_flavor(&main).unwrap().namespace["y"], Literal::from("abs"));
    }

    #[test]
    fn multiple_paths_in_one_include_apply_left_to_right() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.cfg", "x = 'a'\n");
        write(dir.path(), "b.cfg", "x = 'b'\n");
        let main = write(dir.path(), "main.cfg", "include('a.cfg', 'b.cfg')\n");
        assert_eq!(load_flavor(&main).unwrap().namespace["x"], Literal::from("b"));
    }

    #[test]
    fn self_include_is_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "main.cfg", "include('main.cfg')\n");
        let err = load_flavor(&main).unwrap_err();
        assert!(matches!(err, FlavorError::CyclicInclude { ref chain, .. } if chain.len() == 2));
    }

    #[test]
    fn long_cycles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            write(
                dir.path(),
                &format!("f{i}.cfg"),
                &format!("v{i} = {i}\ninclude('f{}.cfg')\n", (i + 1) % 20),
            );
        }
        let err = load_flavor(&dir.path().join("f0.cfg")).unwrap_err();
        match err {
            FlavorError::CyclicInclude { path, chain } => {
                assert_eq!(chain.len(), 21);
                assert_eq!(chain.first(), chain.last());
                assert!(path.ends_with("f0.cfg"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn sequential_reinclusion_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "common.cfg", "n = 1\n");
        write(dir.path(), "a.cfg", "include('common.cfg')\n");
        write(dir.path(), "b.cfg", "include('common.cfg')\n");
        let main = write(dir.path(), "main.cfg", "include('a.cfg')\ninclude('b.cfg')\n");
        let merged = load_flavor(&main).unwrap();
        assert_eq!(merged.files.len(), 5);
    }

    #[test]
    fn missing_include_names_includer() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "main.cfg", "include('nope.cfg')\n");
        match load_flavor(&main).unwrap_err() {
            FlavorError::IncludeNotFound {
                path,
                included_from,
                ..
            } => {
                assert!(path.ends_with("nope.cfg"));
                assert_eq!(included_from.as_deref(), Some(main.as_path()));
            }
            other => panic!("expected missing include, got {other:?}"),
        }
    }

    #[test]
    fn syntax_errors_carry_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write(dir.path(), "bad.cfg", "ok = 1\nx = y\n");
        let main = write(dir.path(), "main.cfg", "include('bad.cfg')\n");
        let err = load_flavor(&main).unwrap_err();
        match &err {
            FlavorError::Syntax { path, error } => {
                assert_eq!(path, &bad);
                assert_eq!(error.line, 2);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
        assert!(err.to_string().contains("bad.cfg"));
    }
}
