//! File resolution for relative and absolute specifiers.
//!
//! Bare package specifiers are never resolved here: the server bundle runs
//! in Node.js, so packages stay runtime `require()` calls.

use std::path::{Path, PathBuf};

/// Extensions probed for extension-less specifiers, in priority order.
pub const RESOLVE_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js", "mjs", "cjs", "json"];

/// Extensions compiled as scripts.
pub const SCRIPT_EXTENSIONS: &[&str] = &["tsx", "ts", "mts", "cts", "jsx", "js", "mjs", "cjs"];

/// Whether `specifier` points into the file system rather than a package.
#[must_use]
pub fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || Path::new(specifier).is_absolute()
}

/// Whether `path` has a script extension.
#[must_use]
pub fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SCRIPT_EXTENSIONS.contains(&e))
}

/// Resolve a path specifier against the importer's directory.
///
/// Tries the exact file, then each extension in [`RESOLVE_EXTENSIONS`],
/// then `index.<ext>` inside a directory.
#[must_use]
pub fn resolve_file(specifier: &str, importer_dir: &Path) -> Option<PathBuf> {
    let base = if Path::new(specifier).is_absolute() {
        PathBuf::from(specifier)
    } else {
        importer_dir.join(specifier)
    };
    probe(&base)
}

/// Probe `base` with the resolution rules of [`resolve_file`].
#[must_use]
pub fn probe(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(normalize(base));
    }

    let file_name = base.file_name()?.to_string_lossy().into_owned();
    for ext in RESOLVE_EXTENSIONS {
        let candidate = base.with_file_name(format!("{file_name}.{ext}"));
        if candidate.is_file() {
            return Some(normalize(&candidate));
        }
    }

    if base.is_dir() {
        for ext in RESOLVE_EXTENSIONS {
            let candidate = base.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(normalize(&candidate));
            }
        }
    }
    None
}

fn normalize(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_path_specifiers() {
        assert!(is_path_specifier("./a"));
        assert!(is_path_specifier("../a"));
        assert!(!is_path_specifier("react"));
        assert!(!is_path_specifier("@umijs/max"));
    }

    #[test]
    fn test_resolve_exact_and_extensions() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("a.ts"), "").unwrap();
        fs::write(root.join("a.js"), "").unwrap();
        fs::write(root.join("logo.svg"), "").unwrap();

        assert_eq!(resolve_file("./a", &root), Some(root.join("a.ts")));
        assert_eq!(resolve_file("./a.js", &root), Some(root.join("a.js")));
        assert_eq!(resolve_file("./logo.svg", &root), Some(root.join("logo.svg")));
        assert_eq!(resolve_file("./missing", &root), None);
    }

    #[test]
    fn test_resolve_directory_index() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(root.join("pages/home")).unwrap();
        fs::write(root.join("pages/home/index.tsx"), "").unwrap();

        assert_eq!(
            resolve_file("./pages/home", &root),
            Some(root.join("pages/home/index.tsx"))
        );
    }

    #[test]
    fn test_dotted_names_probe_extensions() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("user.service.ts"), "").unwrap();

        assert_eq!(
            resolve_file("./user.service", &root),
            Some(root.join("user.service.ts"))
        );
    }
}
