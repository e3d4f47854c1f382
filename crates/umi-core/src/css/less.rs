//! A LESS subset compiler.
//!
//! Supported: relative `@import` of `.less`/`.css` files, variables (global
//! scope, last definition wins, usable before definition), `@{var}`
//! interpolation, `~"..."` escapes and `//` line comments. Nesting is left
//! to lightningcss. Mixins, guards, operations and built-in functions are
//! not supported and pass through unchanged.

use super::CssError;
use regex_lite::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum depth of variables referring to other variables.
const MAX_VARIABLE_DEPTH: usize = 8;

struct Patterns {
    import: Regex,
    decl: Regex,
    usage: Regex,
    escape: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        import: Regex::new(r#"(?m)^\s*@import\s+(?:\([^)]*\)\s*)?['"]([^'"]+)['"]\s*;"#)
            .expect("static pattern"),
        decl: Regex::new(r"@([A-Za-z_][\w-]*)\s*:\s*([^;{}]+);").expect("static pattern"),
        usage: Regex::new(r"@\{([A-Za-z_][\w-]*)\}|@([A-Za-z_][\w-]*)").expect("static pattern"),
        escape: Regex::new(r#"~"([^"]*)"|~'([^']*)'"#).expect("static pattern"),
    })
}

/// Compile LESS source to CSS. `path` anchors relative imports.
pub fn compile_less(source: &str, path: Option<&Path>) -> Result<String, CssError> {
    let mut seen = HashSet::new();
    if let Some(path) = path {
        seen.insert(path.to_path_buf());
    }
    let inlined = inline_imports(source, path, &mut seen)?;
    let stripped = strip_line_comments(&inlined);
    let (body, variables) = extract_variables(&stripped);
    let resolved = resolve_variables(&variables)?;
    let css = substitute(&body, &resolved);
    Ok(unescape(&css))
}

fn inline_imports(
    source: &str,
    path: Option<&Path>,
    seen: &mut HashSet<PathBuf>,
) -> Result<String, CssError> {
    let base = path.and_then(Path::parent);

    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for caps in patterns().import.captures_iter(source) {
        let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&source[last..whole.start()]);
        last = whole.end();

        let spec = spec.as_str();
        let Some(target) = base.and_then(|b| resolve_import(b, spec)) else {
            // Package and url imports are left for the browser.
            out.push_str(whole.as_str());
            continue;
        };
        if !seen.insert(target.clone()) {
            continue;
        }
        let imported = std::fs::read_to_string(&target)
            .map_err(|e| CssError::Less(format!("{}: {e}", target.display())))?;
        out.push_str(&inline_imports(&imported, Some(&target), seen)?);
        out.push('\n');
    }
    out.push_str(&source[last..]);
    Ok(out)
}

fn resolve_import(base: &Path, spec: &str) -> Option<PathBuf> {
    if spec.starts_with("http:") || spec.starts_with("https:") || spec.starts_with('~') {
        return None;
    }
    let candidate = base.join(spec);
    if candidate.extension().is_some() {
        return candidate.is_file().then_some(candidate);
    }
    let with_ext = candidate.with_extension("less");
    with_ext.is_file().then_some(with_ext)
}

fn strip_line_comments(source: &str) -> String {
    source
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                return None;
            }
            match line.find(" //") {
                Some(idx) if !line.contains("://") => Some(&line[..idx]),
                _ => Some(line),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_variables(source: &str) -> (String, Vec<(String, String)>) {
    let mut variables = Vec::new();
    let body = patterns().decl.replace_all(source, |caps: &Captures| {
        variables.push((caps[1].to_string(), caps[2].trim().to_string()));
        String::new()
    });
    (body.into_owned(), variables)
}

fn resolve_variables(variables: &[(String, String)]) -> Result<HashMap<String, String>, CssError> {
    let mut resolved: HashMap<String, String> = variables.iter().cloned().collect();

    for _ in 0..MAX_VARIABLE_DEPTH {
        let snapshot = resolved.clone();
        let mut changed = false;
        for value in resolved.values_mut() {
            let next = substitute(value, &snapshot);
            if next != *value {
                *value = next;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // A cycle settles with its members still naming each other.
    let cyclic = variables
        .iter()
        .map(|(name, _)| name)
        .find(|name| resolved.get(*name).is_some_and(|v| references_variable(v, &resolved)));
    match cyclic {
        Some(name) => Err(CssError::Less(format!("variable @{name} is recursive"))),
        None => Ok(resolved),
    }
}

fn references_variable(text: &str, variables: &HashMap<String, String>) -> bool {
    patterns().usage.captures_iter(text).any(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .is_some_and(|m| variables.contains_key(m.as_str()))
    })
}

fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
    patterns()
        .usage
        .replace_all(text, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            // At-rules such as @media are not variables.
            variables
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn unescape(css: &str) -> String {
    patterns()
        .escape
        .replace_all(css, |caps: &Captures| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map_or_else(String::new, |m| m.as_str().to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_variables() {
        let css = compile_less("@color: red;\n.a { color: @color; }", None).unwrap();
        assert!(css.contains("color: red"));
        assert!(!css.contains('@'));
    }

    #[test]
    fn test_variable_used_before_definition_and_chained() {
        let less = ".a { color: @primary; }\n@base: #1890ff;\n@primary: @base;";
        let css = compile_less(less, None).unwrap();
        assert!(css.contains("color: #1890ff"));
    }

    #[test]
    fn test_last_definition_wins() {
        let css = compile_less("@w: 1px;\n@w: 2px;\n.a { width: @w; }", None).unwrap();
        assert!(css.contains("width: 2px"));
    }

    #[test]
    fn test_interpolation_and_at_rules() {
        let less = "@prefix: ant;\n@media (max-width: 100px) { .@{prefix}-btn { color: red; } }";
        let css = compile_less(less, None).unwrap();
        assert!(css.contains(".ant-btn"));
        assert!(css.contains("@media (max-width: 100px)"));
    }

    #[test]
    fn test_comments_and_escapes() {
        let less = "// header\n.a { width: ~\"calc(100% - 10px)\"; } // trailing\n.b { background: url(http://x/y.png); }";
        let css = compile_less(less, None).unwrap();
        assert!(!css.contains("header"));
        assert!(!css.contains("trailing"));
        assert!(css.contains("width: calc(100% - 10px)"));
        assert!(css.contains("url(http://x/y.png)"));
    }

    #[test]
    fn test_recursive_variable_is_an_error() {
        let err = compile_less("@a: @b;\n@b: @a;\n.x { color: @a; }", None).unwrap_err();
        assert!(err.to_string().contains("recursive"));
    }

    #[test]
    fn test_self_and_long_cycles_are_errors() {
        let err = compile_less("@a: 1px @a;\n.x { width: @a; }", None).unwrap_err();
        assert!(err.to_string().contains("@a is recursive"));

        let err = compile_less("@a: @b;\n@b: @c;\n@c: @a;\n.x { color: @a; }", None).unwrap_err();
        assert!(err.to_string().contains("recursive"));
    }

    #[test]
    fn test_at_rules_in_values_are_not_cycles() {
        let css = compile_less("@q: ~\"@media print\";\n.x { color: red; }", None).unwrap();
        assert!(css.contains("color: red"));
    }

    #[test]
    fn test_relative_imports() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("vars.less"), "@brand: #f00;").unwrap();
        let entry = dir.path().join("index.less");
        let less = "@import './vars';\n@import (reference) \"vars.less\";\n.t { color: @brand; }";

        let css = compile_less(less, Some(&entry)).unwrap();
        assert!(css.contains("color: #f00"));
        assert!(!css.contains("@import './vars'"));
    }

    #[test]
    fn test_package_imports_are_kept() {
        let css = compile_less("@import '~antd/es/style/themes/default.less';", None).unwrap();
        assert!(css.contains("@import '~antd"));
    }
}
