//! CommonJS emission.
//!
//! Every module becomes a function in a registry, keyed by module id, and is
//! evaluated lazily on first `require`. ES module syntax is rewritten line by
//! line: imports become `require` calls against the registry, exports become
//! getters installed on the module's `exports` before its body runs.

use super::graph::{Dependency, ModuleGraph, ModuleId};
use super::scan::{code_line_starts, is_type_only};
use regex_lite::{Captures, Regex};
use std::fmt::Write;
use std::path::Path;
use std::sync::OnceLock;

const RUNTIME: &str = r#"var __umi_modules = {};
var __umi_cache = {};
function __umi_require(id) {
  if (typeof id === "string") return require(id);
  var cached = __umi_cache[id];
  if (cached) return cached.exports;
  var module = { exports: {} };
  Object.defineProperty(module.exports, "__esModule", { value: true });
  __umi_cache[id] = module;
  __umi_modules[id].call(module.exports, module, module.exports, __umi_require);
  return module.exports;
}
function __umi_export(target, getters) {
  for (var name in getters) {
    Object.defineProperty(target, name, { enumerable: true, configurable: true, get: getters[name] });
  }
}
function __umi_default(mod) {
  return mod && mod.__esModule ? mod.default : mod;
}
function __umi_star(mod) {
  if (mod && mod.__esModule) return mod;
  var ns = { default: mod };
  if (mod && typeof mod === "object") {
    for (var key in mod) if (key !== "default") ns[key] = mod[key];
  }
  return ns;
}
function __umi_reexport(target, source) {
  Object.keys(source).forEach(function (key) {
    if (key === "default" || Object.prototype.hasOwnProperty.call(target, key)) return;
    Object.defineProperty(target, key, { enumerable: true, get: function () { return source[key]; } });
  });
}
"#;

/// Emit the registry bundle. `module.exports` of the output is the entry's exports.
#[must_use]
pub fn emit_cjs(graph: &ModuleGraph, entry: ModuleId, cwd: &Path, banner: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(banner) = banner {
        out.push_str(banner);
        out.push('\n');
    }
    out.push_str("\"use strict\";\n");
    out.push_str(RUNTIME);

    for (id, module) in graph.iter() {
        let label = crate::paths::module_id(cwd, Path::new(&module.path));
        let _ = write!(
            out,
            "\n// {label}\n__umi_modules[{id}] = function (module, exports, require) {{\n{}}};\n",
            rewrite_module(graph, id, &module.code)
        );
    }

    let _ = write!(out, "\nmodule.exports = __umi_require({entry});\n");
    out
}

/// Per-module rewrite state.
struct Rewriter<'a> {
    graph: &'a ModuleGraph,
    id: ModuleId,
    /// (exported name, expression) pairs installed as getters.
    bindings: Vec<(String, String)>,
    temp: usize,
}

impl Rewriter<'_> {
    fn require(&self, specifier: &str) -> String {
        match self.graph.dependency(self.id, specifier) {
            Some(Dependency::Internal(id)) => format!("require({id})"),
            Some(Dependency::External(request)) => format!("require({})", js_string(request)),
            None => format!("require({})", js_string(specifier)),
        }
    }

    fn temp_name(&mut self) -> String {
        self.temp += 1;
        format!("__umi_m{}", self.temp)
    }

    fn bind(&mut self, exported: &str, expr: impl Into<String>) {
        self.bindings.push((exported.to_string(), expr.into()));
    }
}

fn rewrite_module(graph: &ModuleGraph, id: ModuleId, code: &str) -> String {
    let mut rw = Rewriter {
        graph,
        id,
        bindings: Vec::new(),
        temp: 0,
    };

    let mut body = String::with_capacity(code.len() + 128);
    let starts = code_line_starts(code);
    for (line, in_code) in code.lines().zip(starts) {
        if !in_code {
            // Template literal or comment text passes through untouched.
            body.push_str(line);
            body.push('\n');
            continue;
        }
        let trimmed = line.trim_start();
        let rewritten = if is_type_only(line) {
            String::new()
        } else if trimmed.starts_with("import ") || trimmed.starts_with("import{") {
            rewrite_import(&mut rw, trimmed)
        } else if trimmed.starts_with("export ") || trimmed.starts_with("export{") {
            rewrite_export(&mut rw, trimmed)
        } else {
            line.to_string()
        };
        body.push_str(&rewrite_inline_requires(&rw, &rewritten));
        body.push('\n');
    }

    if rw.bindings.is_empty() {
        return body;
    }
    let getters = rw
        .bindings
        .iter()
        .map(|(name, expr)| format!("{}: function () {{ return {expr}; }}", js_string(name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("__umi_export(exports, {{ {getters} }});\n{body}")
}

/// Split `<clause> from '<spec>'` into its parts.
fn split_from(rest: &str) -> Option<(&str, &str)> {
    let idx = rest.rfind(" from")?;
    let clause = rest[..idx].trim();
    let spec = rest[idx + 5..]
        .trim()
        .trim_end_matches(';')
        .trim()
        .trim_matches(|c| c == '\'' || c == '"');
    Some((clause, spec))
}

fn rewrite_import(rw: &mut Rewriter<'_>, line: &str) -> String {
    let rest = line["import".len()..].trim_start();

    if rest.starts_with('\'') || rest.starts_with('"') {
        let spec = rest.trim_end_matches(';').trim().trim_matches(|c| c == '\'' || c == '"');
        return format!("{};", rw.require(spec));
    }

    let Some((clause, spec)) = split_from(rest) else {
        return line.to_string();
    };
    let req = rw.require(spec);

    let (default, tail) = match clause.find(',') {
        Some(idx) if !clause.starts_with('{') => {
            (Some(clause[..idx].trim()), Some(clause[idx + 1..].trim()))
        }
        _ if clause.starts_with('{') || clause.starts_with('*') => (None, Some(clause)),
        _ => (Some(clause), None),
    };

    match (default, tail) {
        (Some(name), None) => format!("const {name} = __umi_default({req});"),
        (None, Some(tail)) => bind_import_tail(tail, &req),
        (Some(name), Some(tail)) => {
            let temp = rw.temp_name();
            format!(
                "const {temp} = {req}; const {name} = __umi_default({temp}); {}",
                bind_import_tail(tail, &temp)
            )
        }
        (None, None) => format!("{req};"),
    }
}

fn bind_import_tail(tail: &str, source: &str) -> String {
    if let Some(ns) = tail.strip_prefix('*') {
        let ns = ns.trim_start().trim_start_matches("as").trim();
        return format!("const {ns} = __umi_star({source});");
    }
    let inner = tail.trim_start_matches('{').trim_end_matches('}').trim();
    let pattern = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with("type "))
        .map(|s| s.replace(" as ", ": "))
        .collect::<Vec<_>>()
        .join(", ");
    format!("const {{ {pattern} }} = {source};")
}

/// Name declared right after `keyword` in `decl` (`function foo(`, `class Foo {`).
fn declared_name<'a>(decl: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = decl.strip_prefix(keyword)?;
    if !rest.starts_with(|c: char| c.is_whitespace() || c == '*') {
        return None;
    }
    let rest = rest.trim_start().trim_start_matches('*').trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(rest.len());
    let name = &rest[..end];
    (!name.is_empty() && name != "extends").then_some(name)
}

fn declaration_name(decl: &str) -> Option<&str> {
    declared_name(decl, "async function")
        .or_else(|| declared_name(decl, "function"))
        .or_else(|| declared_name(decl, "class"))
}

fn rewrite_export(rw: &mut Rewriter<'_>, line: &str) -> String {
    let rest = line["export".len()..].trim_start();

    if let Some(value) = rest.strip_prefix("default ") {
        let value = value.trim_start();
        if let Some(name) = declaration_name(value) {
            rw.bind("default", name);
            return value.to_string();
        }
        return format!("exports.default = {value}");
    }

    if rest.starts_with('*') {
        let Some((clause, spec)) = split_from(rest) else {
            return line.to_string();
        };
        let req = rw.require(spec);
        if let Some(ns) = clause.strip_prefix('*').map(str::trim).and_then(|c| c.strip_prefix("as ")) {
            let temp = rw.temp_name();
            rw.bind(ns.trim(), temp.clone());
            return format!("const {temp} = __umi_star({req});");
        }
        return format!("__umi_reexport(exports, {req});");
    }

    if rest.starts_with('{') {
        let (list, from) = match split_from(rest) {
            Some((clause, spec)) if rest.contains('}') && rest.rfind(" from") > rest.find('}') => {
                (clause, Some(spec))
            }
            _ => (rest.trim_end_matches(';').trim(), None),
        };
        let inner = list.trim_start_matches('{').trim_end_matches('}').trim();
        let source = from.map(|spec| (rw.temp_name(), rw.require(spec)));

        for item in inner.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (local, exported) = match item.split_once(" as ") {
                Some((l, e)) => (l.trim(), e.trim()),
                None => (item, item),
            };
            let expr = match &source {
                Some((temp, _)) if local == "default" => format!("__umi_default({temp})"),
                Some((temp, _)) => format!("{temp}.{local}"),
                None => local.to_string(),
            };
            rw.bind(exported, expr);
        }
        return match source {
            Some((temp, req)) => format!("const {temp} = {req};"),
            None => String::new(),
        };
    }

    for keyword in ["const ", "let ", "var "] {
        if let Some(decl) = rest.strip_prefix(keyword) {
            for name in declared_bindings(decl) {
                rw.bind(&name, name.clone());
            }
            return rest.to_string();
        }
    }

    if let Some(name) = declaration_name(rest) {
        rw.bind(name, name);
        return rest.to_string();
    }

    line.to_string()
}

/// Names bound by a `const`/`let`/`var` declarator list head.
fn declared_bindings(decl: &str) -> Vec<String> {
    let decl = decl.trim_start();
    if decl.starts_with('{') || decl.starts_with('[') {
        let close = if decl.starts_with('{') { '}' } else { ']' };
        let end = decl.find(close).unwrap_or(decl.len());
        return decl[1..end]
            .split(',')
            .filter_map(|part| {
                let part = part.trim().trim_start_matches("...");
                let local = part.rsplit(':').next()?.split('=').next()?.trim();
                (!local.is_empty()).then(|| local.to_string())
            })
            .collect();
    }

    let mut names = Vec::new();
    let mut depth = 0i32;
    let mut at_name = true;
    let mut current = String::new();
    for c in decl.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                at_name = true;
                continue;
            }
            _ => {}
        }
        if at_name && depth == 0 {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                current.push(c);
                continue;
            }
            if c.is_whitespace() && current.is_empty() {
                continue;
            }
            if !current.is_empty() {
                names.push(std::mem::take(&mut current));
            }
            at_name = false;
        }
    }
    if !current.is_empty() {
        names.push(current);
    }
    names
}

fn inline_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).expect("static pattern"),
            Regex::new(r#"\bimport\(\s*['"]([^'"]+)['"]\s*\)"#).expect("static pattern"),
        )
    })
}

/// Point `require('x')` and `import('x')` at the registry.
fn rewrite_inline_requires(rw: &Rewriter<'_>, line: &str) -> String {
    if !line.contains("require(") && !line.contains("import(") {
        return line.to_string();
    }
    let (require_re, dynamic_re) = inline_patterns();
    let line = require_re.replace_all(line, |caps: &Captures| rw.require(&caps[1]));
    dynamic_re
        .replace_all(&line, |caps: &Captures| {
            format!(
                "Promise.resolve().then(function () {{ return __umi_star({}); }})",
                rw.require(&caps[1])
            )
        })
        .into_owned()
}

fn js_string(s: &str) -> String {
    crate::css::js_string(s)
}
