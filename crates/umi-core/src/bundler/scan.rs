//! Import discovery on transpiled module source.

use regex_lite::Regex;
use std::sync::OnceLock;

/// How a dependency is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import ... from`, `import '...'`, `export ... from`.
    Static,
    /// `import('...')`.
    Dynamic,
    /// `require('...')`.
    Require,
}

/// A dependency reference found in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub specifier: String,
    pub kind: ImportKind,
}

struct Patterns {
    from: Regex,
    bare: Regex,
    dynamic: Regex,
    require: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        from: Regex::new(r#"^\s*(?:import|export)\s[^'"]*?\bfrom\s*['"]([^'"]+)['"]"#)
            .expect("static pattern"),
        bare: Regex::new(r#"^\s*import\s*['"]([^'"]+)['"]"#)
            .expect("static pattern"),
        dynamic: Regex::new(r#"\bimport\(\s*['"]([^'"]+)['"]\s*\)"#)
            .expect("static pattern"),
        require: Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#)
            .expect("static pattern"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    Code,
    Template,
    BlockComment,
}

/// For each line of `source`, whether the line starts in code rather than
/// inside a template literal or block comment opened on an earlier line.
///
/// Quote strings end at the line break. Regex literals are recognised after
/// operators and opening punctuation, enough to skip quotes and backticks
/// inside them.
#[must_use]
pub fn code_line_starts(source: &str) -> Vec<bool> {
    let mut starts = Vec::new();
    let mut state = Lex::Code;
    // Brace depth inside each open `${` substitution.
    let mut substitutions: Vec<usize> = Vec::new();

    for line in source.lines() {
        starts.push(state == Lex::Code);
        let mut prev = None;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match state {
                Lex::BlockComment => {
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        state = Lex::Code;
                    }
                }
                Lex::Template => match c {
                    '\\' => {
                        chars.next();
                    }
                    '`' => {
                        state = Lex::Code;
                        prev = Some('`');
                    }
                    '$' if chars.peek() == Some(&'{') => {
                        chars.next();
                        substitutions.push(0);
                        state = Lex::Code;
                        prev = Some('{');
                    }
                    _ => {}
                },
                Lex::Code => {
                    match c {
                        '/' if chars.peek() == Some(&'/') => break,
                        '/' if chars.peek() == Some(&'*') => {
                            chars.next();
                            state = Lex::BlockComment;
                            continue;
                        }
                        '/' if prev.map_or(true, |p: char| "(,=:[!&|?{};+-*%<>~^".contains(p)) => {
                            skip_regex(&mut chars);
                        }
                        '\'' | '"' => skip_string(&mut chars, c),
                        '`' => state = Lex::Template,
                        '{' => {
                            if let Some(depth) = substitutions.last_mut() {
                                *depth += 1;
                            }
                        }
                        '}' => match substitutions.last_mut() {
                            Some(depth) if *depth == 0 => {
                                substitutions.pop();
                                state = Lex::Template;
                            }
                            Some(depth) => *depth -= 1,
                            None => {}
                        },
                        _ => {}
                    }
                    if !c.is_whitespace() {
                        prev = Some(c);
                    }
                }
            }
        }
    }
    starts
}

fn skip_string(chars: &mut impl Iterator<Item = char>, quote: char) {
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == quote {
            return;
        }
    }
}

fn skip_regex(chars: &mut impl Iterator<Item = char>) {
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => return,
            _ => {}
        }
    }
}

/// Join `import { ... }` / `export { ... }` lists spread over several lines.
#[must_use]
pub fn join_multiline_statements(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut pending: Option<String> = None;

    let starts = code_line_starts(source);
    for (line, in_code) in source.lines().zip(starts) {
        if let Some(mut acc) = pending.take() {
            acc.push(' ');
            acc.push_str(line.trim());
            if line.contains('}') {
                out.push_str(&acc);
                out.push('\n');
            } else {
                pending = Some(acc);
            }
            continue;
        }

        let trimmed = line.trim_start();
        let opens_list = in_code
            && (trimmed.starts_with("import ") || trimmed.starts_with("export {"))
            && trimmed.contains('{')
            && !trimmed.contains('}');
        if opens_list {
            pending = Some(line.trim_end().to_string());
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    if let Some(acc) = pending {
        out.push_str(&acc);
        out.push('\n');
    }
    out
}

/// Whether a line is a type-only import/export that emits nothing.
#[must_use]
pub fn is_type_only(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("import type ") || trimmed.starts_with("export type {")
}

/// Find every import in `source`, which must already be joined with
/// [`join_multiline_statements`]. Duplicates are kept once, first kind wins.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<Import> {
    let p = patterns();
    let mut imports: Vec<Import> = Vec::new();
    let mut push = |specifier: &str, kind: ImportKind| {
        if !imports.iter().any(|i| i.specifier == specifier) {
            imports.push(Import {
                specifier: specifier.to_string(),
                kind,
            });
        }
    };

    let starts = code_line_starts(source);
    for (line, in_code) in source.lines().zip(starts) {
        if !in_code || is_type_only(line) {
            continue;
        }
        if let Some(caps) = p.from.captures(line).or_else(|| p.bare.captures(line)) {
            push(&caps[1], ImportKind::Static);
        }
        for caps in p.dynamic.captures_iter(line) {
            push(&caps[1], ImportKind::Dynamic);
        }
        for caps in p.require.captures_iter(line) {
            push(&caps[1], ImportKind::Require);
        }
    }
    imports
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(source: &str) -> Vec<(String, ImportKind)> {
        scan_imports(&join_multiline_statements(source))
            .into_iter()
            .map(|i| (i.specifier, i.kind))
            .collect()
    }

    #[test]
    fn test_static_forms() {
        let src = r#"
import React from 'react';
import { a, b as c } from "./util";
import * as ns from './ns';
import './global.less';
export { x } from './x';
export * from './all';
"#;
        let found: Vec<String> = specs(src).into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            found,
            vec!["react", "./util", "./ns", "./global.less", "./x", "./all"]
        );
    }

    #[test]
    fn test_dynamic_and_require() {
        let src = "const p = import('./page');\nconst fs = require(\"fs\");";
        assert_eq!(
            specs(src),
            vec![
                ("./page".to_string(), ImportKind::Dynamic),
                ("fs".to_string(), ImportKind::Require),
            ]
        );
    }

    #[test]
    fn test_multiline_lists() {
        let src = "import {\n  useState,\n  useEffect,\n} from 'react';\nconst a = 1;";
        let joined = join_multiline_statements(src);
        assert!(joined.starts_with("import { useState, useEffect, } from 'react';"));
        assert_eq!(specs(src), vec![("react".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_type_only_imports_are_skipped() {
        assert!(specs("import type { Props } from './types';").is_empty());
    }

    #[test]
    fn test_duplicates_collapse() {
        let src = "import a from './a';\nimport { b } from './a';";
        assert_eq!(specs(src).len(), 1);
    }

    #[test]
    fn test_code_line_starts_tracks_templates_and_comments() {
        let src = "const t = `\nimport x from 'nowhere';\n`;\n/*\nexport default 1;\n*/\nconst u = `${a}`;\nimport y from './y';";
        assert_eq!(
            code_line_starts(src),
            vec![true, false, false, true, false, false, true, true]
        );
    }

    #[test]
    fn test_imports_inside_templates_and_comments_are_ignored() {
        let src = "const t = `\nimport x from 'nowhere';\n`;\n/* import z from 'gone'; */\n/*\nimport w from 'gone';\n*/\nimport y from './y';";
        assert_eq!(specs(src), vec![("./y".to_string(), ImportKind::Static)]);
    }

    #[test]
    fn test_substitution_with_nested_template_resumes_code() {
        let src = "const t = `a ${`b ${c}`} d`;\nimport y from './y';";
        assert_eq!(code_line_starts(src), vec![true, true]);
        assert_eq!(specs(src), vec![("./y".to_string(), ImportKind::Static)]);
    }
}
