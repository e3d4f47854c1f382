//! Stylesheet processing for the server bundle.
//!
//! Every style module ends up as plain CSS text: LESS goes through the
//! subset compiler in [`less`], Sass through grass, and the result through
//! lightningcss (nesting lowering, prefixes, CSS Modules scoping).

pub mod less;
pub mod sass;

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Class name pattern for CSS Modules, matching umi's client build.
const CSS_MODULES_PATTERN: &str = "[local]___[hash]";

/// Source language of a style module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleLang {
    Css,
    Less,
    Sass,
}

impl StyleLang {
    /// Detect the language from the file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "css" => Some(Self::Css),
            "less" => Some(Self::Less),
            "scss" | "sass" => Some(Self::Sass),
            _ => None,
        }
    }
}

/// Whether `path` is a CSS Module (`*.module.css`, `*.module.less`, ...).
#[must_use]
pub fn is_css_module(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(".module."))
}

/// CSS processing options.
#[derive(Debug, Clone, Default)]
pub struct CssOptions {
    /// Enable minification.
    pub minify: bool,
    /// Enable CSS Modules (returns class name mappings).
    pub css_modules: bool,
    /// Source file path (for error messages and CSS Modules hashing).
    pub filename: Option<String>,
    /// Browser targets; nesting and prefixes are lowered for these.
    pub targets: Option<Browsers>,
}

/// Result of CSS processing.
#[derive(Debug, Clone, Default)]
pub struct CssResult {
    /// The transformed CSS code.
    pub code: String,
    /// CSS Modules exports (original name → scoped name), sorted by name.
    pub exports: BTreeMap<String, String>,
}

/// Style processing error.
#[derive(Debug, Error)]
pub enum CssError {
    #[error("CSS parse error: {0}")]
    Parse(String),
    #[error("CSS transform error: {0}")]
    Transform(String),
    #[error("CSS print error: {0}")]
    Print(String),
    #[error("LESS error: {0}")]
    Less(String),
    #[error("Sass error: {0}")]
    Sass(String),
}

/// Process CSS with lightningcss.
pub fn process_css(source: &str, options: &CssOptions) -> Result<CssResult, CssError> {
    let filename = options.filename.clone().unwrap_or_else(|| "input.css".to_string());

    let mut parser_options = ParserOptions {
        filename: filename.clone(),
        ..ParserOptions::default()
    };
    if options.css_modules {
        parser_options.css_modules = Some(lightningcss::css_modules::Config {
            pattern: lightningcss::css_modules::Pattern::parse(CSS_MODULES_PATTERN)
                .map_err(|e| CssError::Parse(format!("CSS Modules pattern error: {e}")))?,
            ..Default::default()
        });
    }

    let mut stylesheet = StyleSheet::parse(source, parser_options)
        .map_err(|e| CssError::Parse(format!("{filename}: {e}")))?;

    let targets = Targets::from(options.targets.unwrap_or_else(default_browser_targets));

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..Default::default()
        })
        .map_err(|e| CssError::Transform(format!("{filename}: {e}")))?;

    let output = stylesheet
        .to_css(PrinterOptions {
            minify: options.minify,
            targets,
            ..Default::default()
        })
        .map_err(|e| CssError::Print(format!("{filename}: {e}")))?;

    let exports = output
        .exports
        .map(|exports| {
            exports
                .iter()
                .map(|(k, v)| (k.to_string(), v.name.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Ok(CssResult {
        code: output.code,
        exports,
    })
}

/// Compile a style module of any supported language to CSS.
///
/// `path` selects the preprocessor and CSS Modules mode and resolves
/// relative imports.
pub fn compile_style(path: &Path, source: &str, minify: bool) -> Result<CssResult, CssError> {
    let lang = StyleLang::from_path(path).unwrap_or(StyleLang::Css);
    let css = match lang {
        StyleLang::Css => source.to_string(),
        StyleLang::Less => less::compile_less(source, Some(path))?,
        StyleLang::Sass => sass::compile_sass(
            source,
            &sass::SassOptions {
                filename: Some(path.display().to_string()),
                ..Default::default()
            },
        )?,
    };

    process_css(
        &css,
        &CssOptions {
            minify,
            css_modules: is_css_module(path),
            filename: Some(path.display().to_string()),
            targets: None,
        },
    )
}

/// Server-side JS for a style module: a default export of the class map.
#[must_use]
pub fn style_module_js(exports: &BTreeMap<String, String>) -> String {
    if exports.is_empty() {
        return "export default {};\n".to_string();
    }
    let entries = exports
        .iter()
        .map(|(k, v)| format!("  {}: {}", js_string(k), js_string(v)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("export default {{\n{entries}\n}};\n")
}

/// Quote `s` as a JS string literal.
#[must_use]
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Browsers the server-rendered CSS is lowered for.
fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ..Default::default()
    }
}
