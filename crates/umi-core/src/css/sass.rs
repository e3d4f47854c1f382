//! Sass/SCSS preprocessing using grass.

use super::CssError;
use std::path::Path;

/// Sass compilation options.
#[derive(Debug, Clone, Default)]
pub struct SassOptions {
    /// Include paths for @import/@use resolution.
    pub include_paths: Vec<String>,
    /// Compressed output.
    pub minify: bool,
    /// Source file path; its directory is added as a load path.
    pub filename: Option<String>,
}

/// Compile Sass/SCSS to CSS.
pub fn compile_sass(source: &str, options: &SassOptions) -> Result<String, CssError> {
    let filename = options.filename.as_deref().unwrap_or("input.scss");
    let indented = Path::new(filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"));

    let mut grass_options = grass::Options::default()
        .style(if options.minify {
            grass::OutputStyle::Compressed
        } else {
            grass::OutputStyle::Expanded
        })
        .input_syntax(if indented {
            grass::InputSyntax::Sass
        } else {
            grass::InputSyntax::Scss
        });

    for path in &options.include_paths {
        grass_options = grass_options.load_path(path);
    }
    if let Some(parent) = Path::new(filename).parent() {
        grass_options = grass_options.load_path(parent);
    }

    grass::from_string(source.to_string(), &grass_options)
        .map_err(|e| CssError::Sass(format!("{filename}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scss_variables_and_nesting() {
        let scss = r"
            $primary: blue;
            .parent {
                .child { color: $primary; }
            }
        ";
        let css = compile_sass(scss, &SassOptions::default()).unwrap();
        assert!(css.contains(".parent .child"));
        assert!(css.contains("color: blue"));
    }

    #[test]
    fn test_indented_syntax() {
        let sass = ".box\n  width: 100px + 50px\n";
        let options = SassOptions {
            filename: Some("theme.sass".to_string()),
            ..Default::default()
        };
        let css = compile_sass(sass, &options).unwrap();
        assert!(css.contains("width: 150px"));
    }

    #[test]
    fn test_compile_error_names_file() {
        let options = SassOptions {
            filename: Some("broken.scss".to_string()),
            ..Default::default()
        };
        let err = compile_sass(".a { color: $missing; }", &options).unwrap_err();
        assert!(err.to_string().contains("broken.scss"));
    }
}
