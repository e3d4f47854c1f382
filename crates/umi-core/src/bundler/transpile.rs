//! TypeScript/JSX to JavaScript transpilation.
//!
//! The bundler only needs ES modules without types or JSX; import/export
//! rewriting happens later in [`super::emit`]. With the `swc` feature the
//! transpiler is SWC. Without it, plain JavaScript passes through untouched
//! and TypeScript or JSX sources are rejected.

use std::path::Path;
use thiserror::Error;

/// Transpilation failure.
#[derive(Debug, Error)]
#[error("{path}: {message}")]
pub struct TranspileError {
    pub path: String,
    pub message: String,
}

/// Turns a script module into plain ES module JavaScript.
pub trait Transpiler: Send + Sync {
    fn name(&self) -> &'static str;

    fn transpile(&self, path: &Path, source: &str) -> Result<String, TranspileError>;
}

/// Returns JavaScript sources unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranspiler;

impl Transpiler for PassthroughTranspiler {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn transpile(&self, path: &Path, source: &str) -> Result<String, TranspileError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("js");
        if matches!(ext, "ts" | "tsx" | "mts" | "cts" | "jsx") {
            return Err(TranspileError {
                path: path.display().to_string(),
                message: "TypeScript and JSX need the `swc` feature".to_string(),
            });
        }
        Ok(source.to_string())
    }
}

/// The best transpiler compiled into this build.
#[must_use]
pub fn default_transpiler() -> Box<dyn Transpiler> {
    #[cfg(feature = "swc")]
    {
        Box::new(SwcTranspiler)
    }
    #[cfg(not(feature = "swc"))]
    {
        Box::new(PassthroughTranspiler)
    }
}

/// SWC: strips TypeScript and compiles JSX with the automatic React runtime.
#[cfg(feature = "swc")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SwcTranspiler;

#[cfg(feature = "swc")]
impl Transpiler for SwcTranspiler {
    fn name(&self) -> &'static str {
        "swc"
    }

    #[allow(clippy::default_trait_access)]
    fn transpile(&self, path: &Path, source: &str) -> Result<String, TranspileError> {
        use swc_common::{comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceMap, GLOBALS};
        use swc_ecma_ast::{EsVersion, Program};
        use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
        use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
        use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
        use swc_ecma_transforms_react::{react, Options as ReactOptions, Runtime};
        use swc_ecma_transforms_typescript::strip;
        use swc_ecma_visit::FoldWith;

        let fail = |message: String| TranspileError {
            path: path.display().to_string(),
            message,
        };

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("js");
        let is_ts = matches!(ext, "ts" | "tsx" | "mts" | "cts");
        let is_jsx = matches!(ext, "tsx" | "jsx");

        let cm: Lrc<SourceMap> = Default::default();
        let fm = cm.new_source_file(
            Lrc::new(FileName::Custom(path.display().to_string())),
            source.to_string(),
        );
        let syntax = if is_ts {
            Syntax::Typescript(TsSyntax {
                tsx: is_jsx,
                decorators: true,
                ..Default::default()
            })
        } else {
            Syntax::Es(EsSyntax {
                jsx: is_jsx || ext == "js",
                decorators: true,
                ..Default::default()
            })
        };

        let comments = SingleThreadedComments::default();
        let lexer = Lexer::new(syntax, EsVersion::EsNext, StringInput::from(&*fm), Some(&comments));
        let mut parser = Parser::new_from(lexer);
        let module = parser
            .parse_module()
            .map_err(|e| fail(format!("parse error: {:?}", e.kind())))?;
        let errors: Vec<String> = parser
            .take_errors()
            .into_iter()
            .map(|e| format!("{:?}", e.kind()))
            .collect();
        if !errors.is_empty() {
            return Err(fail(format!("parse error: {}", errors.join(", "))));
        }

        let module = GLOBALS.set(&Globals::default(), || {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();

            let mut program = Program::Module(module);
            program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, is_ts));
            if is_ts {
                program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));
            }
            if is_jsx || ext == "js" {
                program = program.fold_with(&mut react(
                    cm.clone(),
                    Some(&comments),
                    ReactOptions {
                        runtime: Some(Runtime::Automatic),
                        import_source: Some("react".to_string()),
                        ..Default::default()
                    },
                    top_level_mark,
                    unresolved_mark,
                ));
            }
            program = program.fold_with(&mut hygiene());
            program = program.fold_with(&mut fixer(Some(&comments)));
            match program {
                Program::Module(m) => m,
                Program::Script(s) => swc_ecma_ast::Module {
                    span: s.span,
                    body: s.body.into_iter().map(swc_ecma_ast::ModuleItem::Stmt).collect(),
                    shebang: s.shebang,
                },
            }
        });

        let mut buf = Vec::new();
        {
            let mut emitter = Emitter {
                cfg: swc_ecma_codegen::Config::default().with_target(EsVersion::EsNext),
                cm: cm.clone(),
                comments: Some(&comments),
                wr: JsWriter::new(cm.clone(), "\n", &mut buf, None),
            };
            emitter
                .emit_module(&module)
                .map_err(|e| fail(format!("emit error: {e}")))?;
        }
        String::from_utf8(buf).map_err(|e| fail(format!("invalid UTF-8 output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let out = PassthroughTranspiler
            .transpile(Path::new("a.js"), "export default 1;")
            .unwrap();
        assert_eq!(out, "export default 1;");
    }

    #[test]
    fn test_passthrough_rejects_typescript_and_jsx() {
        for name in ["server.ts", "App.tsx", "lib.mts", "Button.jsx"] {
            let err = PassthroughTranspiler
                .transpile(Path::new(name), "export default 1;")
                .unwrap_err();
            assert!(err.to_string().contains(name));
            assert!(err.message.contains("swc"));
        }
    }

    #[cfg(feature = "swc")]
    #[test]
    fn test_swc_strips_types_and_jsx() {
        let src = "import React from 'react';\ninterface P { n: number }\nexport default function App(p: P) { return <div>{p.n}</div>; }\n";
        let out = SwcTranspiler.transpile(Path::new("App.tsx"), src).unwrap();
        assert!(!out.contains("interface"));
        assert!(out.contains("react/jsx-runtime"));
        assert!(out.contains("export default function App"));
    }

    #[cfg(feature = "swc")]
    #[test]
    fn test_swc_reports_parse_errors() {
        let err = SwcTranspiler
            .transpile(Path::new("broken.ts"), "export const = ;")
            .unwrap_err();
        assert!(err.to_string().contains("broken.ts"));
    }
}
