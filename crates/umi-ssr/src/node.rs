//! Module loader that renders through a Node.js child process.
//!
//! The module source is read once at load time, so a cached handler keeps
//! rendering the version it loaded until the cache entry is invalidated.

use crate::error::SsrError;
use crate::interceptor::{ModuleLoader, RenderHandler, RenderOutcome, RenderRequest, RenderResponse};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runner script evaluated by `node -e`.
const RUNNER_JS: &str = include_str!("node_runner.cjs");

/// Marks the runner's result line among anything else the module prints.
const RESULT_PREFIX: &str = "@@umi-render@@ ";

/// Loads server modules for rendering with `node`.
#[derive(Debug, Clone)]
pub struct NodeModuleLoader {
    node: PathBuf,
}

impl Default for NodeModuleLoader {
    fn default() -> Self {
        Self {
            node: PathBuf::from("node"),
        }
    }
}

impl NodeModuleLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific Node.js binary.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<PathBuf>) -> Self {
        self.node = node.into();
        self
    }
}

impl ModuleLoader for NodeModuleLoader {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Arc<dyn RenderHandler>, SsrError>> {
        Box::pin(async move {
            let source = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| SsrError::Load {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            debug!(path = %path.display(), bytes = source.len(), "Server module loaded");
            let handler: Arc<dyn RenderHandler> = Arc::new(NodeRenderHandler {
                node: self.node.clone(),
                filename: path.to_path_buf(),
                source: Arc::new(source),
            });
            Ok(handler)
        })
    }
}

/// A loaded module; each render runs it in a fresh `node` process.
#[derive(Debug)]
pub struct NodeRenderHandler {
    node: PathBuf,
    filename: PathBuf,
    source: Arc<String>,
}

#[derive(Serialize)]
struct RunnerInput<'a> {
    filename: String,
    source: &'a str,
    request: &'a RenderRequest,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RunnerOutput {
    Error { error: String },
    Next { next: bool },
    Response(RenderResponse),
}

impl NodeRenderHandler {
    async fn run(&self, request: &RenderRequest) -> Result<RenderOutcome, SsrError> {
        let input = serde_json::to_vec(&RunnerInput {
            filename: self.filename.display().to_string(),
            source: &self.source,
            request,
        })
        .map_err(|e| SsrError::Render(e.to_string()))?;

        let cwd = self.filename.parent().unwrap_or_else(|| Path::new("."));
        let mut child = Command::new(&self.node)
            .arg("-e")
            .arg(RUNNER_JS)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SsrError::Render(format!("failed to start {}: {e}", self.node.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SsrError::Render("failed to capture stdin".to_string()))?;
        stdin
            .write_all(&input)
            .await
            .map_err(|e| SsrError::Render(e.to_string()))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SsrError::Render(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix(RESULT_PREFIX))
        else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SsrError::Render(format!(
                "node exited with {} and no response: {}",
                output.status,
                stderr.trim()
            )));
        };
        parse_runner_output(line)
    }
}

impl RenderHandler for NodeRenderHandler {
    fn render<'a>(
        &'a self,
        request: &'a RenderRequest,
    ) -> BoxFuture<'a, Result<RenderOutcome, SsrError>> {
        Box::pin(self.run(request))
    }
}

fn parse_runner_output(line: &str) -> Result<RenderOutcome, SsrError> {
    let output: RunnerOutput = serde_json::from_str(line)
        .map_err(|e| SsrError::Render(format!("unreadable runner output: {e}")))?;
    match output {
        RunnerOutput::Error { error } => Err(SsrError::Render(error)),
        RunnerOutput::Next { .. } => Ok(RenderOutcome::Next),
        RunnerOutput::Response(response) => Ok(RenderOutcome::Response(response)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WrittenModule;

    #[test]
    fn test_parse_runner_output() {
        assert_eq!(
            parse_runner_output(r#"{"next":true}"#).unwrap(),
            RenderOutcome::Next
        );
        assert_eq!(
            parse_runner_output(r#"{"status":200,"headers":{"content-type":"text/html"},"body":"<h1>hi</h1>"}"#)
                .unwrap(),
            RenderOutcome::Response(
                RenderResponse::new(200, "<h1>hi</h1>").header("content-type", "text/html")
            )
        );
        let err = parse_runner_output(r#"{"error":"TypeError: x is not a function"}"#).unwrap_err();
        assert!(err.to_string().contains("TypeError"));
        assert!(parse_runner_output("not json").is_err());
    }

    #[tokio::test]
    async fn test_load_reads_source_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("umi.server.js");
        std::fs::write(&path, "module.exports = 1;").unwrap();

        let loader = NodeModuleLoader::new();
        let _handler = loader.load(&path).await.unwrap();

        let missing = loader.load(&dir.path().join("nope.js")).await;
        assert!(matches!(missing, Err(SsrError::Load { .. })));
    }

    #[tokio::test]
    async fn test_missing_node_binary_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("umi.server.js");
        std::fs::write(&path, "module.exports = () => {};").unwrap();

        let loader = NodeModuleLoader::new().with_node(dir.path().join("no-such-node"));
        let handler = loader.load(&path).await.unwrap();
        let request = RenderRequest {
            method: "GET".to_string(),
            url: "/".to_string(),
            headers: std::collections::BTreeMap::new(),
            body: String::new(),
        };
        let err = handler.render(&request).await.unwrap_err();
        assert!(matches!(err, SsrError::Render(msg) if msg.contains("failed to start")));
    }

    fn node_available() -> bool {
        std::process::Command::new("node")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn get(url: &str) -> RenderRequest {
        RenderRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: std::collections::BTreeMap::new(),
            body: String::new(),
        }
    }

    #[test]
    fn test_runner_uses_result_prefix() {
        assert!(RUNNER_JS.contains(&format!("const RESULT_PREFIX = '{RESULT_PREFIX}';")));
    }

    #[tokio::test]
    async fn test_renders_bundled_module() {
        if !node_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        std::fs::write(root.join("title.js"), "export const title = 'OK';\n").unwrap();
        std::fs::write(
            root.join("server.js"),
            "import { title } from './title';\n\
             export default function render(req, res) {\n\
               res.setHeader('Content-Type', 'text/plain');\n\
               res.end(title + ' ' + req.url);\n\
             }\n",
        )
        .unwrap();
        let bundle = umi_core::bundler::Bundler::new(&root)
            .with_transpiler(Box::new(umi_core::bundler::PassthroughTranspiler))
            .bundle(&root.join("server.js"), &umi_core::bundler::BundleOptions::default())
            .unwrap();
        let module = root.join("server/umi.server.js");
        WrittenModule::commit(&module, bundle.code.as_bytes()).unwrap();

        let handler = NodeModuleLoader::new().load(&module).await.unwrap();
        assert_eq!(
            handler.render(&get("/users")).await.unwrap(),
            RenderOutcome::Response(
                RenderResponse::new(200, "OK /users").header("content-type", "text/plain")
            )
        );
    }

    #[tokio::test]
    async fn test_module_logging_does_not_break_the_response() {
        if !node_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("umi.server.js");
        std::fs::write(
            &path,
            "module.exports = (req, res) => {\n\
               console.log('rendering', req.url);\n\
               res.end('OK');\n\
               console.log('done');\n\
               process.stdout.write('raw output\\n');\n\
             };\n",
        )
        .unwrap();

        let handler = NodeModuleLoader::new().load(&path).await.unwrap();
        assert_eq!(
            handler.render(&get("/")).await.unwrap(),
            RenderOutcome::Response(RenderResponse::new(200, "OK"))
        );
    }

    #[tokio::test]
    async fn test_next_and_thrown_errors() {
        if !node_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let next = dir.path().join("next.js");
        std::fs::write(&next, "module.exports = (req, res, next) => next();\n").unwrap();
        let throws = dir.path().join("throws.js");
        std::fs::write(&throws, "module.exports = () => { throw new Error('window is not defined'); };\n").unwrap();

        let loader = NodeModuleLoader::new();
        let handler = loader.load(&next).await.unwrap();
        assert_eq!(handler.render(&get("/")).await.unwrap(), RenderOutcome::Next);

        let handler = loader.load(&throws).await.unwrap();
        let err = handler.render(&get("/")).await.unwrap_err();
        assert!(err.to_string().contains("window is not defined"));
    }
}
