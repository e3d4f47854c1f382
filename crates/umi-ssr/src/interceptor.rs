//! Request Interceptor.
//!
//! Runs ahead of every other handler of the dev server. While the compiled
//! server module is missing it answers with a placeholder; once it exists the
//! request goes to the module's render handler, loaded through the
//! [`ModuleCache`]. Errors and panics from loading or rendering end as a
//! `500` and never propagate past this layer.

use crate::error::SsrError;
use crate::module_cache::ModuleCache;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, request::Parts, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Body of the placeholder response served while the module is compiling.
pub const COMPILING_PLACEHOLDER: &str = "umi.server.js is compiling ...";

/// Largest request body handed to the render handler.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Request as seen by a render handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub method: String,
    /// Path and query.
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl RenderRequest {
    fn from_parts(parts: &Parts, body: &Bytes) -> Self {
        let url = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self {
            method: parts.method.as_str().to_string(),
            url,
            headers,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// Response produced by a render handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl RenderResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

impl IntoResponse for RenderResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();
        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => warn!(header = %name, "Dropping invalid response header"),
            }
        }
        response
    }
}

/// What a render handler decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Response(RenderResponse),
    /// Pass the request on to the next handler.
    Next,
}

/// The default export of a loaded server module.
pub trait RenderHandler: Send + Sync {
    fn render<'a>(
        &'a self,
        request: &'a RenderRequest,
    ) -> BoxFuture<'a, Result<RenderOutcome, SsrError>>;
}

/// Loads the compiled server module into a render handler.
pub trait ModuleLoader: Send + Sync {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Arc<dyn RenderHandler>, SsrError>>;
}

/// Middleware state: where the module lives and how to load it.
pub struct RequestInterceptor {
    module_path: PathBuf,
    cache: Arc<ModuleCache>,
    loader: Arc<dyn ModuleLoader>,
}

impl RequestInterceptor {
    pub fn new(module_path: PathBuf, cache: Arc<ModuleCache>, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            module_path,
            cache,
            loader,
        }
    }

    #[must_use]
    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    /// Whether the compiled module is on disk.
    pub async fn is_ready(&self) -> bool {
        tokio::fs::try_exists(&self.module_path)
            .await
            .unwrap_or(false)
    }

    /// The cached handler, loading the module on a miss.
    pub async fn handler(&self) -> Result<Arc<dyn RenderHandler>, SsrError> {
        if let Some(handler) = self.cache.get(&self.module_path) {
            return Ok(handler);
        }
        let generation = self.cache.generation(&self.module_path);
        debug!(path = %self.module_path.display(), generation, "Loading server module");
        let handler = self.loader.load(&self.module_path).await?;
        // A rebuild that lands during the load leaves this handler uncached.
        self.cache
            .insert_if_current(self.module_path.clone(), generation, Arc::clone(&handler));
        Ok(handler)
    }

    /// Render one request, with panics turned into errors.
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, SsrError> {
        let attempt = async {
            let handler = self.handler().await?;
            handler.render(request).await
        };
        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(SsrError::Render(panic_message(panic.as_ref()))),
        }
    }
}

impl std::fmt::Debug for RequestInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestInterceptor")
            .field("module_path", &self.module_path)
            .finish_non_exhaustive()
    }
}

/// Axum middleware; install with `axum::middleware::from_fn_with_state`.
pub async fn intercept(
    State(interceptor): State<Arc<RequestInterceptor>>,
    request: Request,
    next: Next,
) -> Response {
    if !interceptor.is_ready().await {
        return placeholder();
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    let render_request = RenderRequest::from_parts(&parts, &bytes);
    match interceptor.render(&render_request).await {
        Ok(RenderOutcome::Response(response)) => response.into_response(),
        Ok(RenderOutcome::Next) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Err(e) => {
            error!(
                error = %e,
                method = %render_request.method,
                url = %render_request.url,
                "Server render failed"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

fn placeholder() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        COMPILING_PLACEHOLDER,
    )
        .into_response()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("render handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("render handler panicked: {s}")
    } else {
        "render handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_response_headers() {
        let response = RenderResponse::new(201, "created")
            .header("x-umi", "1")
            .header("bad header", "x")
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-umi"], "1");
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn test_invalid_status_is_server_error() {
        let response = RenderResponse::new(42, "").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(
            panic_message(payload.as_ref()),
            "render handler panicked: boom"
        );
    }
}
