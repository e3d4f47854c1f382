//! Request interception against a real axum server.

mod common;

use axum::{middleware, Router};
use common::{FakeBuild, FileLoader, GatedLoader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use umi_core::manifest::SessionKind;
use umi_core::paths::ManifestCachePaths;
use umi_core::ManifestStore;
use umi_ssr::{
    intercept, BuildEventCoordinator, CoordinatorPaths, DevCompilePayload, ManualChangeSource,
    ModuleCache, ModuleCacheInvalidator, RebuildEvent, RenderOutcome, RenderRequest,
    RenderResponse, RequestInterceptor, WrittenModule, COMPILING_PLACEHOLDER,
};

async fn serve(interceptor: Arc<RequestInterceptor>) -> String {
    let app = Router::new()
        .fallback(|| async { "downstream" })
        .layer(middleware::from_fn_with_state(interceptor, intercept));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn interceptor(module: &Path, cache: &Arc<ModuleCache>, loader: &Arc<FileLoader>) -> Arc<RequestInterceptor> {
    Arc::new(RequestInterceptor::new(
        module.to_path_buf(),
        Arc::clone(cache),
        loader.clone(),
    ))
}

fn module_path(dir: &TempDir) -> PathBuf {
    dir.path().join("server/umi.server.js")
}

fn write_module(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn missing_module_serves_placeholder() {
    let dir = TempDir::new().unwrap();
    let loader = FileLoader::new();
    let base = serve(interceptor(&module_path(&dir), &Arc::new(ModuleCache::new()), &loader)).await;

    let response = reqwest::get(format!("{base}/users")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(response.text().await.unwrap(), COMPILING_PLACEHOLDER);
    assert_eq!(loader.loads(), 0);
}

#[tokio::test]
async fn existing_module_response_is_returned_unchanged() {
    let dir = TempDir::new().unwrap();
    let module = module_path(&dir);
    write_module(&module, "OK");
    let loader = FileLoader::new();
    let base = serve(interceptor(&module, &Arc::new(ModuleCache::new()), &loader)).await;

    let response = reqwest::get(format!("{base}/users?id=1")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-url"], "/users?id=1");
    assert_eq!(response.text().await.unwrap(), "OK");

    // Cached after the first request.
    reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(loader.loads(), 1);
}

#[tokio::test]
async fn next_passes_request_on() {
    let dir = TempDir::new().unwrap();
    let module = module_path(&dir);
    write_module(&module, "next");
    let base = serve(interceptor(&module, &Arc::new(ModuleCache::new()), &FileLoader::new())).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/users"))
        .body("{\"name\":\"umi\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "downstream");
}

#[tokio::test]
async fn render_errors_become_server_errors() {
    let dir = TempDir::new().unwrap();
    let module = module_path(&dir);
    write_module(&module, "throw");
    let base = serve(interceptor(&module, &Arc::new(ModuleCache::new()), &FileLoader::new())).await;

    let response = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(response.status(), 500);

    // The server is still up.
    let again = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(again.status(), 500);
}

#[tokio::test]
async fn handler_panics_are_caught() {
    let dir = TempDir::new().unwrap();
    let module = module_path(&dir);
    write_module(&module, "panic");
    let base = serve(interceptor(&module, &Arc::new(ModuleCache::new()), &FileLoader::new())).await;

    let response = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn rebuild_serves_new_module_after_invalidation() {
    let dir = TempDir::new().unwrap();
    let module = module_path(&dir);
    let cache = Arc::new(ModuleCache::new());
    let loader = FileLoader::new();
    let changes = ManualChangeSource::new();
    let coordinator = BuildEventCoordinator::new(
        Arc::new(ManifestStore::new(SessionKind::Dev)),
        FakeBuild::new(module.clone()),
        ModuleCacheInvalidator::new(Arc::clone(&cache)),
        Arc::new(changes.clone()),
        CoordinatorPaths {
            cache: ManifestCachePaths {
                css: dir.path().join("cache/css.json"),
                assets: dir.path().join("cache/assets.json"),
            },
            production_manifests: Vec::new(),
        },
    );
    let mut events = coordinator.subscribe();
    let base = serve(interceptor(&module, &cache, &loader)).await;

    assert_eq!(
        reqwest::get(format!("{base}/")).await.unwrap().text().await.unwrap(),
        COMPILING_PLACEHOLDER
    );

    coordinator
        .on_dev_compile_done(DevCompilePayload::default())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        reqwest::get(format!("{base}/")).await.unwrap().text().await.unwrap(),
        "v1"
    );

    changes.emit(vec![dir.path().join("src/pages/index.tsx")]).await;
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, RebuildEvent::Ready { .. }));

    assert_eq!(
        reqwest::get(format!("{base}/")).await.unwrap().text().await.unwrap(),
        "v2"
    );
    assert_eq!(loader.loads(), 2);
}

#[tokio::test]
async fn load_overlapping_a_rebuild_does_not_pin_the_old_module() {
    let dir = TempDir::new().unwrap();
    let module = module_path(&dir);
    write_module(&module, "v1");
    let cache = Arc::new(ModuleCache::new());
    let loader = GatedLoader::new();
    let interceptor = Arc::new(RequestInterceptor::new(
        module.clone(),
        Arc::clone(&cache),
        loader.clone(),
    ));
    let request = RenderRequest {
        method: "GET".to_string(),
        url: "/".to_string(),
        headers: std::collections::BTreeMap::new(),
        body: String::new(),
    };
    let rendered = |body: &str| {
        RenderOutcome::Response(RenderResponse::new(200, body).header("x-url", "/"))
    };

    // The first request reads v1, then the rebuild lands before it caches.
    let first = tokio::spawn({
        let interceptor = Arc::clone(&interceptor);
        let request = request.clone();
        async move { interceptor.render(&request).await }
    });
    loader.wait_until_read().await;
    let written = WrittenModule::commit(&module, b"v2").unwrap();
    ModuleCacheInvalidator::new(Arc::clone(&cache)).invalidate(&written);
    loader.release();

    assert_eq!(first.await.unwrap().unwrap(), rendered("v1"));
    assert!(cache.is_empty());

    assert_eq!(interceptor.render(&request).await.unwrap(), rendered("v2"));
    assert_eq!(interceptor.render(&request).await.unwrap(), rendered("v2"));
    assert_eq!(loader.loads(), 2);
}
