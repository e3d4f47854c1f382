//! Integration tests for `umi dev`.
//!
//! These spawn the dev server on a free port and talk to it over HTTP.

use serial_test::serial;
use std::fs;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Kills the server when the test ends, pass or fail.
struct DevServer {
    child: Child,
    base: String,
}

impl Drop for DevServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn start(cwd: &Path) -> DevServer {
    let port = free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_umi"))
        .arg("--cwd")
        .arg(cwd)
        .args(["dev", "--host", "127.0.0.1", "--port", &port.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start umi dev");
    let server = DevServer {
        child,
        base: format!("http://127.0.0.1:{port}"),
    };

    for _ in 0..100 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return server;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("umi dev did not start listening on {port}");
}

#[tokio::test]
#[serial]
async fn test_dev_serves_static_output_without_ssr() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("dist")).unwrap();
    fs::write(dir.path().join("dist/index.html"), "<h1>client</h1>").unwrap();

    let server = start(dir.path()).await;
    let body = reqwest::get(format!("{}/index.html", server.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "<h1>client</h1>");
}

#[tokio::test]
#[serial]
async fn test_dev_answers_placeholder_until_module_exists() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(".umirc.json"), r#"{ "ssr": {} }"#).unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();

    // No generated entry yet, so the first build fails and nothing is written.
    let server = start(dir.path()).await;
    let response = reqwest::get(format!("{}/about", server.base)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "umi.server.js is compiling ...");
}
