//! `umi build` command implementation.
//!
//! Runs after (or, with `--client-cmd`, drives) the production client build
//! and compiles the server render module against its asset manifest.

use miette::{IntoDiagnostic, Result};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, info};
use umi_core::manifest::SessionKind;
use umi_core::{Config, Env, ManifestStore, UmiPaths};
use umi_ssr::{
    BuildCompletePayload, BuildEventCoordinator, BuildReport, CoordinatorPaths,
    ManualChangeSource, ModuleCache, ModuleCacheInvalidator, ServerBundleBuilder,
};

/// Build action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub config: Config,
    /// Client build command run through the shell before the server build.
    pub client_cmd: Option<String>,
}

pub async fn run(action: BuildAction) -> Result<()> {
    let cwd = &action.config.cwd;
    let json = action.config.json_logs;

    let err = match &action.client_cmd {
        Some(cmd) => run_client_build(cmd, cwd).await?,
        None => None,
    };

    let user = super::project_config(cwd)?;
    if !user.ssr_enabled() {
        if let Some(err) = err {
            return Err(miette::miette!("client build failed: {err}"));
        }
        info!("SSR disabled, nothing to build");
        if json {
            println!("{}", serde_json::json!({ "ok": true, "ssr": false }));
        } else {
            println!("  SSR disabled, skipped server build");
        }
        return Ok(());
    }

    let paths = UmiPaths::new(cwd, Env::Production, &user);
    let cache = Arc::new(ModuleCache::new());
    // Production builds run once and never watch.
    let coordinator = BuildEventCoordinator::new(
        Arc::new(ManifestStore::new(SessionKind::Production)),
        Arc::new(ServerBundleBuilder::new(&paths, &user)),
        ModuleCacheInvalidator::new(cache),
        Arc::new(ManualChangeSource::new()),
        CoordinatorPaths {
            cache: paths.manifest_cache(),
            production_manifests: paths.manifest_candidates(&user),
        },
    );

    let report = coordinator
        .on_build_complete(BuildCompletePayload {
            err,
            css: None,
            assets: None,
        })
        .await
        .into_diagnostic()?;

    print_report(&report, &paths, json);
    Ok(())
}

/// Run the client build. `Ok(Some(message))` when it ran and failed.
async fn run_client_build(cmd: &str, cwd: &Path) -> Result<Option<String>> {
    let (shell, shell_arg) = if cfg!(windows) {
        ("cmd.exe", "/C")
    } else {
        ("sh", "-c")
    };
    debug!(cmd, "Running client build");

    // Client output goes to stderr so stdout stays machine-readable.
    let status = tokio::process::Command::new(shell)
        .arg(shell_arg)
        .arg(cmd)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(std::io::stderr())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .status()
        .await
        .into_diagnostic()?;

    if status.success() {
        Ok(None)
    } else {
        Ok(Some(format!("`{cmd}` exited with {status}")))
    }
}

fn print_report(report: &BuildReport, paths: &UmiPaths, json: bool) {
    let path = report.written.path();
    let display = path.strip_prefix(&paths.cwd).unwrap_or(path);
    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "ssr": true,
                "session": report.session.to_string(),
                "path": path.display().to_string(),
                "stylesheet": report.written.stylesheet().map(|p| p.display().to_string()),
                "digest": report.written.digest(),
                "modules": report.modules,
                "duration_ms": report.duration.as_millis() as u64,
            })
        );
    } else {
        println!(
            "  Built {} ({} modules) in {}ms",
            display.display(),
            report.modules,
            report.duration.as_millis()
        );
    }
}
