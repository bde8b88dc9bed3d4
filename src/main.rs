mod actor;
mod aggregate;
mod config;
mod db;
mod error;
mod events;
mod grading;
mod ipc;
mod pins;
mod records;
mod results;
mod sheets;
mod status;

use std::io::{self, BufRead, Write};

use serde_json::json;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::DaemonConfig;

/// stdout carries the protocol, so logs go to stderr.
fn init_tracing(config: &DaemonConfig) {
    let env_filter = config
        .log_filter
        .as_deref()
        .map(EnvFilter::try_new)
        .unwrap_or_else(|| EnvFilter::try_new("info"))
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(false)
                .with_target(true),
        )
        .with(env_filter)
        .init();
}

fn main() {
    let config = match DaemonConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("resultsd: invalid configuration: {e:#}");
            std::process::exit(2);
        }
    };
    init_tracing(&config);

    let mut state = ipc::AppState::new(config.busy_timeout);
    if let Some(path) = config.workspace.as_ref() {
        match db::open_db(path, config.busy_timeout) {
            Ok(conn) => {
                tracing::info!(workspace = %path.display(), "workspace opened from environment");
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            Err(e) => tracing::error!(workspace = %path.display(), error = %format!("{e:#}"), "could not open workspace"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed with error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No id to echo back.
                tracing::warn!(error = %e, "unparseable request line");
                json!({ "ok": false, "error": { "code": "bad_json", "message": e.to_string() } })
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::debug!("stdin closed; exiting");
}
