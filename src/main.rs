mod cache;
mod calc;
mod config;
mod db;
mod ipc;
mod remediation;
mod store;
mod tenant;

use std::io::{self, BufRead, Write};

use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let config = match config::GuardConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("schoold: invalid configuration: {e:#}");
            std::process::exit(1);
        }
    };

    // stdout carries IPC responses only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .with_writer(io::stderr)
        .json()
        .init();
    info!(version = env!("CARGO_PKG_VERSION"), "schoold starting");

    let mut state = ipc::AppState::new(config);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!(error = %e, "unparseable request line");
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
