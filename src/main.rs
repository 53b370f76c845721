// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use netconfd_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    server::{event_loop, state::ServerState},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Exit codes: 0 clean shutdown, 1 fatal init error, 2 fatal runtime error.
#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let mut args = std::env::args().skip(1);
    let config_path = args.next();
    let logger_path = args
        .next()
        .unwrap_or_else(|| "config_logger.yaml".to_string());

    // Logging first; a broken logger profile falls back to plain stderr.
    let _log_guard = match init_logger(&logger_path) {
        Ok(g) => Some(g),
        Err(e) => {
            let _ = tracing_subscriber::fmt().with_writer(std::io::stderr).try_init();
            tracing::warn!(error = %e, "logger profile unusable, using stderr");
            None
        },
    };

    let state = match init_state(config_path.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %format!("{e:#}"), "initialization failed");
            return 1;
        },
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    match event_loop::run(state, cancel).await {
        Ok(()) => {
            info!("clean shutdown");
            0
        },
        Err(e) => {
            error!(error = %format!("{e:#}"), "runtime failure");
            2
        },
    }
}

fn init_state(config_path: Option<&str>) -> Result<ServerState> {
    let cfg = match config_path {
        Some(p) => {
            let path = resolve_config_path(p)?;
            Config::load_from_file(&path)
                .with_context(|| format!("loading profile {}", path.display()))?
        },
        None => Config::default(),
    };
    info!(socket = %cfg.transport.socket_path.display(), "profile ready");
    ServerState::new(cfg)
}
