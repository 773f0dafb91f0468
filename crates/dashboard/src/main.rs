mod actions;
mod client;
mod config;
mod model;
mod poller;
mod reconciler;
mod schedule;
mod state;
mod view;
mod web;

use anyhow::{Context, Result};
use std::{env, path::Path, sync::Arc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use client::{DeviceClient, HttpDeviceClient};
use config::Config;
use state::DashboardState;
use web::AppState;

const DEFAULT_CONFIG_PATH: &str = "dashboard.toml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ── Config file + env overrides ─────────────────────────────────
    let mut cfg = load_config()?;
    if let Ok(url) = env::var("DEVICE_URL") {
        cfg.device_url = url;
        cfg.validate().context("invalid DEVICE_URL")?;
    }
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    info!(
        device = %cfg.device_url,
        full_sec = cfg.server_polling_interval_sec,
        status_sec = cfg.status_polling_interval_sec,
        "dashboard starting"
    );

    // ── Device client + shared state ────────────────────────────────
    let client: Arc<dyn DeviceClient> =
        Arc::new(HttpDeviceClient::new(&cfg.device_url, cfg.request_timeout())?);

    let shared = Arc::new(RwLock::new(DashboardState::new(&cfg)));
    {
        let mut st = shared.write().await;
        st.record_system(format!("dashboard started, device {}", cfg.device_url));
    }

    // ── Background tasks ────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let poller = poller::spawn(Arc::clone(&shared), Arc::clone(&client), cancel.clone());

    let app = AppState {
        shared: Arc::clone(&shared),
        client,
    };
    let web_cancel = cancel.clone();
    let web = tokio::spawn(async move {
        let res = web::serve(app, port, web_cancel.clone()).await;
        // A server that stops on its own takes the pollers down with it.
        web_cancel.cancel();
        res
    });

    // ── Run until Ctrl-C or the server dies ─────────────────────────
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    poller.shutdown().await;
    match web.await {
        Ok(res) => res?,
        Err(e) => warn!("web task ended abnormally: {e}"),
    }
    info!("dashboard stopped");
    Ok(())
}

/// `CONFIG_PATH` if set, else `dashboard.toml` when present, else defaults.
fn load_config() -> Result<Config> {
    match env::var("CONFIG_PATH") {
        Ok(path) => config::load(&path),
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => config::load(DEFAULT_CONFIG_PATH),
        Err(_) => {
            info!("no config file, using defaults");
            Ok(Config::default())
        }
    }
}
