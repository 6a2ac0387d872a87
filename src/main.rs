mod bot;
mod commands;
mod config;
mod dispatcher;
mod error;
mod keepalive;
mod mode;
mod platform;
mod polling;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppContext;
use crate::config::Config;
use crate::keepalive::{HttpProbe, Pinger};
use crate::platform::telegram::TelegramPlatform;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // An explicit path must exist; the default one is optional
    let (config_path, required) = match std::env::args().nth(1) {
        Some(path) => (PathBuf::from(path), true),
        None => (PathBuf::from("config.toml"), false),
    };

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path, required)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let mode = mode::select(&config).context("Invalid delivery configuration")?;

    info!("Configuration loaded successfully");
    info!("  Delivery mode: {}", mode);
    info!("  Listen address: {}", config.listen_addr());
    info!(
        "  Keepalive: {}",
        config.keepalive_url().unwrap_or("disabled")
    );
    info!(
        "  Max in-flight dispatches: {}",
        config.webhook.max_inflight_dispatches
    );

    let probe = Arc::new(HttpProbe::new(config.keepalive_timeout())?);
    let pinger = Pinger::new(
        config.keepalive_target(),
        config.keepalive_interval(),
        probe,
    );

    let platform = Arc::new(TelegramPlatform::new(
        config.bot_token(),
        config.poll_timeout(),
    )?);
    let ctx = Arc::new(AppContext::new(config, platform).context("Failed to register commands")?);
    info!("  Commands: {}", ctx.dispatcher.registry().len());

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));
    let keepalive = tokio::spawn(pinger.run(cancel.clone()));

    info!("Bot is starting...");
    let result = bot::run(ctx, mode, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = keepalive.await {
        warn!("Keepalive task ended abnormally: {}", e);
    }

    result
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => return,
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
