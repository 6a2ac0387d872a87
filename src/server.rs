//! HTTP surface: liveness endpoints plus the secret-path webhook ingress.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bot::AppContext;
use crate::config::Config;
use crate::platform::telegram;

/// Header Telegram echoes the registered `secret_token` in.
const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Updates are small; anything past this is not one.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
struct ServerState {
    ctx: Arc<AppContext>,
    /// Bounds dispatch tasks spawned by the ingress.
    inflight: Arc<Semaphore>,
}

/// Constant-time string comparison so the secret cannot be probed by timing.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn rejected(status: StatusCode, error: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"success": false, "error": error})))
}

async fn home(State(state): State<ServerState>) -> String {
    state.ctx.config.server.banner.clone()
}

async fn ping() -> Json<Value> {
    Json(json!({"status": "alive", "bot": "running"}))
}

/// Accept one update and acknowledge it before the handler runs.
async fn receive_update(
    State(state): State<ServerState>,
    Path(secret): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let config = &state.ctx.config;

    if !constant_time_eq(&secret, config.webhook_path_secret()) {
        return rejected(StatusCode::NOT_FOUND, "not found");
    }

    if let Some(expected) = config.webhook_secret_token() {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !constant_time_eq(provided, expected) {
            warn!("Webhook request with missing or wrong secret token header");
            return rejected(StatusCode::UNAUTHORIZED, "invalid secret token");
        }
    }

    let update = match telegram::parse_update(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Dropping webhook request: {}", e);
            return rejected(StatusCode::BAD_REQUEST, "malformed update");
        }
    };

    // Telegram redelivers on non-2xx, so shedding load here loses nothing.
    let permit = match state.inflight.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!(
                "Dispatch capacity exhausted; asking the platform to redeliver update {}",
                update.id
            );
            return rejected(StatusCode::SERVICE_UNAVAILABLE, "busy");
        }
    };

    let ctx = state.ctx.clone();
    tokio::spawn(async move {
        let _permit = permit;
        ctx.dispatcher.relay(ctx.platform.as_ref(), update).await;
    });

    (StatusCode::OK, Json(json!({"success": true})))
}

/// Build the router. `webhook` mounts `POST /{secret}`.
pub fn build_router(ctx: Arc<AppContext>, webhook: bool) -> Router {
    let inflight = Arc::new(Semaphore::new(ctx.config.webhook.max_inflight_dispatches));
    let state = ServerState { ctx, inflight };

    let mut router = Router::new()
        .route("/", get(home))
        .route("/ping", get(ping));
    if webhook {
        router = router.route("/{secret}", post(receive_update));
    }
    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn bind(config: &Config) -> Result<TcpListener> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
    info!("HTTP server listening on {}", addr);
    Ok(listener)
}

/// Serve until `cancel` fires, then finish in-flight requests.
pub async fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("HTTP server error")?;
    info!("HTTP server stopped");
    Ok(())
}
