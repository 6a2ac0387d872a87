//! Long-poll delivery, used when no webhook base URL is configured.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bot::AppContext;
use crate::platform::MAX_UPDATE_OFFSET;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Offset acknowledging `id`, or `None` when the platform cannot express it.
fn next_offset(id: i64) -> Option<i64> {
    id.checked_add(1).filter(|next| *next <= MAX_UPDATE_OFFSET)
}

/// Fetch and dispatch updates in arrival order until `cancel` fires.
///
/// Fails once an update id leaves no offset to acknowledge it with, since
/// every later fetch would return the same updates again.
pub async fn run(ctx: &AppContext, cancel: CancellationToken) -> Result<()> {
    // getUpdates is refused while a webhook is registered
    if let Err(e) = ctx.platform.remove_webhook().await {
        warn!("Could not remove webhook before polling: {:#}", e);
    }

    info!("Bot running in polling mode");

    let timeout = ctx.config.poll_timeout();
    let mut offset: Option<i64> = None;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = ctx.platform.fetch_updates(offset, timeout) => result,
        };

        let updates = match fetched {
            Ok(updates) => {
                backoff = INITIAL_BACKOFF;
                updates
            }
            Err(e) => {
                error!("Polling failed (retry in {:?}): {:#}", backoff, e);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        for update in updates {
            let id = update.id;
            let next = next_offset(id);
            if let Some(next) = next {
                offset = Some(next);
            }
            ctx.dispatcher.relay(ctx.platform.as_ref(), update).await;
            if next.is_none() {
                error!("Update {} is past the largest pollable offset; stopping", id);
                anyhow::bail!("update id {} cannot be acknowledged by polling", id);
            }
        }
    }

    info!("Polling stopped");
    Ok(())
}
