use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::builtin::register_builtin_commands;
use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::mode::DeliveryMode;
use crate::platform::Platform;
use crate::{polling, server};

/// Everything the delivery paths share. Built once at startup, read-only after.
pub struct AppContext {
    pub config: Config,
    pub dispatcher: Dispatcher,
    pub platform: Arc<dyn Platform>,
}

impl AppContext {
    /// Context with the built-in commands registered.
    pub fn new(config: Config, platform: Arc<dyn Platform>) -> Result<Self, RelayError> {
        let mut registry = CommandRegistry::new();
        register_builtin_commands(&mut registry, &config.bot)?;
        Ok(Self::with_registry(config, platform, registry))
    }

    pub fn with_registry(
        config: Config,
        platform: Arc<dyn Platform>,
        registry: CommandRegistry,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry, &config.bot.command_prefix);
        Self {
            config,
            dispatcher,
            platform,
        }
    }
}

/// Run the selected delivery path until `cancel` fires.
///
/// The HTTP server runs in both modes so `/` and `/ping` stay reachable for
/// the keepalive target; only webhook mode mounts the update endpoint. In
/// polling mode the server is optional and a bind failure only logs.
pub async fn run(ctx: Arc<AppContext>, mode: DeliveryMode, cancel: CancellationToken) -> Result<()> {
    match mode {
        DeliveryMode::Webhook { url } => {
            let listener = server::bind(&ctx.config).await?;
            ctx.platform
                .register_webhook(&url, ctx.config.webhook_secret_token())
                .await
                .context("Failed to register webhook")?;
            info!(
                "Bot running in webhook mode at {}",
                url.origin().ascii_serialization()
            );

            let router = server::build_router(ctx.clone(), true);
            server::serve(listener, router, cancel).await
        }
        DeliveryMode::Polling => {
            let http = match server::bind(&ctx.config).await {
                Ok(listener) => {
                    let router = server::build_router(ctx.clone(), false);
                    Some(tokio::spawn(server::serve(listener, router, cancel.clone())))
                }
                Err(e) => {
                    warn!("Polling without the HTTP server: {:#}", e);
                    None
                }
            };

            let polled = polling::run(&ctx, cancel.clone()).await;

            cancel.cancel();
            if let Some(http) = http {
                http.await.context("HTTP server task panicked")??;
            }
            polled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::{Batch, FakePlatform};
    use crate::platform::Update;

    #[test]
    fn test_new_registers_builtins() {
        let platform = Arc::new(FakePlatform::default());
        let ctx = AppContext::new(Config::for_tests(&[]), platform).unwrap();
        let registry = ctx.dispatcher.registry();
        assert!(registry.get("start").is_some());
        assert!(registry.get("help").is_some());
    }

    #[tokio::test]
    async fn test_webhook_mode_registers_once() {
        let platform = Arc::new(FakePlatform::default());
        let config = Config::for_tests(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "0"),
            ("WEBHOOK_BASE_URL", "https://relay.example.com"),
        ]);
        let mode = crate::mode::select(&config).unwrap();
        let ctx = Arc::new(AppContext::new(config, platform.clone()).unwrap());

        let cancel = CancellationToken::new();
        cancel.cancel();
        run(ctx, mode, cancel).await.unwrap();

        let webhooks = platform.webhooks.lock().unwrap().clone();
        assert_eq!(
            webhooks,
            vec![("https://relay.example.com/123:abc".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_polling_mode_dispatches_until_drained() {
        let cancel = CancellationToken::new();
        let platform = Arc::new(FakePlatform::with_batches(
            vec![Batch::Updates(vec![Update::text_message(1, 8, "/start")])],
            cancel.clone(),
        ));
        let config = Config::for_tests(&[("HOST", "127.0.0.1"), ("PORT", "0")]);
        let ctx = Arc::new(AppContext::new(config, platform.clone()).unwrap());

        run(ctx, DeliveryMode::Polling, cancel).await.unwrap();

        assert_eq!(
            platform.replies(),
            vec![(8, "Welcome to the Trading Bot!".to_string())]
        );
        assert!(platform.webhooks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_polling_survives_busy_port() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port().to_string();

        let cancel = CancellationToken::new();
        let platform = Arc::new(FakePlatform::with_batches(
            vec![Batch::Updates(vec![Update::text_message(1, 8, "/start")])],
            cancel.clone(),
        ));
        let config = Config::for_tests(&[("HOST", "127.0.0.1"), ("PORT", port.as_str())]);
        let ctx = Arc::new(AppContext::new(config, platform.clone()).unwrap());

        run(ctx, DeliveryMode::Polling, cancel).await.unwrap();

        assert_eq!(platform.replies().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_mode_needs_the_port() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port().to_string();

        let platform = Arc::new(FakePlatform::default());
        let config = Config::for_tests(&[
            ("HOST", "127.0.0.1"),
            ("PORT", port.as_str()),
            ("WEBHOOK_BASE_URL", "https://relay.example.com"),
        ]);
        let mode = crate::mode::select(&config).unwrap();
        let ctx = Arc::new(AppContext::new(config, platform.clone()).unwrap());

        assert!(run(ctx, mode, CancellationToken::new()).await.is_err());
        assert!(platform.webhooks.lock().unwrap().is_empty());
    }
}
