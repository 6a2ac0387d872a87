use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

use crate::commands::CommandRegistry;
use crate::error::RelayError;
use crate::platform::{Platform, Update};

/// What dispatching a single update resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler produced a reply for the originating chat.
    Reply(String),
    /// The handler ran and chose not to reply.
    Silent,
    /// The text named a command nobody registered.
    UnknownCommand(String),
    /// No text, or text that does not start with the command prefix.
    NotACommand,
}

/// Split `text` into a command name and its arguments.
///
/// The first whitespace-delimited token must start with `prefix`. A trailing
/// `@botname` mention, as Telegram appends in group chats, is dropped.
pub fn parse_command<'a>(text: &'a str, prefix: &str) -> Option<(&'a str, Vec<&'a str>)> {
    let mut tokens = text.split_whitespace();
    let name = tokens.next()?.strip_prefix(prefix)?;
    let name = name.split_once('@').map_or(name, |(name, _)| name);
    if name.is_empty() {
        return None;
    }
    Some((name, tokens.collect()))
}

/// Resolves updates to registered commands and runs them.
pub struct Dispatcher {
    registry: CommandRegistry,
    prefix: String,
}

impl Dispatcher {
    pub fn new(registry: CommandRegistry, prefix: &str) -> Self {
        Self {
            registry,
            prefix: prefix.to_string(),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Run the handler matching `update`, if any, and return its outcome.
    pub async fn dispatch(&self, update: &Update) -> Result<Dispatch, RelayError> {
        let Some(text) = update.text.as_deref() else {
            return Ok(Dispatch::NotACommand);
        };
        let Some((name, args)) = parse_command(text, &self.prefix) else {
            return Ok(Dispatch::NotACommand);
        };
        let Some(command) = self.registry.get(name) else {
            debug!("No handler for /{} (update {})", name, update.id);
            return Ok(Dispatch::UnknownCommand(name.to_string()));
        };

        info!(
            "Dispatching /{} from chat {:?} (update {})",
            name, update.chat_id, update.id
        );
        match command.handler.handle(update, &args).await {
            Ok(Some(reply)) => Ok(Dispatch::Reply(reply)),
            Ok(None) => Ok(Dispatch::Silent),
            Err(e) => Err(RelayError::Handler {
                command: name.to_string(),
                message: format!("{:#}", e),
            }),
        }
    }

    /// Dispatch `update` and send any reply back to its chat.
    pub async fn deliver(
        &self,
        platform: &dyn Platform,
        update: &Update,
    ) -> Result<Dispatch, RelayError> {
        let outcome = self.dispatch(update).await?;
        if let Dispatch::Reply(text) = &outcome {
            match update.chat_id {
                Some(chat_id) => platform
                    .send_reply(chat_id, text)
                    .await
                    .map_err(|e| RelayError::Delivery(format!("{:#}", e)))?,
                None => warn!("Update {} has a reply but no chat to send it to", update.id),
            }
        }
        Ok(outcome)
    }

    /// Deliver `update`, logging every failure instead of returning it.
    ///
    /// A panicking handler is contained here so neither the ingress nor the
    /// poll loop goes down with it.
    pub async fn relay(&self, platform: &dyn Platform, update: Update) {
        let result = AssertUnwindSafe(self.deliver(platform, &update))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(outcome)) => debug!("Update {} handled: {:?}", update.id, outcome),
            Ok(Err(e)) => error!("Update {} failed: {}", update.id, e),
            Err(_) => error!("Update {} failed: handler panicked", update.id),
        }
    }
}
