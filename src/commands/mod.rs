pub mod builtin;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::RelayError;
use crate::platform::Update;

/// A stateless command implementation.
///
/// Returns the reply to send back to the originating chat, or `None` to stay
/// silent.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, update: &Update, args: &[&str]) -> Result<Option<String>>;
}

/// Adapter turning a plain closure into a [`CommandHandler`].
#[cfg(test)]
pub struct FnHandler<F>(F);

#[cfg(test)]
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Update, &[&str]) -> Result<Option<String>> + Send + Sync,
{
    FnHandler(f)
}

#[cfg(test)]
#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&Update, &[&str]) -> Result<Option<String>> + Send + Sync,
{
    async fn handle(&self, update: &Update, args: &[&str]) -> Result<Option<String>> {
        (self.0)(update, args)
    }
}

/// A registered command
#[derive(Clone)]
pub struct Command {
    pub name: String,
    /// One line shown by `/help`
    pub description: String,
    pub handler: Arc<dyn CommandHandler>,
}

/// Registry of all commands, keyed by case-sensitive name.
///
/// Filled once at startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Register a command. The first registration under a name wins.
    pub fn register<H>(
        &mut self,
        name: &str,
        description: &str,
        handler: H,
    ) -> Result<(), RelayError>
    where
        H: CommandHandler + 'static,
    {
        if self.commands.contains_key(name) {
            return Err(RelayError::DuplicateCommand(name.to_string()));
        }
        info!("Registered command: /{} - {}", name, description);
        self.commands.insert(
            name.to_string(),
            Command {
                name: name.to_string(),
                description: description.to_string(),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Get a command by name
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// All commands, sorted by name
    pub fn list(&self) -> Vec<&Command> {
        let mut commands: Vec<&Command> = self.commands.values().collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
