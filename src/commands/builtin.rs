use anyhow::Result;
use async_trait::async_trait;

use super::{CommandHandler, CommandRegistry};
use crate::config::BotConfig;
use crate::error::RelayError;
use crate::platform::Update;

/// `/start`: greet the user.
pub struct StartCommand {
    welcome: String,
}

#[async_trait]
impl CommandHandler for StartCommand {
    async fn handle(&self, _update: &Update, _args: &[&str]) -> Result<Option<String>> {
        Ok(Some(self.welcome.clone()))
    }
}

/// `/help`: list the commands known when it was registered.
pub struct HelpCommand {
    text: String,
}

impl HelpCommand {
    fn new(registry: &CommandRegistry, prefix: &str, own_description: &str) -> Self {
        let mut entries: Vec<(String, String)> = registry
            .list()
            .into_iter()
            .map(|c| (c.name.clone(), c.description.clone()))
            .collect();
        entries.push(("help".to_string(), own_description.to_string()));
        entries.sort();

        let mut text = String::from("Commands:\n");
        for (name, description) in entries {
            text.push_str(&format!("{}{} - {}\n", prefix, name, description));
        }
        Self { text }
    }
}

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn handle(&self, _update: &Update, _args: &[&str]) -> Result<Option<String>> {
        Ok(Some(self.text.clone()))
    }
}

/// Register the built-in commands.
///
/// `help` snapshots the registry, so it goes last.
pub fn register_builtin_commands(
    registry: &mut CommandRegistry,
    config: &BotConfig,
) -> Result<(), RelayError> {
    registry.register(
        "start",
        "Show the welcome message",
        StartCommand {
            welcome: config.welcome_message.clone(),
        },
    )?;

    let help_description = "List available commands";
    let help = HelpCommand::new(registry, &config.command_prefix, help_description);
    registry.register("help", help_description, help)?;

    Ok(())
}
