use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    /// Required, but may come from the environment only.
    #[serde(default)]
    pub bot_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Public base URL. Presence selects webhook delivery.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Explicit path secret. Falls back to the bot token when unset.
    #[serde(default)]
    pub secret: Option<String>,
    /// Hosting marker: the deployment expects webhook delivery.
    #[serde(default)]
    pub require: bool,
    #[serde(default = "default_max_inflight")]
    pub max_inflight_dispatches: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_banner")]
    pub banner: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeepaliveConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_keepalive_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
}

fn default_max_inflight() -> usize {
    64
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_banner() -> String {
    "Trading Bot Active - Deployed on Render".to_string()
}

fn default_keepalive_interval() -> u64 {
    300
}

fn default_keepalive_timeout() -> u64 {
    10
}

fn default_command_prefix() -> String {
    "/".to_string()
}

fn default_welcome_message() -> String {
    "Welcome to the Trading Bot!".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            secret: None,
            require: false,
            max_inflight_dispatches: default_max_inflight(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            banner: default_banner(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            url: None,
            interval_secs: default_keepalive_interval(),
            timeout_secs: default_keepalive_timeout(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            welcome_message: default_welcome_message(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_poll_timeout(),
        }
    }
}

/// Telegram only accepts `A-Z a-z 0-9 _ -` in `secret_token`, 1 to 256 chars.
fn is_valid_secret_token(secret: &str) -> bool {
    !secret.is_empty()
        && secret.len() <= 256
        && secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Path segments the HTTP server already serves as fixed routes.
const RESERVED_PATHS: &[&str] = &["ping"];

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, RelayError> {
    value
        .trim()
        .parse()
        .map_err(|_| RelayError::Configuration(format!("{name} has an invalid value: {value:?}")))
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

impl Config {
    /// Load from a TOML file (when present) and overlay the process environment.
    ///
    /// A missing file is only an error when `required` is set, so a
    /// deployment configured purely through environment variables works.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        let content = if path.exists() {
            Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            )
        } else if required {
            anyhow::bail!("Config file not found: {}", path.display());
        } else {
            None
        };

        Self::from_sources(content.as_deref(), |name| std::env::var(name).ok())
    }

    /// Build from optional TOML text plus an environment lookup.
    pub fn from_sources<F>(content: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = match content {
            Some(text) => toml::from_str(text).context("Failed to parse config file")?,
            None => Config::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = env("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }

        if let Some(url) = env("WEBHOOK_BASE_URL").or_else(|| env("RENDER_EXTERNAL_URL")) {
            self.webhook.base_url = Some(url);
        }
        if let Some(secret) = env("WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        if let Some(marker) = env("RENDER") {
            self.webhook.require = parse_flag(&marker);
        }
        if let Some(max) = env("MAX_INFLIGHT_DISPATCHES") {
            self.webhook.max_inflight_dispatches = parse_env("MAX_INFLIGHT_DISPATCHES", &max)?;
        }

        if let Some(host) = env("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }

        if let Some(url) = env("UPTIME_ROBOT_URL") {
            self.keepalive.url = Some(url);
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.bot_token().is_empty() {
            return Err(RelayError::Configuration(
                "TELEGRAM_BOT_TOKEN is not set".to_string(),
            ));
        }
        if let Some(secret) = &self.webhook.secret {
            if !is_valid_secret_token(secret) {
                return Err(RelayError::Configuration(
                    "WEBHOOK_SECRET must be 1-256 characters of A-Z, a-z, 0-9, '_' or '-'"
                        .to_string(),
                ));
            }
        }
        if RESERVED_PATHS.contains(&self.webhook_path_secret()) {
            return Err(RelayError::Configuration(format!(
                "webhook path secret {:?} collides with a built-in route",
                self.webhook_path_secret()
            )));
        }
        if self.webhook.max_inflight_dispatches == 0 {
            return Err(RelayError::Configuration(
                "max_inflight_dispatches must be at least 1".to_string(),
            ));
        }
        if let Some(url) = self.keepalive_url() {
            Url::parse(url).map_err(|e| {
                RelayError::Configuration(format!("invalid keepalive URL {url:?}: {e}"))
            })?;
        }
        if self.keepalive.interval_secs == 0 {
            return Err(RelayError::Configuration(
                "keepalive interval must be at least 1 second".to_string(),
            ));
        }
        if self.bot.command_prefix.is_empty() {
            return Err(RelayError::Configuration(
                "command_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bot_token(&self) -> &str {
        self.telegram.bot_token.as_deref().unwrap_or_default().trim()
    }

    /// The unguessable path segment the webhook is served under.
    pub fn webhook_path_secret(&self) -> &str {
        match self.webhook.secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret,
            _ => self.bot_token(),
        }
    }

    /// Secret echoed back by Telegram in `X-Telegram-Bot-Api-Secret-Token`.
    /// Only an explicit secret is used; the bot token is not a valid value.
    pub fn webhook_secret_token(&self) -> Option<&str> {
        self.webhook.secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Keepalive target, treating a blank value as unset.
    pub fn keepalive_url(&self) -> Option<&str> {
        self.keepalive
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn keepalive_target(&self) -> Option<Url> {
        self.keepalive_url().and_then(|url| Url::parse(url).ok())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive.interval_secs)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive.timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.polling.timeout_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Environment-only config with a bot token filled in.
    #[cfg(test)]
    pub fn for_tests(pairs: &[(&str, &str)]) -> Self {
        let mut vars: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        vars.entry("TELEGRAM_BOT_TOKEN".to_string())
            .or_insert_with(|| "123:abc".to_string());
        Self::from_sources(None, |name| vars.get(name).cloned()).unwrap()
    }
}
