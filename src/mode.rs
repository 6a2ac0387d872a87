use reqwest::Url;

use crate::config::Config;
use crate::error::RelayError;

/// How updates reach the process. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The platform pushes updates to `url`.
    Webhook { url: Url },
    /// The process long-polls the platform.
    Polling,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Webhook { .. } => write!(f, "webhook"),
            DeliveryMode::Polling => write!(f, "polling"),
        }
    }
}

/// Pick the delivery mode from configuration.
///
/// A configured base URL selects webhook delivery and must be a usable
/// http(s) URL. Requesting webhook delivery through the hosting marker
/// without a base URL is an error rather than a silent fallback to polling.
pub fn select(config: &Config) -> Result<DeliveryMode, RelayError> {
    match config.webhook.base_url.as_deref().map(str::trim) {
        Some("") => Err(RelayError::Configuration(
            "webhook base URL is set but empty".to_string(),
        )),
        Some(base) => webhook_url(base, config.webhook_path_secret())
            .map(|url| DeliveryMode::Webhook { url }),
        None if config.webhook.require => Err(RelayError::Configuration(
            "webhook delivery required by the hosting environment but no base URL is set"
                .to_string(),
        )),
        None => Ok(DeliveryMode::Polling),
    }
}

/// `{base}/{secret}`, with any trailing slash on `base` collapsed.
fn webhook_url(base: &str, secret: &str) -> Result<Url, RelayError> {
    let candidate = format!("{}/{}", base.trim_end_matches('/'), secret);
    let url = Url::parse(&candidate)
        .map_err(|e| RelayError::Configuration(format!("invalid webhook base URL {base:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(RelayError::Configuration(format!(
            "webhook base URL must be an http(s) URL with a host, got {base:?}"
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        Config::for_tests(pairs)
    }

    #[test]
    fn test_base_url_selects_webhook() {
        let mode = select(&config(&[("WEBHOOK_BASE_URL", "https://relay.example.com/")])).unwrap();
        match mode {
            DeliveryMode::Webhook { url } => {
                assert_eq!(url.as_str(), "https://relay.example.com/123:abc");
            }
            other => panic!("expected webhook mode, got {other}"),
        }
    }

    #[test]
    fn test_explicit_secret_used_in_path() {
        let mode = select(&config(&[
            ("WEBHOOK_BASE_URL", "https://relay.example.com"),
            ("WEBHOOK_SECRET", "hook-secret"),
        ]))
        .unwrap();
        assert_eq!(
            mode,
            DeliveryMode::Webhook {
                url: Url::parse("https://relay.example.com/hook-secret").unwrap()
            }
        );
    }

    #[test]
    fn test_no_base_url_selects_polling() {
        assert_eq!(select(&config(&[])).unwrap(), DeliveryMode::Polling);
    }

    #[test]
    fn test_empty_base_url_fails_fast() {
        let err = select(&config(&[("WEBHOOK_BASE_URL", "")])).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert!(select(&config(&[("WEBHOOK_BASE_URL", "   ")])).is_err());
    }

    #[test]
    fn test_hosting_marker_without_url_fails_fast() {
        let err = select(&config(&[("RENDER", "true")])).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[test]
    fn test_hosting_marker_with_url_selects_webhook() {
        let mode = select(&config(&[
            ("RENDER", "true"),
            ("RENDER_EXTERNAL_URL", "https://my-bot.onrender.com"),
        ]))
        .unwrap();
        assert!(matches!(mode, DeliveryMode::Webhook { .. }));
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        assert!(select(&config(&[("WEBHOOK_BASE_URL", "relay.example.com")])).is_err());
        assert!(select(&config(&[("WEBHOOK_BASE_URL", "ftp://relay.example.com")])).is_err());
    }
}
