use thiserror::Error;

/// Failures the relay distinguishes between. Everything else travels as
/// `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or invalid settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A second handler was registered under an existing name.
    #[error("command '{0}' is already registered")]
    DuplicateCommand(String),

    /// A webhook body that could not be parsed as an update.
    #[error("malformed update: {0}")]
    MalformedUpdate(String),

    /// A command handler returned an error.
    #[error("handler for '/{command}' failed: {message}")]
    Handler { command: String, message: String },

    /// An outbound call (reply, ping, fetch) failed.
    #[error("delivery failed: {0}")]
    Delivery(String),
}
