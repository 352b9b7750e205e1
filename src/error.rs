use std::io;

/// Custom error type for git_deploy_hook operations
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("{0}")]
    Authentication(String),

    #[error("Missing HTTP '{0}' header.")]
    MissingHeader(&'static str),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Could not parse webhook payload: {0}")]
    PayloadParse(String),

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error("Notification delivery to '{provider}' failed: {message}")]
    NotificationDelivery { provider: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl From<serde_json::Error> for DeployError {
    fn from(e: serde_json::Error) -> Self {
        Self::PayloadParse(e.to_string())
    }
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;
