pub mod api;
pub mod deploy;
pub mod error;
pub mod logging;
pub mod markdown;
pub mod notify;
pub mod payload;
pub mod pipeline;
pub mod signature;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::DeployError;
use crate::logging::LoggingConfig;
use crate::notify::NotificationConfig;
use crate::pipeline::GitDeploy;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize, Clone)]
pub struct DeployConfig {
    #[serde(default)]
    pub hook_secret: String,
    #[serde(default = "default_true")]
    pub check_hook_secret: bool,
    #[serde(default = "default_git")]
    pub git: String,
    /// Repository in `owner/name` form.
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_host")]
    pub host: String,
    /// Query parameter that has to be present and truthy for the hook to run.
    #[serde(default = "default_trigger_param")]
    pub trigger_param: String,
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    pub site_url: Option<String>,
    #[serde(default)]
    pub echo_unrecognized_payload: bool,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub messages: MessageTemplates,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

fn default_git() -> String {
    "git".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_host() -> String {
    "github.com".to_string()
}

fn default_trigger_param() -> String {
    "github".to_string()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl DeployConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(input: &str) -> Result<Self, DeployError> {
        let config: DeployConfig = toml::from_str(input)?;
        if config.repo.trim().is_empty() {
            return Err(DeployError::Config("'repo' must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Returns true if incoming webhooks must carry a valid signature.
    ///
    /// Setting `check_hook_secret = false` or leaving `hook_secret` empty
    /// disables verification entirely.
    pub fn verifies_signature(&self) -> bool {
        self.check_hook_secret && !self.hook_secret.is_empty()
    }

    /// The `repository.url` a push payload must carry to trigger a pull.
    pub fn expected_repository_url(&self) -> String {
        format!("https://{}/{}", self.host, self.repo)
    }

    /// The `ref` a push payload must carry to trigger a pull.
    pub fn expected_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<DeployConfig, DeployError> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        DeployError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    DeployConfig::from_toml_str(&config_str).map_err(|e| {
        DeployError::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Message templates. Placeholders are written as `{name}`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MessageTemplates {
    pub deploy_body: String,
    pub commit_line: String,
    pub deploy_error: String,
    pub ping_title: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            deploy_body: "<p><strong>{pusherName}</strong> pushed to \
                <a href='{repoUrl}' title='{repoUrl}'>{repoUrl}</a> \
                and {currentSite} was updated ({deployStatus}, {deployedAt}).</p>\
                <p><strong>Commits</strong></p>{commitsHtml}\
                <p><strong>Output</strong></p><pre>{gitOutput}</pre>"
                .to_string(),
            commit_line: "<li>{commitMessage} \
                <small>(+{commitAdded} ~{commitModified} -{commitRemoved})</small> \
                <a href='{commitUrl}' title='{commitId}'>{commitId}</a></li>"
                .to_string(),
            deploy_error: "<p><strong>GitDeploy failed</strong></p><p>{error}</p>".to_string(),
            ping_title: "<p><strong>GitHub Ping</strong></p>".to_string(),
        }
    }
}

pub struct AppState {
    pub deploy_lock: Mutex<()>,
    pub config: Arc<DeployConfig>,
    pub deploy: GitDeploy,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;
