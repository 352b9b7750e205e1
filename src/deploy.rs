//! Push handling: match the event against the configuration and pull.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::error::{DeployError, Result};
use crate::markdown::{escape_html, nl2br};
use crate::notify::NotificationMessage;
use crate::payload::{Commit, PushEvent};
use crate::{DeployConfig, MessageTemplates};

/// Maximum size for command output before truncation (64KB)
pub const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// A program and its argument vector. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandInvocation {
    /// `<git> pull <remote> <branch>`
    pub fn git_pull(config: &DeployConfig) -> Self {
        Self {
            program: config.git.clone(),
            args: vec![
                "pull".to_string(),
                config.remote.clone(),
                config.branch.clone(),
            ],
            working_dir: config.working_dir.clone(),
            timeout: config.command_timeout(),
        }
    }

    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            cmd.push(' ');
            cmd.push_str(arg);
        }
        cmd
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout, then stderr, then a final exit code line.
    pub fn combined(&self) -> String {
        let mut output = String::with_capacity(self.stdout.len() + self.stderr.len() + 16);
        for part in [&self.stdout, &self.stderr] {
            if part.is_empty() {
                continue;
            }
            output.push_str(part);
            if !part.ends_with('\n') {
                output.push('\n');
            }
        }
        match self.exit_code {
            Some(code) => output.push_str(&format!("exit code: {}\n", code)),
            None => output.push_str("exit code: none (terminated by signal)\n"),
        }
        truncate_output(output)
    }
}

fn truncate_output(mut output: String) -> String {
    if output.len() > MAX_OUTPUT_SIZE {
        let mut cut = MAX_OUTPUT_SIZE;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        output.push_str("\n... (output truncated)");
    }
    output
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput>;
}

/// Runs commands as child processes with a bounded run time.
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        let cmd_str = invocation.display();
        match &invocation.working_dir {
            Some(dir) => info!("Running (cwd = '{}'): {}", dir.display(), cmd_str),
            None => info!("Running: {}", cmd_str),
        }

        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let output = tokio::time::timeout(invocation.timeout, command.output())
            .await
            .map_err(|_| {
                let msg = format!(
                    "'{}' did not finish within {} seconds",
                    cmd_str,
                    invocation.timeout.as_secs()
                );
                error!("{}", msg);
                DeployError::CommandExecution(msg)
            })?
            .map_err(|e| {
                let msg = format!("'{}' failed to start: {}", cmd_str, e);
                error!("{}", msg);
                DeployError::CommandExecution(msg)
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Outcome of a pull triggered by a matching push.
#[derive(Debug, Clone)]
pub struct DeployResult {
    pub pusher_name: String,
    pub repo_url: String,
    pub branch: String,
    pub site_url: String,
    pub commits_html: String,
    /// Raw combined command output.
    pub output: String,
    pub exit_code: Option<i32>,
    pub deployed_at: DateTime<Utc>,
}

impl DeployResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn status_text(&self) -> String {
        match self.exit_code {
            Some(0) => "succeeded".to_string(),
            Some(code) => format!("failed with exit code {}", code),
            None => "failed, terminated by signal".to_string(),
        }
    }

    /// Builds the deployment report.
    pub fn to_message(&self, templates: &MessageTemplates) -> NotificationMessage {
        NotificationMessage::new(templates.deploy_body.clone())
            .with("pusherName", escape_html(&self.pusher_name))
            .with("repoUrl", self.repo_url.clone())
            .with("branch", escape_html(&self.branch))
            .with("currentSite", self.site_url.clone())
            .with("commitsHtml", self.commits_html.clone())
            .with("gitOutput", nl2br(&escape_html(&self.output)))
            .with("deployStatus", self.status_text())
            .with("deployedAt", self.deployed_at.to_rfc3339())
    }
}

fn commit_line(template: &str, commit: &Commit) -> String {
    let short_id: String = commit.id.chars().take(7).collect();
    let short_id = if short_id.is_empty() {
        "commit".to_string()
    } else {
        short_id
    };

    NotificationMessage::new(template)
        .with("commitMessage", escape_html(commit.message.trim()))
        .with("commitAdded", commit.added.len().to_string())
        .with("commitModified", commit.modified.len().to_string())
        .with("commitRemoved", commit.removed.len().to_string())
        .with("commitUrl", escape_html(&commit.url))
        .with("commitId", escape_html(&short_id))
        .render()
}

/// Renders the commits of a push as an HTML list.
pub fn commits_html(template: &str, commits: &[Commit]) -> String {
    let mut html = String::from("<ul>");
    for commit in commits {
        html.push_str(&commit_line(template, commit));
    }
    html.push_str("</ul>");
    html
}

pub struct Deployer {
    config: Arc<DeployConfig>,
    runner: Arc<dyn CommandRunner>,
}

impl Deployer {
    pub fn new(config: Arc<DeployConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Exact comparison of repository URL and ref against the configuration.
    pub fn matches(&self, push: &PushEvent) -> bool {
        push.repository.url == self.config.expected_repository_url()
            && push.reference == self.config.expected_ref()
    }

    /// Pulls if the push targets the configured repository and branch.
    /// Returns `None` for any other push.
    pub async fn deploy(&self, push: &PushEvent, site_url: &str) -> Result<Option<DeployResult>> {
        if !self.matches(push) {
            warn!(
                "Push to '{}' ({}) does not match '{}' ({}), skipping.",
                push.repository.url,
                push.reference,
                self.config.expected_repository_url(),
                self.config.expected_ref()
            );
            return Ok(None);
        }

        let invocation = CommandInvocation::git_pull(&self.config);
        let output = self.runner.run(&invocation).await?;
        if output.success() {
            info!("'{}' completed successfully.", invocation.display());
        } else {
            warn!(
                "'{}' exited with {:?}:\n{}",
                invocation.display(),
                output.exit_code,
                output.stderr
            );
        }

        Ok(Some(DeployResult {
            pusher_name: push.pusher.name.clone(),
            repo_url: push.repository.url.clone(),
            branch: self.config.branch.clone(),
            site_url: site_url.to_string(),
            commits_html: commits_html(&self.config.messages.commit_line, &push.commits),
            output: output.combined(),
            exit_code: output.exit_code,
            deployed_at: Utc::now(),
        }))
    }
}
