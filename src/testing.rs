//! Test doubles for the command runner and the HTTP transport.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::deploy::{CommandInvocation, CommandOutput, CommandRunner};
use crate::error::{DeployError, Result};
use crate::notify::{HttpTransport, OutboundRequest, Provider};
use crate::pipeline::GitDeploy;
use crate::{AppState, DeployConfig, SharedState};

pub fn test_config() -> DeployConfig {
    DeployConfig::from_toml_str(r#"repo = "acme/site""#).expect("valid test config")
}

/// Application state wired to fakes, as the HTTP handlers see it.
pub fn test_state(config_toml: &str) -> (SharedState, Arc<FakeRunner>, Arc<RecordingTransport>) {
    let config = Arc::new(DeployConfig::from_toml_str(config_toml).expect("valid test config"));
    let runner = Arc::new(FakeRunner::succeeding(""));
    let transport = Arc::new(RecordingTransport::default());

    let state = Arc::new(AppState {
        deploy_lock: tokio::sync::Mutex::new(()),
        deploy: GitDeploy::new(config.clone(), runner.clone(), transport.clone()),
        config,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });
    (state, runner, transport)
}

pub struct FakeRunner {
    result: std::result::Result<CommandOutput, String>,
    calls: Mutex<Vec<CommandInvocation>>,
}

impl FakeRunner {
    fn with_result(result: std::result::Result<CommandOutput, String>) -> Self {
        Self {
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(stdout: &str) -> Self {
        Self::with_result(Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }))
    }

    pub fn exiting(code: i32, stderr: &str) -> Self {
        Self::with_result(Ok(CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(code),
        }))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_result(Err(message.to_string()))
    }

    pub fn calls(&self) -> Vec<CommandInvocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        match &self.result {
            Ok(output) => Ok(output.clone()),
            Err(message) => Err(DeployError::CommandExecution(message.clone())),
        }
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    fail_for: Option<Provider>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl RecordingTransport {
    pub fn failing_for(provider: Provider) -> Self {
        Self {
            fail_for: Some(provider),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn post(&self, request: &OutboundRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_for == Some(request.provider) {
            return Err(DeployError::NotificationDelivery {
                provider: request.provider.as_str().to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        Ok(())
    }
}
