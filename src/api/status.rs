//! Status API endpoint

use axum::{Json, extract::State as AxumState};
use serde::Serialize;

use crate::SharedState;
use crate::notify::Provider;

/// Server information
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: String,
}

/// What the hook deploys and whom it tells
#[derive(Debug, Serialize)]
pub struct DeployInfo {
    pub repository: String,
    pub branch: String,
    pub remote: String,
    pub signature_check: bool,
    pub notifications_enabled: bool,
    pub providers: Vec<Provider>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server: ServerInfo,
    pub deploy: DeployInfo,
}

/// GET /status - Server and deployment overview
pub async fn status(AxumState(state): AxumState<SharedState>) -> Json<StatusResponse> {
    let config = &state.config;

    Json(StatusResponse {
        server: ServerInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            started_at: state.started_at.to_rfc3339(),
        },
        deploy: DeployInfo {
            repository: config.expected_repository_url(),
            branch: config.branch.clone(),
            remote: config.remote.clone(),
            signature_check: config.verifies_signature(),
            notifications_enabled: config.notifications.enabled,
            providers: config.notifications.providers.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;

    #[tokio::test]
    async fn test_status_reports_configuration() {
        let (state, _, _) = test_state(r#"repo = "acme/site""#);

        let Json(response) = status(AxumState(state)).await;

        assert_eq!(response.server.name, "git_deploy_hook");
        assert_eq!(response.deploy.repository, "https://github.com/acme/site");
        assert_eq!(response.deploy.branch, "master");
        assert!(!response.deploy.signature_check);
        assert!(response.deploy.providers.is_empty());
    }
}
