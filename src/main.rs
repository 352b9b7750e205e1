use axum::{Router, routing};
use chrono::Utc;
use git_deploy_hook::api::{handle_webhook, status};
use git_deploy_hook::deploy::ProcessRunner;
use git_deploy_hook::error::DeployError;
use git_deploy_hook::logging::setup_logging;
use git_deploy_hook::notify::ReqwestTransport;
use git_deploy_hook::pipeline::GitDeploy;
use git_deploy_hook::{AppState, load_config};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "gitdeploy.toml";

async fn run() -> Result<(), DeployError> {
    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path =
        std::env::var("GITDEPLOY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = Arc::new(load_config(&config_path)?);
    let _log_guard = setup_logging(&config.logging)?;

    if !config.verifies_signature() {
        warn!("Webhook signature verification is disabled, any caller can trigger a pull");
    }

    let deploy = GitDeploy::new(
        config.clone(),
        Arc::new(ProcessRunner),
        Arc::new(ReqwestTransport::new()?),
    );

    let state = Arc::new(AppState {
        deploy_lock: Mutex::new(()),
        config,
        deploy,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    let app = Router::new()
        .route("/", routing::post(handle_webhook))
        .route("/webhook", routing::post(handle_webhook))
        .route("/status", routing::get(status))
        .with_state(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if let Err(e) = run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
