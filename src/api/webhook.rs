//! Webhook handler

use axum::{
    body::Bytes,
    extract::{Query, State as AxumState},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tracing::{Instrument, debug, error, info_span};
use uuid::Uuid;

use crate::SharedState;
use crate::error::DeployError;
use crate::markdown::escape_html;
use crate::payload::WebhookRequest;
use crate::pipeline::HookOutcome;

/// A query flag is truthy when present and not one of the usual "off" values.
fn is_truthy(value: Option<&String>) -> bool {
    match value {
        None => false,
        Some(v) => !matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "no" | "off"
        ),
    }
}

/// Handles the webhook POST request.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_truthy(params.get(&state.config.trigger_param)) {
        debug!(
            "Query flag '{}' not set, ignoring request",
            state.config.trigger_param
        );
        return StatusCode::NOT_FOUND.into_response();
    }

    let request = WebhookRequest::from_parts(&headers, body);
    let delivery = request
        .delivery_id
        .clone()
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    let span = info_span!(
        "webhook",
        delivery = %delivery,
        event = request.event.as_deref().unwrap_or("-")
    );

    let outcome = async {
        state.deploy.authenticate(&request)?;
        // One webhook at a time; duplicate deliveries queue up behind each other
        let _guard = state.deploy_lock.lock().await;
        state.deploy.process(&request).await
    }
    .instrument(span)
    .await;

    match outcome {
        Ok(HookOutcome::Completed) => StatusCode::OK.into_response(),
        Ok(HookOutcome::UnknownEvent { body }) => (StatusCode::NOT_FOUND, body).into_response(),
        Err(e) => {
            error!(delivery = %delivery, "Webhook rejected: {}", e);
            error_response(&e)
        }
    }
}

fn error_response(e: &DeployError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error: {}", escape_html(&e.to_string())),
    )
        .into_response()
}
