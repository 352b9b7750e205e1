//! Inbound webhook request snapshot and payload decoding

use axum::body::Bytes;
use axum::http::{HeaderMap, header};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::signature::{SIGNATURE_256_HEADER, SIGNATURE_HEADER};

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const FORM_PAYLOAD_FIELD: &str = "payload";

/// Everything the pipeline needs from an inbound request.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub content_type: Option<String>,
    pub event: Option<String>,
    pub signature: Option<String>,
    pub delivery_id: Option<String>,
    pub host: Option<String>,
    pub body: Bytes,
    /// Parsed fields of a form-encoded body, empty otherwise.
    pub form: HashMap<String, String>,
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Media type of a `Content-Type` value, lowercased and without parameters.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

impl WebhookRequest {
    pub fn from_parts(headers: &HeaderMap, body: Bytes) -> Self {
        let content_type = header_str(headers, header::CONTENT_TYPE.as_str());

        let form = match content_type.as_deref().map(media_type) {
            Some(media) if media == FORM_CONTENT_TYPE => {
                serde_urlencoded::from_bytes::<HashMap<String, String>>(&body).unwrap_or_else(
                    |e| {
                        debug!("Could not parse form body: {}", e);
                        HashMap::new()
                    },
                )
            }
            _ => HashMap::new(),
        };

        Self {
            content_type,
            event: header_str(headers, EVENT_HEADER),
            signature: header_str(headers, SIGNATURE_256_HEADER)
                .or_else(|| header_str(headers, SIGNATURE_HEADER)),
            delivery_id: header_str(headers, DELIVERY_HEADER),
            host: header_str(headers, header::HOST.as_str()),
            body,
            form,
        }
    }

    /// Returns the content type and event name, failing if either is absent.
    pub fn require_headers(&self) -> Result<(&str, &str)> {
        let content_type = self
            .content_type
            .as_deref()
            .ok_or(DeployError::MissingHeader("Content-Type"))?;
        let event = self
            .event
            .as_deref()
            .ok_or(DeployError::MissingHeader("X-Github-Event"))?;
        Ok((content_type, event))
    }

    /// Decodes the JSON payload according to the declared content type.
    pub fn decode_payload(&self) -> Result<Value> {
        let (content_type, _) = self.require_headers()?;

        match media_type(content_type).as_str() {
            JSON_CONTENT_TYPE => Ok(serde_json::from_slice(&self.body)?),
            FORM_CONTENT_TYPE => {
                let field = self.form.get(FORM_PAYLOAD_FIELD).ok_or_else(|| {
                    DeployError::PayloadParse(format!(
                        "form field '{}' is missing",
                        FORM_PAYLOAD_FIELD
                    ))
                })?;
                Ok(serde_json::from_str(field)?)
            }
            _ => Err(DeployError::UnsupportedContentType(content_type.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub url: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pusher {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub reference: String,
    pub repository: Repository,
    #[serde(default)]
    pub pusher: Pusher,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

/// A decoded webhook event.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Ping(Value),
    Push(PushEvent),
    Unrecognized { event: String, payload: Value },
}

impl WebhookEvent {
    /// Types the payload according to the (case-insensitive) event name.
    pub fn from_payload(event: &str, payload: Value) -> Result<Self> {
        match event.to_ascii_lowercase().as_str() {
            "ping" => Ok(Self::Ping(payload)),
            "push" => Ok(Self::Push(serde_json::from_value(payload)?)),
            _ => Ok(Self::Unrecognized {
                event: event.to_string(),
                payload,
            }),
        }
    }
}
