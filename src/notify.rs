//! Notification templating and delivery to chat providers

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::markdown::html_to_markdown;

const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const GLIP_TITLE: &str = "Github Webhook Endpoint";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("invalid placeholder pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Glip,
    Slack,
    Mattermost,
    Telegram,
}

impl Provider {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Glip => "glip",
            Self::Slack => "slack",
            Self::Mattermost => "mattermost",
            Self::Telegram => "telegram",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlipConfig {
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    pub webhook: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MattermostConfig {
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Report deployments through the configured providers.
    pub enabled: bool,
    pub providers: Vec<Provider>,
    pub glip: GlipConfig,
    pub slack: SlackConfig,
    pub mattermost: MattermostConfig,
    pub telegram: TelegramConfig,
}

/// A message template plus the values for its `{placeholder}`s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationMessage {
    pub template: String,
    pub values: BTreeMap<String, String>,
}

impl NotificationMessage {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Substitutes every known placeholder. Unknown placeholders stay verbatim.
    pub fn render(&self) -> String {
        PLACEHOLDER_RE
            .replace_all(&self.template, |caps: &Captures| {
                self.values
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Placeholders in the template without a value.
    pub fn unresolved_placeholders(&self) -> Vec<String> {
        PLACEHOLDER_RE
            .captures_iter(&self.template)
            .map(|caps| caps[1].to_string())
            .filter(|name| !self.values.contains_key(name))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One outbound POST to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub provider: Provider,
    pub url: String,
    pub body: RequestBody,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, request: &OutboundRequest) -> Result<()>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("git_deploy_hook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeployError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: &OutboundRequest) -> Result<()> {
        let builder = self.client.post(&request.url);
        let builder = match &request.body {
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
        };

        builder
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map(|_| ())
            .map_err(|e| DeployError::NotificationDelivery {
                provider: request.provider.as_str().to_string(),
                message: e.to_string(),
            })
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: Vec<Provider>,
    pub failures: Vec<DeployError>,
}

fn missing(provider: Provider, field: &str) -> DeployError {
    DeployError::NotificationDelivery {
        provider: provider.as_str().to_string(),
        message: format!("'{}' is not configured", field),
    }
}

pub struct NotificationDispatcher {
    config: NotificationConfig,
    transport: Arc<dyn HttpTransport>,
}

impl NotificationDispatcher {
    pub fn new(config: NotificationConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    /// Shapes the provider specific request for an already rendered message.
    pub fn build_request(
        &self,
        provider: Provider,
        text: &str,
        message: &NotificationMessage,
    ) -> Result<OutboundRequest> {
        let (url, body) = match provider {
            Provider::Glip => {
                let url = self
                    .config
                    .glip
                    .webhook
                    .clone()
                    .ok_or_else(|| missing(provider, "webhook"))?;
                let mut body = json!({
                    "body": html_to_markdown(text),
                    "title": GLIP_TITLE,
                });
                if let Some(site) = message.values.get("currentSite") {
                    body["activity"] = Value::String(format!("GitDeploy for {}", site));
                }
                (url, RequestBody::Json(body))
            }
            Provider::Slack => {
                let url = self
                    .config
                    .slack
                    .webhook
                    .clone()
                    .ok_or_else(|| missing(provider, "webhook"))?;
                let payload = json!({
                    "username": self.config.slack.username,
                    "text": text,
                });
                (
                    url,
                    RequestBody::Form(vec![("payload".to_string(), payload.to_string())]),
                )
            }
            Provider::Mattermost => {
                let url = self
                    .config
                    .mattermost
                    .webhook
                    .clone()
                    .ok_or_else(|| missing(provider, "webhook"))?;
                let payload = json!({ "text": text });
                (
                    url,
                    RequestBody::Form(vec![("payload".to_string(), payload.to_string())]),
                )
            }
            Provider::Telegram => {
                let telegram = &self.config.telegram;
                let token = telegram
                    .bot_token
                    .as_ref()
                    .ok_or_else(|| missing(provider, "bot_token"))?;
                let chat_id = telegram
                    .chat_id
                    .clone()
                    .ok_or_else(|| missing(provider, "chat_id"))?;
                let url = format!(
                    "{}/bot{}/sendMessage",
                    telegram.api_base.trim_end_matches('/'),
                    token
                );
                let fields = vec![
                    ("chat_id".to_string(), chat_id),
                    ("parse_mode".to_string(), "HTML".to_string()),
                    ("disable_web_page_preview".to_string(), "true".to_string()),
                    ("text".to_string(), text.to_string()),
                ];
                (url, RequestBody::Form(fields))
            }
        };

        Ok(OutboundRequest {
            provider,
            url,
            body,
        })
    }

    /// Sends the message to every configured provider. A failing provider
    /// never stops the others.
    pub async fn dispatch(&self, message: &NotificationMessage) -> DispatchReport {
        let unresolved = message.unresolved_placeholders();
        if !unresolved.is_empty() {
            debug!("Message has unresolved placeholders: {:?}", unresolved);
        }
        let text = message.render();

        let mut report = DispatchReport::default();
        for &provider in &self.config.providers {
            let result = match self.build_request(provider, &text, message) {
                Ok(request) => self.transport.post(&request).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!("Notification delivered to {}", provider.as_str());
                    report.delivered.push(provider);
                }
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use pretty_assertions::assert_eq;

    fn config(providers: Vec<Provider>) -> NotificationConfig {
        NotificationConfig {
            enabled: true,
            providers,
            glip: GlipConfig {
                webhook: Some("https://glip.test/hook".to_string()),
            },
            slack: SlackConfig {
                webhook: Some("https://slack.test/hook".to_string()),
                username: Some("deploybot".to_string()),
            },
            mattermost: MattermostConfig {
                webhook: Some("https://mattermost.test/hook".to_string()),
            },
            telegram: TelegramConfig {
                bot_token: Some("123:abc".to_string()),
                chat_id: Some("-42".to_string()),
                ..TelegramConfig::default()
            },
        }
    }

    fn form_field<'a>(request: &'a OutboundRequest, name: &str) -> &'a str {
        let RequestBody::Form(fields) = &request.body else {
            panic!("expected a form body");
        };
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let message = NotificationMessage::new("<p>{pusherName} pushed {count} to {repoUrl}</p>")
            .with("pusherName", "octocat")
            .with("repoUrl", "https://github.com/acme/site");

        assert_eq!(
            message.render(),
            "<p>octocat pushed {count} to https://github.com/acme/site</p>"
        );
        assert_eq!(message.unresolved_placeholders(), vec!["count".to_string()]);
    }

    #[test]
    fn test_values_are_not_substituted_twice() {
        let message = NotificationMessage::new("{a} {b}")
            .with("a", "{b}")
            .with("b", "x");
        assert_eq!(message.render(), "{b} x");
    }

    #[test]
    fn test_provider_request_shapes() {
        let dispatcher = NotificationDispatcher::new(
            config(vec![]),
            Arc::new(RecordingTransport::default()),
        );
        let message = NotificationMessage::new("<p><strong>{site}</strong></p>")
            .with("currentSite", "https://example.org/");
        let text = "<p><strong>hi</strong></p>";

        let glip = dispatcher.build_request(Provider::Glip, text, &message).unwrap();
        assert_eq!(glip.url, "https://glip.test/hook");
        assert_eq!(
            glip.body,
            RequestBody::Json(json!({
                "activity": "GitDeploy for https://example.org/",
                "body": "**hi**\n",
                "title": "Github Webhook Endpoint",
            }))
        );

        let slack = dispatcher.build_request(Provider::Slack, text, &message).unwrap();
        let payload: Value = serde_json::from_str(form_field(&slack, "payload")).unwrap();
        assert_eq!(payload, json!({"username": "deploybot", "text": text}));

        let mattermost = dispatcher
            .build_request(Provider::Mattermost, text, &message)
            .unwrap();
        let payload: Value = serde_json::from_str(form_field(&mattermost, "payload")).unwrap();
        assert_eq!(payload, json!({"text": text}));

        let telegram = dispatcher
            .build_request(Provider::Telegram, text, &message)
            .unwrap();
        assert_eq!(telegram.url, "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(form_field(&telegram, "chat_id"), "-42");
        assert_eq!(form_field(&telegram, "parse_mode"), "HTML");
        assert_eq!(form_field(&telegram, "disable_web_page_preview"), "true");
        assert_eq!(form_field(&telegram, "text"), text);
    }

    #[test]
    fn test_glip_without_site_has_no_activity() {
        let dispatcher = NotificationDispatcher::new(
            config(vec![]),
            Arc::new(RecordingTransport::default()),
        );
        let request = dispatcher
            .build_request(Provider::Glip, "plain", &NotificationMessage::new("plain"))
            .unwrap();
        let RequestBody::Json(body) = request.body else {
            panic!("expected a JSON body");
        };
        assert!(body.get("activity").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_posts_once_per_provider() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(
            config(vec![Provider::Slack, Provider::Telegram]),
            transport.clone(),
        );

        let report = dispatcher
            .dispatch(&NotificationMessage::new("{greeting}").with("greeting", "hello"))
            .await;

        assert_eq!(report.delivered, vec![Provider::Slack, Provider::Telegram]);
        assert!(report.failures.is_empty());
        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(form_field(&sent[1], "text"), "hello");
    }

    #[tokio::test]
    async fn test_failing_provider_does_not_stop_others() {
        let transport = Arc::new(RecordingTransport::failing_for(Provider::Glip));
        let mut config = config(vec![
            Provider::Glip,
            Provider::Mattermost,
            Provider::Slack,
        ]);
        config.mattermost.webhook = None;
        let dispatcher = NotificationDispatcher::new(config, transport.clone());

        let report = dispatcher.dispatch(&NotificationMessage::new("hi")).await;

        assert_eq!(report.delivered, vec![Provider::Slack]);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|e| matches!(
            e,
            DeployError::NotificationDelivery { .. }
        )));
        // glip was attempted, mattermost never reached the transport
        let providers: Vec<Provider> = transport.requests().iter().map(|r| r.provider).collect();
        assert_eq!(providers, vec![Provider::Glip, Provider::Slack]);
    }

    #[tokio::test]
    async fn test_no_providers_sends_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(config(vec![]), transport.clone());

        let report = dispatcher.dispatch(&NotificationMessage::new("hi")).await;

        assert!(report.delivered.is_empty());
        assert!(transport.requests().is_empty());
    }
}
