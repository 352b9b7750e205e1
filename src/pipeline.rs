//! Request pipeline: verify, decode, route.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::DeployConfig;
use crate::deploy::{CommandRunner, Deployer};
use crate::error::{DeployError, Result};
use crate::markdown::escape_html;
use crate::notify::{DispatchReport, HttpTransport, NotificationDispatcher, NotificationMessage};
use crate::payload::{PushEvent, WebhookEvent, WebhookRequest};
use crate::signature::verify_signature;

/// What the HTTP layer should answer once the pipeline succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Completed,
    /// The event type is not handled; `body` is a diagnostic for the caller.
    UnknownEvent { body: String },
}

pub struct GitDeploy {
    config: Arc<DeployConfig>,
    deployer: Deployer,
    dispatcher: NotificationDispatcher,
}

impl GitDeploy {
    pub fn new(
        config: Arc<DeployConfig>,
        runner: Arc<dyn CommandRunner>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            deployer: Deployer::new(config.clone(), runner),
            dispatcher: NotificationDispatcher::new(config.notifications.clone(), transport),
            config,
        }
    }

    /// The base URL of this site, as reported in notifications.
    pub fn site_url(&self, request: &WebhookRequest) -> String {
        match (&self.config.site_url, &request.host) {
            (Some(url), _) => url.clone(),
            (None, Some(host)) => format!("http://{}/", host),
            (None, None) => String::new(),
        }
    }

    pub async fn handle(&self, request: &WebhookRequest) -> Result<HookOutcome> {
        self.authenticate(request)?;
        self.process(request).await
    }

    /// Signature and header checks. Cheap, and safe to run outside the deploy lock.
    pub fn authenticate(&self, request: &WebhookRequest) -> Result<()> {
        if self.config.verifies_signature() {
            verify_signature(
                &self.config.hook_secret,
                &request.body,
                request.signature.as_deref(),
            )?;
        }
        request.require_headers()?;
        Ok(())
    }

    /// Decodes and routes an authenticated request.
    pub async fn process(&self, request: &WebhookRequest) -> Result<HookOutcome> {
        let (_, event_name) = request.require_headers()?;
        let payload = request.decode_payload()?;

        // only push payloads are typed strictly, so only a push can fail here
        let event = match WebhookEvent::from_payload(event_name, payload) {
            Ok(event) => event,
            Err(e) => {
                self.report_push_error(&e, request).await;
                return Ok(HookOutcome::Completed);
            }
        };

        match event {
            WebhookEvent::Ping(payload) => {
                self.handle_ping(&payload, request).await;
                Ok(HookOutcome::Completed)
            }
            WebhookEvent::Push(push) => {
                self.handle_push(&push, request).await;
                Ok(HookOutcome::Completed)
            }
            WebhookEvent::Unrecognized { event, payload } => {
                warn!("Unhandled event '{}'", event);
                let body = if self.config.echo_unrecognized_payload {
                    format!("Event: {} Payload: \n{}", event, payload)
                } else {
                    format!("Event: {}", event)
                };
                Ok(HookOutcome::UnknownEvent { body })
            }
        }
    }

    async fn handle_ping(&self, payload: &Value, request: &WebhookRequest) -> DispatchReport {
        info!("Received ping");
        let pretty = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        let template = format!("{}<pre>{{payload}}</pre>", self.config.messages.ping_title);
        let message = NotificationMessage::new(template)
            .with("payload", escape_html(&pretty))
            .with("currentSite", self.site_url(request));
        self.dispatcher.dispatch(&message).await
    }

    async fn handle_push(&self, push: &PushEvent, request: &WebhookRequest) {
        let site_url = self.site_url(request);
        match self.deployer.deploy(push, &site_url).await {
            Ok(Some(result)) => {
                if self.config.notifications.enabled {
                    let message = result.to_message(&self.config.messages);
                    self.dispatcher.dispatch(&message).await;
                } else {
                    debug!("Notifications are disabled, not reporting the deployment");
                }
            }
            Ok(None) => {}
            Err(e) => self.report_push_error(&e, request).await,
        }
    }

    /// Push failures are reported to the operator instead of the caller.
    async fn report_push_error(&self, e: &DeployError, request: &WebhookRequest) {
        error!("Push handling failed: {}", e);
        let message = NotificationMessage::new(self.config.messages.deploy_error.clone())
            .with("error", escape_html(&e.to_string()))
            .with("currentSite", self.site_url(request));
        self.dispatcher.dispatch(&message).await;
    }
}
