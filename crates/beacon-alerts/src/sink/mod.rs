//! Sink publishers: deliver batches of change events to one destination.
//!
//! A sink renders a batch into an ordered list of [`OutboundRequest`]s and
//! sends them one at a time. The generic webhook sends the whole batch in one
//! request; chat sinks send one message per event. Keeping render and send
//! apart lets the consumer retry exactly the request that failed, so a chat
//! batch resumes at the failed event instead of starting over.
//! [`SinkPublisher::publish`] is the single-shot form: render, then send until
//! the first failure, with no retry.
//!
//! ## Result classification
//!
//! | Outcome | Result |
//! |---------|--------|
//! | 2xx | [`DeliveryResult::Success`] |
//! | 3xx (redirects are never followed) | [`DeliveryResult::PermanentFailure`] |
//! | 4xx, 5xx | [`DeliveryResult::RetriableFailure`] |
//! | any other status | [`DeliveryResult::PermanentFailure`] |
//! | unresolvable host | [`DeliveryResult::PermanentFailure`] |
//! | timeout, refused connection, other I/O | [`DeliveryResult::RetriableFailure`] |

pub mod generic;
pub mod slack;
pub mod teams;

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::defaults::{SIGNATURE_HEADER, USER_AGENT};
use beacon_core::{ChangeEvent, FieldChange, Result, SinkType, Subscription};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::secrets::SecretProvider;

pub use generic::GenericWebhookPublisher;
pub use slack::{SlackMessage, SlackWebhookPublisher};
pub use teams::{TeamsMessageCard, TeamsWebhookPublisher};

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Success,
    /// Worth retrying after a backoff (4xx/5xx, timeouts, connection errors).
    RetriableFailure {
        status: Option<u16>,
        reason: String,
    },
    /// Retrying cannot help (redirects, unresolvable host, unrenderable payload).
    PermanentFailure {
        status: Option<u16>,
        reason: String,
    },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Success)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryResult::Success => None,
            DeliveryResult::RetriableFailure { status, .. }
            | DeliveryResult::PermanentFailure { status, .. } => *status,
        }
    }
}

/// One rendered HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Exact body bytes; the signature is computed over these.
    pub body: Vec<u8>,
    /// `X-Beacon-Signature` value, when the sink signs.
    pub signature: Option<String>,
    /// Number of change events this request carries.
    pub events: usize,
}

impl OutboundRequest {
    pub fn new(body: Vec<u8>, events: usize) -> Self {
        Self {
            body,
            signature: None,
            events,
        }
    }

    pub fn with_signature(mut self, signature: String) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// A delivery destination.
#[async_trait]
pub trait SinkPublisher: Send + Sync {
    fn sink_type(&self) -> SinkType;

    /// Render a non-empty batch into requests, in delivery order.
    fn render(&self, batch: &[Arc<ChangeEvent>]) -> Result<Vec<OutboundRequest>>;

    /// Send one rendered request and classify the outcome.
    async fn send(&self, request: &OutboundRequest) -> DeliveryResult;

    /// Render and send a whole batch once, stopping at the first failure.
    async fn publish(&self, batch: &[Arc<ChangeEvent>]) -> DeliveryResult {
        let requests = match self.render(batch) {
            Ok(requests) => requests,
            Err(e) => {
                return DeliveryResult::PermanentFailure {
                    status: None,
                    reason: e.to_string(),
                }
            }
        };
        for request in &requests {
            let result = self.send(request).await;
            if !result.is_success() {
                return result;
            }
        }
        DeliveryResult::Success
    }
}

/// Sink selected from a subscription's [`SinkType`].
pub enum Sink {
    Generic(GenericWebhookPublisher),
    Slack(SlackWebhookPublisher),
    Teams(TeamsWebhookPublisher),
}

impl Sink {
    pub fn from_subscription(
        subscription: &Subscription,
        secrets: &dyn SecretProvider,
    ) -> Result<Self> {
        Ok(match subscription.sink_type {
            SinkType::Generic => {
                Sink::Generic(GenericWebhookPublisher::new(subscription, secrets)?)
            }
            SinkType::Slack => Sink::Slack(SlackWebhookPublisher::new(subscription)?),
            SinkType::MsTeams => Sink::Teams(TeamsWebhookPublisher::new(subscription)?),
        })
    }
}

#[async_trait]
impl SinkPublisher for Sink {
    fn sink_type(&self) -> SinkType {
        match self {
            Sink::Generic(sink) => sink.sink_type(),
            Sink::Slack(sink) => sink.sink_type(),
            Sink::Teams(sink) => sink.sink_type(),
        }
    }

    fn render(&self, batch: &[Arc<ChangeEvent>]) -> Result<Vec<OutboundRequest>> {
        match self {
            Sink::Generic(sink) => sink.render(batch),
            Sink::Slack(sink) => sink.render(batch),
            Sink::Teams(sink) => sink.render(batch),
        }
    }

    async fn send(&self, request: &OutboundRequest) -> DeliveryResult {
        match self {
            Sink::Generic(sink) => sink.send(request).await,
            Sink::Slack(sink) => sink.send(request).await,
            Sink::Teams(sink) => sink.send(request).await,
        }
    }
}

// =============================================================================
// HTTP PLUMBING
// =============================================================================

/// Build the per-subscription HTTP client. Redirects are disabled so a 3xx
/// surfaces as a permanent failure instead of being followed.
pub(crate) fn build_client(subscription: &Subscription) -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(subscription.connect_timeout())
        .read_timeout(subscription.read_timeout())
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// POST a JSON body and classify the outcome.
pub(crate) async fn post_json(
    client: &Client,
    endpoint: &Url,
    request: &OutboundRequest,
) -> DeliveryResult {
    let mut builder = client
        .post(endpoint.clone())
        .header(CONTENT_TYPE, "application/json");
    if let Some(signature) = &request.signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }

    match builder.body(request.body.clone()).send().await {
        Ok(response) => {
            let result = classify_status(response.status());
            debug!(
                status_code = response.status().as_u16(),
                events = request.events,
                "Sink responded"
            );
            result
        }
        Err(e) => classify_transport_error(&e),
    }
}

/// Classify an HTTP response status.
pub fn classify_status(status: StatusCode) -> DeliveryResult {
    let code = status.as_u16();
    let reason = status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", code));

    if status.is_success() {
        DeliveryResult::Success
    } else if status.is_redirection() {
        DeliveryResult::PermanentFailure {
            status: Some(code),
            reason,
        }
    } else if status.is_client_error() || status.is_server_error() {
        DeliveryResult::RetriableFailure {
            status: Some(code),
            reason,
        }
    } else {
        DeliveryResult::PermanentFailure {
            status: Some(code),
            reason,
        }
    }
}

/// Classify a request that never produced a response.
pub fn classify_transport_error(error: &reqwest::Error) -> DeliveryResult {
    let reason = error_chain(error);
    if is_name_resolution_failure(&reason) {
        DeliveryResult::PermanentFailure {
            status: None,
            reason: format!("unresolvable host: {}", reason),
        }
    } else {
        DeliveryResult::RetriableFailure {
            status: None,
            reason,
        }
    }
}

fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn is_name_resolution_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("no such host")
}

// =============================================================================
// CHAT MESSAGE HELPERS
// =============================================================================

const MAX_VALUE_CHARS: usize = 200;

/// Render a field value for a chat line: strings verbatim, everything else as
/// compact JSON, truncated.
pub(crate) fn format_value(value: Option<&JsonValue>) -> String {
    let raw = match value {
        None | Some(JsonValue::Null) => return "∅".to_string(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if raw.chars().count() > MAX_VALUE_CHARS {
        let truncated: String = raw.chars().take(MAX_VALUE_CHARS).collect();
        format!("{}…", truncated)
    } else {
        raw
    }
}

/// Human-readable change lines for an event's change description.
pub(crate) fn change_lines(event: &ChangeEvent) -> Vec<String> {
    let Some(description) = &event.change_description else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    let line = |prefix: &str, field: &FieldChange, value: String| {
        format!("{} `{}`: {}", prefix, field.name, value)
    };
    for field in &description.fields_added {
        lines.push(line("Added", field, format_value(field.new_value.as_ref())));
    }
    for field in &description.fields_updated {
        lines.push(line(
            "Updated",
            field,
            format!(
                "{} → {}",
                format_value(field.old_value.as_ref()),
                format_value(field.new_value.as_ref())
            ),
        ));
    }
    for field in &description.fields_deleted {
        lines.push(format!("Deleted `{}`", field.name));
    }
    lines
}

/// Headline shared by chat sinks, e.g. `table sales.orders was updated by alice`.
pub(crate) fn headline(event: &ChangeEvent) -> String {
    format!(
        "{} {} was {} by {}",
        event.entity_type,
        event.display_name(),
        event.event_type.verb(),
        event.user_name.as_deref().unwrap_or("unknown")
    )
}
