//! Subscription configuration and delivery status types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::events::EventType;
use crate::filter::{EventFilter, EventFilterEntry};
use crate::{Error, Result};

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Destination kind of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SinkType {
    /// Generic JSON webhook (whole batch per call, optional HMAC signature).
    Generic,
    /// Slack incoming webhook (one message per event).
    Slack,
    /// Microsoft Teams incoming webhook (one card per event).
    MsTeams,
}

impl SinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkType::Generic => "generic",
            SinkType::Slack => "slack",
            SinkType::MsTeams => "msTeams",
        }
    }
}

impl fmt::Display for SinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    defaults::CONNECT_TIMEOUT_SECS
}

fn default_read_timeout_secs() -> u64 {
    defaults::READ_TIMEOUT_SECS
}

fn default_batch_size() -> usize {
    defaults::BATCH_SIZE
}

/// Configuration for one alert destination.
///
/// Immutable for the lifetime of the consumer built from it; a configuration
/// change replaces the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub name: String,
    pub sink_type: SinkType,
    pub endpoint: String,
    /// HMAC signing secret (generic webhooks only). Never serialized back out.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub event_filters: Vec<EventFilterEntry>,
}

impl Subscription {
    /// Create an enabled subscription with default timeouts and batch size
    /// and no filters (delivers nothing until a filter is added).
    pub fn new(name: impl Into<String>, sink_type: SinkType, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            sink_type,
            endpoint: endpoint.into(),
            secret: None,
            enabled: true,
            connect_timeout_secs: defaults::CONNECT_TIMEOUT_SECS,
            read_timeout_secs: defaults::READ_TIMEOUT_SECS,
            batch_size: defaults::BATCH_SIZE,
            event_filters: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_timeouts(mut self, connect_secs: u64, read_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.read_timeout_secs = read_secs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a filter entry for `event_type`.
    pub fn with_filter<I, S>(mut self, event_type: EventType, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_filters
            .push(EventFilterEntry::new(event_type, entities));
        self
    }

    /// Parsed endpoint; must be an absolute http(s) URL.
    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(&self.endpoint).map_err(|e| {
            Error::InvalidInput(format!("invalid endpoint {:?}: {}", self.endpoint, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::InvalidInput(format!(
                "endpoint scheme must be http or https, got {}",
                other
            ))),
        }
    }

    /// Compile the configured filter entries.
    pub fn filter(&self) -> Result<EventFilter> {
        EventFilter::from_entries(&self.event_filters)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Check the configuration before a consumer is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("subscription name is empty".into()));
        }
        self.endpoint_url()?;
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch size must be at least 1".into()));
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(Error::InvalidInput("timeouts must be at least 1 second".into()));
        }
        self.filter()?;
        Ok(())
    }
}

// =============================================================================
// DELIVERY STATUS
// =============================================================================

/// Delivery state of a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    /// Delivering normally.
    #[default]
    Active,
    /// Last attempt failed with a retriable error; waiting out the backoff.
    AwaitingRetry,
    /// Last attempt failed permanently; the batch was dropped.
    Failed,
}

/// Point-in-time delivery status of one subscription, for operational tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub state: DeliveryState,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_successful_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub last_failed_status_code: Option<u16>,
    pub last_failed_reason: Option<String>,
    /// When the next retry is due (awaiting retry only).
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub current_backoff_ms: u64,
    /// Events successfully delivered to the sink.
    pub delivered_events: u64,
    /// Events dropped by permanent failures.
    pub dropped_events: u64,
    /// Events lost to the bus ring wrapping while this subscription lagged.
    pub missed_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Subscription {
        Subscription::new("ops", SinkType::Generic, "https://hooks.example.com/catalog")
            .with_filter(EventType::EntityCreated, ["*"])
    }

    #[test]
    fn test_subscription_defaults() {
        let sub = Subscription::new("ops", SinkType::Slack, "https://hooks.slack.com/x");
        assert!(sub.enabled);
        assert_eq!(sub.batch_size, 10);
        assert_eq!(sub.connect_timeout(), Duration::from_secs(10));
        assert_eq!(sub.read_timeout(), Duration::from_secs(12));
        assert!(sub.event_filters.is_empty());
        assert!(sub.secret.is_none());
    }

    #[test]
    fn test_subscription_validate_ok() {
        valid().validate().unwrap();
    }

    #[test]
    fn test_subscription_validate_rejects_bad_endpoint() {
        let mut sub = valid();
        sub.endpoint = "not a url".into();
        assert!(matches!(sub.validate(), Err(Error::InvalidInput(_))));

        sub.endpoint = "ftp://files.example.com/drop".into();
        let err = sub.validate().unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_subscription_validate_rejects_zero_batch_and_timeouts() {
        assert!(valid().with_batch_size(0).validate().is_err());
        assert!(valid().with_timeouts(0, 5).validate().is_err());
        assert!(valid().with_timeouts(5, 0).validate().is_err());
    }

    #[test]
    fn test_subscription_validate_rejects_bad_filter() {
        let sub = valid().with_filter(EventType::EntityCreated, ["table"]);
        assert!(sub.validate().is_err());
    }

    #[test]
    fn test_subscription_secret_never_serialized() {
        let sub = valid().with_secret("s3cr3t");
        let json = serde_json::to_string(&sub).unwrap();
        assert!(!json.contains("s3cr3t"));
        assert!(json.contains(r#""sinkType":"generic""#));
    }

    #[test]
    fn test_subscription_deserialize_applies_defaults() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000001",
            "name": "teams-alerts",
            "sinkType": "msTeams",
            "endpoint": "https://example.webhook.office.com/hook",
            "secret": "abc",
            "eventFilters": [{"eventType": "entityDeleted", "entities": ["*"]}]
        }"#;
        let sub: Subscription = serde_json::from_str(json).unwrap();
        assert_eq!(sub.sink_type, SinkType::MsTeams);
        assert_eq!(sub.secret.as_deref(), Some("abc"));
        assert!(sub.enabled);
        assert_eq!(sub.batch_size, defaults::BATCH_SIZE);
        assert_eq!(sub.read_timeout_secs, defaults::READ_TIMEOUT_SECS);
        assert!(sub.filter().unwrap().matches_types(EventType::EntityDeleted, "x"));
    }

    #[test]
    fn test_delivery_status_default_is_active() {
        let status = DeliveryStatus::default();
        assert_eq!(status.state, DeliveryState::Active);
        assert_eq!(status.current_backoff_ms, 0);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "active");
        assert!(json["lastFailedReason"].is_null());
    }
}
