//! # beacon-alerts
//!
//! Per-subscription delivery of catalog change events.
//!
//! Each enabled [`Subscription`](beacon_core::Subscription) gets its own
//! [`SubscriptionConsumer`] task reading the shared
//! [`EventBus`](beacon_core::EventBus). The consumer filters events, groups
//! them into batches and hands each batch to a [`Sink`]: a generic JSON
//! webhook (optionally HMAC-signed), a Slack webhook or a Teams webhook.
//! Failures climb a fixed [`Backoff`] ladder without blocking other
//! subscriptions, and every consumer publishes its [`DeliveryStatus`] through
//! a [`StatusReader`].
//!
//! [`AlertRegistry`] owns the consumers and replaces them on configuration
//! changes.
//!
//! ```ignore
//! let registry = AlertRegistry::from_config(&AlertsConfig::from_env()).await?;
//! registry.bus().publish(event)?;
//! ```
//!
//! [`DeliveryStatus`]: beacon_core::DeliveryStatus

pub mod backoff;
pub mod config;
pub mod consumer;
pub mod registry;
pub mod secrets;
pub mod signing;
pub mod sink;
pub mod status;

pub use backoff::Backoff;
pub use config::{AlertsConfig, SubscriptionSet};
pub use consumer::{ConsumerExit, ConsumerOutcome, SubscriptionConsumer};
pub use registry::AlertRegistry;
pub use secrets::{SecretProvider, StaticSecrets, SubscriptionSecrets};
pub use sink::{
    DeliveryResult, GenericWebhookPublisher, OutboundRequest, Sink, SinkPublisher,
    SlackWebhookPublisher, TeamsWebhookPublisher,
};
pub use status::{StatusReader, StatusTracker};
