//! Slack incoming webhook: one message per event.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::{ChangeEvent, EventType, Result, SinkType, Subscription};
use reqwest::{Client, Url};
use serde::Serialize;

use super::{
    build_client, change_lines, headline, post_json, DeliveryResult, OutboundRequest,
    SinkPublisher,
};

/// Slack webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlackMessage {
    pub text: String,
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlackAttachment {
    pub color: &'static str,
    pub title: String,
    pub text: String,
    pub footer: String,
    /// Event time, epoch seconds.
    pub ts: i64,
}

fn color(event_type: EventType) -> &'static str {
    match event_type {
        EventType::EntityCreated => "#36a64f",
        EventType::EntityUpdated => "#439FE0",
        EventType::EntityDeleted => "#d00000",
    }
}

impl SlackMessage {
    pub fn from_event(event: &ChangeEvent) -> Self {
        let lines = change_lines(event);
        let text = if lines.is_empty() {
            format!("{} {}", event.entity_type, event.event_type.verb())
        } else {
            lines
                .iter()
                .map(|line| format!("• {}", line))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let footer = match (event.previous_version, event.current_version) {
            (Some(prev), Some(cur)) => format!("version {} → {}", prev, cur),
            (None, Some(cur)) => format!("version {}", cur),
            _ => event.event_type.to_string(),
        };

        Self {
            text: format!("*{}*", headline(event)),
            attachments: vec![SlackAttachment {
                color: color(event.event_type),
                title: event.display_name(),
                text,
                footer,
                ts: event.timestamp / 1000,
            }],
        }
    }
}

pub struct SlackWebhookPublisher {
    client: Client,
    endpoint: Url,
}

impl SlackWebhookPublisher {
    pub fn new(subscription: &Subscription) -> Result<Self> {
        Ok(Self {
            client: build_client(subscription)?,
            endpoint: subscription.endpoint_url()?,
        })
    }
}

#[async_trait]
impl SinkPublisher for SlackWebhookPublisher {
    fn sink_type(&self) -> SinkType {
        SinkType::Slack
    }

    fn render(&self, batch: &[Arc<ChangeEvent>]) -> Result<Vec<OutboundRequest>> {
        batch
            .iter()
            .map(|event| -> Result<OutboundRequest> {
                let body = serde_json::to_vec(&SlackMessage::from_event(event))?;
                Ok(OutboundRequest::new(body, 1))
            })
            .collect()
    }

    async fn send(&self, request: &OutboundRequest) -> DeliveryResult {
        post_json(&self.client, &self.endpoint, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{ChangeDescription, FieldChange};
    use serde_json::json;
    use uuid::Uuid;

    fn updated_table() -> ChangeEvent {
        ChangeEvent::new(EventType::EntityUpdated, "table", Uuid::nil())
            .with_fqn("warehouse.sales.orders")
            .with_user("alice")
            .with_versions(0.1, 0.2)
            .with_change_description(ChangeDescription {
                fields_updated: vec![FieldChange::new(
                    "owner",
                    Some(json!("alice")),
                    Some(json!("bob")),
                )],
                ..Default::default()
            })
    }

    #[test]
    fn test_message_shape() {
        let message = SlackMessage::from_event(&updated_table());
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(
            value["text"],
            "*table warehouse.sales.orders was updated by alice*"
        );
        let attachment = &value["attachments"][0];
        assert_eq!(attachment["color"], "#439FE0");
        assert_eq!(attachment["title"], "warehouse.sales.orders");
        assert_eq!(attachment["text"], "• Updated `owner`: alice → bob");
        assert_eq!(attachment["footer"], "version 0.1 → 0.2");
    }

    #[test]
    fn test_message_without_change_description() {
        let event = ChangeEvent::new(EventType::EntityDeleted, "dashboard", Uuid::nil());
        let message = SlackMessage::from_event(&event);
        assert_eq!(message.attachments[0].text, "dashboard deleted");
        assert_eq!(message.attachments[0].color, "#d00000");
        assert!(message.text.contains("by unknown"));
    }

    #[test]
    fn test_render_one_request_per_event() {
        let sub = Subscription::new("chat", SinkType::Slack, "https://hooks.slack.com/services/x");
        let sink = SlackWebhookPublisher::new(&sub).unwrap();
        let batch: Vec<_> = (0..3).map(|_| Arc::new(updated_table())).collect();

        let requests = sink.render(&batch).unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.events == 1 && r.signature.is_none()));
        assert_eq!(sink.sink_type(), SinkType::Slack);
    }
}
