//! Microsoft Teams incoming webhook: one Office 365 `MessageCard` per event.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::{ChangeEvent, EventType, Result, SinkType, Subscription};
use reqwest::{Client, Url};
use serde::Serialize;

use super::{
    build_client, change_lines, headline, post_json, DeliveryResult, OutboundRequest,
    SinkPublisher,
};

const CARD_TYPE: &str = "MessageCard";
const CARD_CONTEXT: &str = "http://schema.org/extensions";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsMessageCard {
    #[serde(rename = "@type")]
    pub card_type: &'static str,
    #[serde(rename = "@context")]
    pub context: &'static str,
    pub summary: String,
    pub theme_color: &'static str,
    pub sections: Vec<TeamsSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsSection {
    pub activity_title: String,
    pub activity_subtitle: String,
    pub facts: Vec<TeamsFact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamsFact {
    pub name: String,
    pub value: String,
}

impl TeamsFact {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

fn theme_color(event_type: EventType) -> &'static str {
    match event_type {
        EventType::EntityCreated => "2EB886",
        EventType::EntityUpdated => "0076D7",
        EventType::EntityDeleted => "D00000",
    }
}

impl TeamsMessageCard {
    pub fn from_event(event: &ChangeEvent) -> Self {
        let mut facts = vec![
            TeamsFact::new("Entity type", event.entity_type.clone()),
            TeamsFact::new("Entity", event.display_name()),
            TeamsFact::new("Event", event.event_type.as_str()),
        ];
        if let Some(version) = event.current_version {
            facts.push(TeamsFact::new("Version", version.to_string()));
        }

        let lines = change_lines(event);
        let text = (!lines.is_empty()).then(|| lines.join("<br>"));
        let subtitle = event
            .occurred_at()
            .map(|at| at.to_rfc3339())
            .unwrap_or_default();

        Self {
            card_type: CARD_TYPE,
            context: CARD_CONTEXT,
            summary: headline(event),
            theme_color: theme_color(event.event_type),
            sections: vec![TeamsSection {
                activity_title: headline(event),
                activity_subtitle: subtitle,
                facts,
                text,
            }],
        }
    }
}

pub struct TeamsWebhookPublisher {
    client: Client,
    endpoint: Url,
}

impl TeamsWebhookPublisher {
    pub fn new(subscription: &Subscription) -> Result<Self> {
        Ok(Self {
            client: build_client(subscription)?,
            endpoint: subscription.endpoint_url()?,
        })
    }
}

#[async_trait]
impl SinkPublisher for TeamsWebhookPublisher {
    fn sink_type(&self) -> SinkType {
        SinkType::MsTeams
    }

    fn render(&self, batch: &[Arc<ChangeEvent>]) -> Result<Vec<OutboundRequest>> {
        batch
            .iter()
            .map(|event| -> Result<OutboundRequest> {
                let body = serde_json::to_vec(&TeamsMessageCard::from_event(event))?;
                Ok(OutboundRequest::new(body, 1))
            })
            .collect()
    }

    async fn send(&self, request: &OutboundRequest) -> DeliveryResult {
        post_json(&self.client, &self.endpoint, request).await
    }
}
