//! Generic JSON webhook.
//!
//! One POST per batch with a [`ChangeEventList`] body. When the secret
//! provider yields a secret, the request carries
//! `X-Beacon-Signature: sha256=<hex>` over the exact body bytes.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::{ChangeEvent, ChangeEventList, Result, SinkType, Subscription};
use reqwest::{Client, Url};
use tracing::debug;

use super::{build_client, post_json, DeliveryResult, OutboundRequest, SinkPublisher};
use crate::secrets::SecretProvider;
use crate::signing;

pub struct GenericWebhookPublisher {
    client: Client,
    endpoint: Url,
    secret: Option<String>,
}

impl GenericWebhookPublisher {
    pub fn new(subscription: &Subscription, secrets: &dyn SecretProvider) -> Result<Self> {
        let endpoint = subscription.endpoint_url()?;
        let secret = secrets.signing_secret(subscription);
        debug!(
            subscription_id = %subscription.id,
            signed = secret.is_some(),
            "Generic webhook publisher configured"
        );
        Ok(Self {
            client: build_client(subscription)?,
            endpoint,
            secret,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn is_signed(&self) -> bool {
        self.secret.is_some()
    }
}

#[async_trait]
impl SinkPublisher for GenericWebhookPublisher {
    fn sink_type(&self) -> SinkType {
        SinkType::Generic
    }

    fn render(&self, batch: &[Arc<ChangeEvent>]) -> Result<Vec<OutboundRequest>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let list = ChangeEventList::new(batch.iter().map(|event| event.as_ref()));
        let body = serde_json::to_vec(&list)?;
        let mut request = OutboundRequest::new(body, batch.len());
        if let Some(secret) = &self.secret {
            let signature = signing::sign(secret, &request.body)?;
            request = request.with_signature(signature);
        }
        Ok(vec![request])
    }

    async fn send(&self, request: &OutboundRequest) -> DeliveryResult {
        post_json(&self.client, &self.endpoint, request).await
    }
}
