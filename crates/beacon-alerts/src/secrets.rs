//! Signing-secret lookup for generic webhook sinks.
//!
//! Sinks never read process-wide state for secrets; a [`SecretProvider`] is
//! passed in when the sink is built.

use std::collections::HashMap;

use beacon_core::Subscription;
use uuid::Uuid;

/// Resolves the HMAC signing secret for a subscription.
pub trait SecretProvider: Send + Sync {
    /// Secret for `subscription`, or `None` to send unsigned.
    fn signing_secret(&self, subscription: &Subscription) -> Option<String>;
}

/// Uses the secret configured inline on the subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionSecrets;

impl SecretProvider for SubscriptionSecrets {
    fn signing_secret(&self, subscription: &Subscription) -> Option<String> {
        subscription
            .secret
            .clone()
            .filter(|secret| !secret.is_empty())
    }
}

/// Explicit subscription-id → secret table, for secrets kept out of the
/// subscription file. Falls back to the inline secret when no entry exists.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    secrets: HashMap<Uuid, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, subscription_id: Uuid, secret: impl Into<String>) -> Self {
        self.insert(subscription_id, secret);
        self
    }

    pub fn insert(&mut self, subscription_id: Uuid, secret: impl Into<String>) {
        self.secrets.insert(subscription_id, secret.into());
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl SecretProvider for StaticSecrets {
    fn signing_secret(&self, subscription: &Subscription) -> Option<String> {
        match self.secrets.get(&subscription.id) {
            Some(secret) if !secret.is_empty() => Some(secret.clone()),
            Some(_) => None,
            None => SubscriptionSecrets.signing_secret(subscription),
        }
    }
}
