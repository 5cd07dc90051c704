//! Registry of running subscription consumers.
//!
//! Maps subscription id to its consumer task. A configuration change never
//! mutates a running consumer: [`AlertRegistry::update`] tears the old one
//! down (awaiting its exit) and starts a replacement at the first sequence
//! the old consumer did not finish, so held events are redelivered rather
//! than lost.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{DeliveryStatus, Error, EventBus, Result, Subscription};
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AlertsConfig, SubscriptionSet};
use crate::consumer::{ConsumerOutcome, SubscriptionConsumer};
use crate::secrets::{SecretProvider, SubscriptionSecrets};
use crate::sink::Sink;
use crate::status::StatusReader;

/// Dropping a `RunningConsumer` cancels its task.
struct RunningConsumer {
    cancel: DropGuard,
    handle: JoinHandle<ConsumerOutcome>,
    status: StatusReader,
}

impl RunningConsumer {
    /// Cancel and wait for the task. Returns where a replacement should resume.
    async fn stop(self) -> Option<u64> {
        self.cancel.disarm().cancel();
        match self.handle.await {
            Ok(outcome) => Some(outcome.resume_from),
            Err(e) => {
                error!(error = ?e, "Consumer task panicked");
                None
            }
        }
    }
}

struct Entry {
    subscription: Subscription,
    /// `None` while the subscription is disabled.
    consumer: Option<RunningConsumer>,
}

/// Owns every subscription consumer fed by one [`EventBus`].
pub struct AlertRegistry {
    bus: EventBus,
    secrets: Arc<dyn SecretProvider>,
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl AlertRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            secrets: Arc::new(SubscriptionSecrets),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_secret_provider(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Build a registry from process config and start every configured
    /// subscription. With alerting disabled the registry starts empty.
    pub async fn start(config: &AlertsConfig, bus: EventBus) -> Result<Self> {
        let registry = Self::new(bus);
        if !config.enabled {
            info!("Alerting is disabled, no subscription consumers started");
            return Ok(registry);
        }
        let set = config.load_subscriptions()?;
        registry.load(&set).await?;
        Ok(registry)
    }

    /// Create the event bus sized by `config.bus_capacity` and start a
    /// registry on it. Producers publish through [`AlertRegistry::bus`].
    pub async fn from_config(config: &AlertsConfig) -> Result<Self> {
        Self::start(config, EventBus::new(config.bus_capacity)).await
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register every subscription in `set`. Returns how many were started.
    pub async fn load(&self, set: &SubscriptionSet) -> Result<usize> {
        set.validate()?;
        let mut started = 0;
        for subscription in &set.subscriptions {
            if self.add(subscription.clone()).await? {
                started += 1;
            }
        }
        info!(count = set.len(), started, "Subscription set registered");
        Ok(started)
    }

    /// Register a new subscription. Returns whether a consumer was started
    /// (disabled subscriptions are recorded but not started).
    ///
    /// The consumer replays events still retained on the bus.
    pub async fn add(&self, subscription: Subscription) -> Result<bool> {
        subscription.validate()?;
        let mut entries = self.entries.write().await;
        if entries.contains_key(&subscription.id) {
            return Err(Error::InvalidInput(format!(
                "subscription {} is already registered",
                subscription.id
            )));
        }

        let consumer = if subscription.enabled {
            Some(self.spawn(&subscription, None)?)
        } else {
            debug!(subscription_id = %subscription.id, "Subscription disabled, not started");
            None
        };
        let started = consumer.is_some();
        info!(
            subscription_id = %subscription.id,
            subscription_name = %subscription.name,
            sink_type = %subscription.sink_type,
            started,
            "Subscription added"
        );
        entries.insert(
            subscription.id,
            Entry {
                subscription,
                consumer,
            },
        );
        Ok(started)
    }

    /// Replace a subscription's configuration. The running consumer, if any,
    /// is torn down first; a new one starts if the subscription is enabled.
    /// An unknown subscription is registered as if added.
    pub async fn update(&self, subscription: Subscription) -> Result<bool> {
        subscription.validate()?;
        let mut entries = self.entries.write().await;

        let resume_from = match entries.remove(&subscription.id) {
            Some(Entry {
                consumer: Some(running),
                ..
            }) => running.stop().await,
            Some(Entry { consumer: None, .. }) | None => None,
        };

        let consumer = if subscription.enabled {
            Some(self.spawn(&subscription, resume_from)?)
        } else {
            None
        };
        let started = consumer.is_some();
        info!(
            subscription_id = %subscription.id,
            started,
            sequence = ?resume_from,
            "Subscription updated"
        );
        entries.insert(
            subscription.id,
            Entry {
                subscription,
                consumer,
            },
        );
        Ok(started)
    }

    /// Tear down and forget a subscription.
    pub async fn remove(&self, id: Uuid) -> Result<Subscription> {
        let entry = self
            .entries
            .write()
            .await
            .remove(&id)
            .ok_or(Error::SubscriptionNotFound(id))?;
        if let Some(running) = entry.consumer {
            running.stop().await;
        }
        info!(subscription_id = %id, "Subscription removed");
        Ok(entry.subscription)
    }

    pub async fn subscription(&self, id: Uuid) -> Option<Subscription> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.subscription.clone())
    }

    /// Current delivery status; `None` for unknown or disabled subscriptions.
    pub async fn status(&self, id: Uuid) -> Option<DeliveryStatus> {
        self.watch(id).await.map(|reader| reader.snapshot())
    }

    /// Status reader for awaiting changes; `None` for unknown or disabled
    /// subscriptions.
    pub async fn watch(&self, id: Uuid) -> Option<StatusReader> {
        self.entries
            .read()
            .await
            .get(&id)
            .and_then(|entry| entry.consumer.as_ref())
            .map(|running| running.status.clone())
    }

    /// Status of every running consumer.
    pub async fn statuses(&self) -> Vec<(Uuid, DeliveryStatus)> {
        let entries = self.entries.read().await;
        let mut statuses: Vec<_> = entries
            .iter()
            .filter_map(|(id, entry)| {
                entry
                    .consumer
                    .as_ref()
                    .map(|running| (*id, running.status.snapshot()))
            })
            .collect();
        statuses.sort_by_key(|(id, _)| *id);
        statuses
    }

    /// Number of registered subscriptions, running or disabled.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of running consumers.
    pub async fn running(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.consumer.is_some())
            .count()
    }

    /// Tear down every consumer. Subscriptions stay registered but stopped.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.write().await;
        let running: Vec<_> = entries
            .values_mut()
            .filter_map(|entry| entry.consumer.take())
            .collect();
        let count = running.len();
        join_all(running.into_iter().map(RunningConsumer::stop)).await;
        info!(count, "All subscription consumers stopped");
    }

    fn spawn(
        &self,
        subscription: &Subscription,
        resume_from: Option<u64>,
    ) -> Result<RunningConsumer> {
        let sink = Sink::from_subscription(subscription, self.secrets.as_ref())?;
        let cancel = CancellationToken::new();
        let (consumer, status) = SubscriptionConsumer::new(subscription, sink, cancel.clone())?;

        let subscriber = match resume_from {
            Some(sequence) => self.bus.subscribe_at(sequence),
            None => self.bus.subscribe(),
        };
        if self.bus.is_closed() {
            warn!(subscription_id = %subscription.id, "Starting consumer on a closed bus");
        }
        let handle = tokio::spawn(consumer.run(subscriber));

        Ok(RunningConsumer {
            cancel: cancel.drop_guard(),
            handle,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{EventType, SinkType};

    fn subscription(name: &str) -> Subscription {
        // Port 9 (discard) on localhost: nothing is delivered in these tests.
        Subscription::new(name, SinkType::Generic, "http://127.0.0.1:9/hook")
            .with_filter(EventType::EntityCreated, ["*"])
    }

    #[tokio::test]
    async fn test_add_starts_consumer() {
        let bus = EventBus::new(16);
        let registry = AlertRegistry::new(bus.clone());
        let sub = subscription("a");

        assert!(registry.add(sub.clone()).await.unwrap());
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.running().await, 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(registry.status(sub.id).await.is_some());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_disabled_records_without_starting() {
        let bus = EventBus::new(16);
        let registry = AlertRegistry::new(bus.clone());
        let sub = subscription("off").with_enabled(false);

        assert!(!registry.add(sub.clone()).await.unwrap());
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.running().await, 0);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(registry.status(sub.id).await.is_none());
        assert_eq!(registry.subscription(sub.id).await, Some(sub));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_and_invalid() {
        let registry = AlertRegistry::new(EventBus::new(16));
        let sub = subscription("a");
        registry.add(sub.clone()).await.unwrap();
        assert!(matches!(
            registry.add(sub).await,
            Err(Error::InvalidInput(_))
        ));

        let invalid = subscription("b").with_batch_size(0);
        assert!(registry.add(invalid).await.is_err());
        assert_eq!(registry.len().await, 1);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_replaces_consumer() {
        let bus = EventBus::new(16);
        let registry = AlertRegistry::new(bus.clone());
        let sub = subscription("a");
        registry.add(sub.clone()).await.unwrap();

        let disabled = sub.clone().with_enabled(false);
        assert!(!registry.update(disabled).await.unwrap());
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(registry.running().await, 0);

        let renamed = Subscription {
            name: "renamed".into(),
            ..sub.clone()
        };
        assert!(registry.update(renamed).await.unwrap());
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            registry.subscription(sub.id).await.unwrap().name,
            "renamed"
        );

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_unknown_registers_it() {
        let bus = EventBus::new(16);
        let registry = AlertRegistry::new(bus.clone());
        let sub = subscription("new");

        assert!(registry.update(sub.clone()).await.unwrap());
        assert_eq!(registry.len().await, 1);
        assert_eq!(bus.subscriber_count(), 1);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_stops_consumer() {
        let bus = EventBus::new(16);
        let registry = AlertRegistry::new(bus.clone());
        let sub = subscription("a");
        registry.add(sub.clone()).await.unwrap();

        let removed = registry.remove(sub.id).await.unwrap();
        assert_eq!(removed.id, sub.id);
        assert!(registry.is_empty().await);
        assert_eq!(bus.subscriber_count(), 0);

        assert!(matches!(
            registry.remove(sub.id).await,
            Err(Error::SubscriptionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_all() {
        let bus = EventBus::new(16);
        let registry = AlertRegistry::new(bus.clone());
        for name in ["a", "b", "c"] {
            registry.add(subscription(name)).await.unwrap();
        }
        assert_eq!(bus.subscriber_count(), 3);

        registry.shutdown().await;
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(registry.running().await, 0);
        assert_eq!(registry.len().await, 3);
        assert!(registry.statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_drop_without_shutdown_stops_consumers() {
        let bus = EventBus::new(16);
        let registry = AlertRegistry::new(bus.clone());
        registry.add(subscription("a")).await.unwrap();
        registry.add(subscription("b")).await.unwrap();
        assert_eq!(bus.subscriber_count(), 2);

        drop(registry);

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while bus.subscriber_count() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("consumers released their subscribers");
    }

    #[tokio::test]
    async fn test_from_config_sizes_bus() {
        let config = AlertsConfig::default()
            .with_enabled(false)
            .with_bus_capacity(32);
        let registry = AlertRegistry::from_config(&config).await.unwrap();
        assert_eq!(registry.bus().capacity(), 32);
    }

    #[tokio::test]
    async fn test_start_disabled_config() {
        let config = AlertsConfig::default().with_enabled(false);
        let registry = AlertRegistry::start(&config, EventBus::new(16)).await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_load_counts_started() {
        let registry = AlertRegistry::new(EventBus::new(16));
        let set = SubscriptionSet {
            subscriptions: vec![
                subscription("on"),
                subscription("off").with_enabled(false),
            ],
        };
        assert_eq!(registry.load(&set).await.unwrap(), 1);
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.statuses().await.len(), 1);

        registry.shutdown().await;
    }
}
