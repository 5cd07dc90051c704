//! Alerting configuration: process settings and the subscription set.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use beacon_core::{defaults, Error, Result, Subscription};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Process-level alerting settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertsConfig {
    /// Whether subscription consumers are started at all.
    pub enabled: bool,
    /// Ring capacity of the event bus built by
    /// [`AlertRegistry::from_config`](crate::AlertRegistry::from_config).
    /// Callers that create their own bus pass it to `AlertRegistry::start`.
    pub bus_capacity: usize,
    /// YAML or JSON file holding the subscription set.
    pub subscriptions_file: Option<PathBuf>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bus_capacity: defaults::EVENT_BUS_CAPACITY,
            subscriptions_file: None,
        }
    }
}

impl AlertsConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `BEACON_ALERTS_ENABLED` | `true` | Start subscription consumers |
    /// | `BEACON_BUS_CAPACITY` | `1024` | Event bus ring capacity |
    /// | `BEACON_SUBSCRIPTIONS_FILE` | unset | Subscription set to load at startup |
    pub fn from_env() -> Self {
        let enabled = std::env::var("BEACON_ALERTS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let bus_capacity = std::env::var("BEACON_BUS_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::EVENT_BUS_CAPACITY)
            .max(1);

        let subscriptions_file = std::env::var("BEACON_SUBSCRIPTIONS_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            enabled,
            bus_capacity,
            subscriptions_file,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity.max(1);
        self
    }

    pub fn with_subscriptions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.subscriptions_file = Some(path.into());
        self
    }

    /// Load the configured subscription set; empty when no file is set.
    pub fn load_subscriptions(&self) -> Result<SubscriptionSet> {
        match &self.subscriptions_file {
            Some(path) => SubscriptionSet::load(path),
            None => Ok(SubscriptionSet::default()),
        }
    }
}

/// The configured subscriptions, as read from a YAML or JSON document:
///
/// ```yaml
/// subscriptions:
///   - id: 0190c4c2-6a1e-7d0c-9a51-2f0e3b8f4a10
///     name: data-platform
///     sinkType: slack
///     endpoint: https://hooks.slack.com/services/T000/B000/XXXX
///     batchSize: 5
///     eventFilters:
///       - eventType: entityUpdated
///         entities: [table, dashboard]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSet {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let set: Self = serde_yaml::from_str(input)?;
        set.validate()?;
        Ok(set)
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        let set: Self = serde_json::from_str(input)?;
        set.validate()?;
        Ok(set)
    }

    /// Read a subscription file; `.json` is parsed as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let set = if is_json {
            Self::from_json_str(&input)?
        } else {
            Self::from_yaml_str(&input)?
        };
        debug!(
            path = %path.display(),
            count = set.subscriptions.len(),
            "Loaded subscription set"
        );
        Ok(set)
    }

    /// Every subscription must be valid and ids must be unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for subscription in &self.subscriptions {
            subscription.validate().map_err(|e| {
                Error::Config(format!("subscription {:?}: {}", subscription.name, e))
            })?;
            if !seen.insert(subscription.id) {
                return Err(Error::Config(format!(
                    "duplicate subscription id {}",
                    subscription.id
                )));
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter().filter(|s| s.enabled)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
