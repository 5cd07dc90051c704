//! Change events emitted by the catalog for every committed entity mutation.
//!
//! A [`ChangeEvent`] is immutable once built. The producer hands it to the
//! [`EventBus`](crate::EventBus), which shares it read-only with every
//! subscription consumer.
//!
//! ## Wire Format
//!
//! Events serialize camelCase. Generic webhooks receive a batch wrapped in a
//! [`ChangeEventList`]:
//!
//! ```text
//! {"data":[{"id":"...","eventType":"entityUpdated","entityType":"table",...}],"paging":{"total":1}}
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::Error;

/// Kind of entity mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    EntityCreated,
    EntityUpdated,
    EntityDeleted,
}

impl EventType {
    /// Wire name (`"entityCreated"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EntityCreated => "entityCreated",
            EventType::EntityUpdated => "entityUpdated",
            EventType::EntityDeleted => "entityDeleted",
        }
    }

    /// Short verb used in chat messages.
    pub fn verb(&self) -> &'static str {
        match self {
            EventType::EntityCreated => "created",
            EventType::EntityUpdated => "updated",
            EventType::EntityDeleted => "deleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    /// Accepts wire names and the short verbs (`"created"`, `"updated"`, `"deleted"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entityCreated" | "created" => Ok(EventType::EntityCreated),
            "entityUpdated" | "updated" => Ok(EventType::EntityUpdated),
            "entityDeleted" | "deleted" => Ok(EventType::EntityDeleted),
            other => Err(Error::InvalidInput(format!("unknown event type: {}", other))),
        }
    }
}

/// One field-level difference inside a [`ChangeDescription`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<JsonValue>,
}

impl FieldChange {
    pub fn new(
        name: impl Into<String>,
        old_value: Option<JsonValue>,
        new_value: Option<JsonValue>,
    ) -> Self {
        Self {
            name: name.into(),
            old_value,
            new_value,
        }
    }
}

/// Old/new field diffs carried by an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDescription {
    #[serde(default)]
    pub fields_added: Vec<FieldChange>,
    #[serde(default)]
    pub fields_updated: Vec<FieldChange>,
    #[serde(default)]
    pub fields_deleted: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<f64>,
}

impl ChangeDescription {
    /// True when no field changed.
    pub fn is_empty(&self) -> bool {
        self.fields_added.is_empty()
            && self.fields_updated.is_empty()
            && self.fields_deleted.is_empty()
    }
}

/// Immutable record of one committed entity mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// UUIDv7 event identifier.
    pub id: Uuid,
    pub event_type: EventType,
    /// Entity kind, e.g. `"table"` or `"dashboard"`.
    pub entity_type: String,
    pub entity_id: Uuid,
    #[serde(
        rename = "entityFullyQualifiedName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub entity_fqn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Commit time in epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_description: Option<ChangeDescription>,
}

impl ChangeEvent {
    /// Create an event stamped with a fresh UUIDv7 and the current time.
    pub fn new(event_type: EventType, entity_type: impl Into<String>, entity_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            entity_type: entity_type.into(),
            entity_id,
            entity_fqn: None,
            user_name: None,
            timestamp: Utc::now().timestamp_millis(),
            previous_version: None,
            current_version: None,
            change_description: None,
        }
    }

    pub fn with_fqn(mut self, fqn: impl Into<String>) -> Self {
        self.entity_fqn = Some(fqn.into());
        self
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_versions(mut self, previous: f64, current: f64) -> Self {
        self.previous_version = Some(previous);
        self.current_version = Some(current);
        self
    }

    pub fn with_change_description(mut self, description: ChangeDescription) -> Self {
        self.change_description = Some(description);
        self
    }

    /// Commit time as a UTC datetime, if the timestamp is in range.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Best human-readable entity name: FQN if known, otherwise the id.
    pub fn display_name(&self) -> String {
        self.entity_fqn
            .clone()
            .unwrap_or_else(|| self.entity_id.to_string())
    }
}

/// Pagination block of a [`ChangeEventList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Paging {
    pub total: usize,
}

/// JSON body of a generic webhook call: the whole batch plus its size.
#[derive(Debug, Serialize)]
pub struct ChangeEventList<'a> {
    pub data: Vec<&'a ChangeEvent>,
    pub paging: Paging,
}

impl<'a> ChangeEventList<'a> {
    pub fn new<I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a ChangeEvent>,
    {
        let data: Vec<&ChangeEvent> = events.into_iter().collect();
        let total = data.len();
        Self {
            data,
            paging: Paging { total },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventType::EntityCreated).unwrap(),
            r#""entityCreated""#
        );
        assert_eq!(EventType::EntityUpdated.as_str(), "entityUpdated");
        assert_eq!(EventType::EntityDeleted.to_string(), "entityDeleted");
    }

    #[test]
    fn test_event_type_from_str_accepts_short_verbs() {
        assert_eq!(
            "updated".parse::<EventType>().unwrap(),
            EventType::EntityUpdated
        );
        assert_eq!(
            "entityDeleted".parse::<EventType>().unwrap(),
            EventType::EntityDeleted
        );
        assert!("renamed".parse::<EventType>().is_err());
    }

    #[test]
    fn test_change_event_serializes_camel_case() {
        let event = ChangeEvent::new(EventType::EntityUpdated, "table", Uuid::nil())
            .with_fqn("svc.db.schema.orders")
            .with_versions(0.1, 0.2);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["eventType"], "entityUpdated");
        assert_eq!(json["entityType"], "table");
        assert_eq!(json["entityFullyQualifiedName"], "svc.db.schema.orders");
        assert_eq!(json["currentVersion"], 0.2);
        assert!(json.get("userName").is_none());
        assert!(json.get("changeDescription").is_none());
    }

    #[test]
    fn test_change_event_ids_are_v7() {
        let a = ChangeEvent::new(EventType::EntityCreated, "table", Uuid::nil());
        assert_eq!(a.id.get_version_num(), 7);
        assert!(a.occurred_at().is_some());
    }

    #[test]
    fn test_change_description_is_empty() {
        let mut desc = ChangeDescription::default();
        assert!(desc.is_empty());
        desc.fields_updated.push(FieldChange::new(
            "description",
            Some(serde_json::json!("old")),
            Some(serde_json::json!("new")),
        ));
        assert!(!desc.is_empty());
    }

    #[test]
    fn test_change_event_list_wraps_batch() {
        let a = ChangeEvent::new(EventType::EntityCreated, "table", Uuid::nil());
        let b = ChangeEvent::new(EventType::EntityDeleted, "dashboard", Uuid::nil());
        let list = ChangeEventList::new([&a, &b]);
        let json = serde_json::to_value(&list).unwrap();

        assert_eq!(json["paging"]["total"], 2);
        assert_eq!(json["data"][0]["entityType"], "table");
        assert_eq!(json["data"][1]["eventType"], "entityDeleted");
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let id = Uuid::new_v4();
        let event = ChangeEvent::new(EventType::EntityCreated, "table", id);
        assert_eq!(event.display_name(), id.to_string());
        assert_eq!(event.with_fqn("a.b").display_name(), "a.b");
    }
}
