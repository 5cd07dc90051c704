//! Event-type → entity-type filters for subscriptions.
//!
//! A filter maps each [`EventType`] to an ordered set of entity types. The
//! wildcard `"*"` anywhere in a set matches every entity type for that event
//! type. An event type without an entry is never delivered, so an empty
//! filter matches nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::defaults::FILTER_WILDCARD;
use crate::events::{ChangeEvent, EventType};
use crate::{Error, Result};

/// One configured filter line: an event type and the entity types it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilterEntry {
    pub event_type: EventType,
    pub entities: Vec<String>,
}

impl EventFilterEntry {
    pub fn new<I, S>(event_type: EventType, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_type,
            entities: entities.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntityMatch {
    Any,
    Only(Vec<String>),
}

impl EntityMatch {
    fn from_entities(entities: &[String]) -> Self {
        if entities.iter().any(|e| e == FILTER_WILDCARD) {
            return EntityMatch::Any;
        }
        let mut set: Vec<String> = Vec::with_capacity(entities.len());
        for entity in entities {
            if !set.contains(entity) {
                set.push(entity.clone());
            }
        }
        EntityMatch::Only(set)
    }

    fn matches(&self, entity_type: &str) -> bool {
        match self {
            EntityMatch::Any => true,
            EntityMatch::Only(set) => set.iter().any(|e| e == entity_type),
        }
    }
}

/// Compiled, read-only subscription filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    entries: BTreeMap<EventType, EntityMatch>,
}

impl EventFilter {
    /// Compile configured entries.
    ///
    /// Rejects entries with no entity types and duplicate event types.
    pub fn from_entries(entries: &[EventFilterEntry]) -> Result<Self> {
        let mut compiled = BTreeMap::new();
        for entry in entries {
            if entry.entities.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "event filter for {} has no entity types",
                    entry.event_type
                )));
            }
            if compiled
                .insert(entry.event_type, EntityMatch::from_entities(&entry.entities))
                .is_some()
            {
                return Err(Error::InvalidInput(format!(
                    "duplicate event filter for {}",
                    entry.event_type
                )));
            }
        }
        Ok(Self { entries: compiled })
    }

    /// Allow `event_type` for the given entity types, replacing any prior entry.
    pub fn allow<I, S>(mut self, event_type: EventType, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entities: Vec<String> = entities.into_iter().map(Into::into).collect();
        self.entries
            .insert(event_type, EntityMatch::from_entities(&entities));
        self
    }

    /// True when `event` passes the filter.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.matches_types(event.event_type, &event.entity_type)
    }

    pub fn matches_types(&self, event_type: EventType, entity_type: &str) -> bool {
        self.entries
            .get(&event_type)
            .is_some_and(|m| m.matches(entity_type))
    }

    /// True when no event type is configured (nothing will be delivered).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured event types, in declaration order of [`EventType`].
    pub fn event_types(&self) -> impl Iterator<Item = EventType> + '_ {
        self.entries.keys().copied()
    }
}
