//! # beacon-core
//!
//! Core types and the event bus for the beacon change-event notification
//! pipeline.
//!
//! This crate provides the data model shared by producers and consumers of
//! catalog change events ([`ChangeEvent`], [`Subscription`],
//! [`DeliveryStatus`]), the subscription [`EventFilter`], and the ring-arena
//! [`EventBus`] that fans events out to independent subscribers.

pub mod bus;
pub mod defaults;
pub mod error;
pub mod events;
pub mod filter;
pub mod logging;
pub mod models;

// Re-export commonly used types at crate root
pub use bus::{BusDelivery, BusSubscriber, EventBus, RecvError};
pub use error::{Error, Result};
pub use events::{ChangeDescription, ChangeEvent, ChangeEventList, EventType, FieldChange, Paging};
pub use filter::{EventFilter, EventFilterEntry};
pub use models::{DeliveryState, DeliveryStatus, SinkType, Subscription};
