//! Structured logging schema and field name constants for beacon.
//!
//! These are the field names the bus, consumers, and sinks emit, so log
//! aggregation tools can query delivery activity by one vocabulary. Call sites
//! spell the names inline in `tracing` macros; new fields belong here first.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Permanent delivery failure, subscription needs operator attention |
//! | WARN  | Retriable failure (backoff applied), bus gap for a lagging consumer |
//! | INFO  | Lifecycle events (consumer start/stop, registry changes) |
//! | DEBUG | Decision points: flushes, filter configuration, sink responses |
//! | TRACE | Per-event iteration (filter hits and misses, bus publish) |

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{Error, Result};

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Subscription UUID a consumer delivers for.
pub const SUBSCRIPTION_ID: &str = "subscription_id";

/// Human-readable subscription name.
pub const SUBSCRIPTION_NAME: &str = "subscription_name";

/// Sink type of the subscription ("generic", "slack", "msTeams").
pub const SINK_TYPE: &str = "sink_type";

/// Change event UUID.
pub const EVENT_ID: &str = "event_id";

/// Change event type ("entityCreated", ...).
pub const EVENT_TYPE: &str = "event_type";

/// Entity type of a change event ("table", "dashboard", ...).
pub const ENTITY_TYPE: &str = "entity_type";

// ─── Bus fields ────────────────────────────────────────────────────────────

/// Bus sequence number of an event.
pub const SEQUENCE: &str = "sequence";

/// Number of events a lagging subscriber lost to the ring wrapping.
pub const MISSED: &str = "missed";

/// Number of active bus subscribers.
pub const SUBSCRIBER_COUNT: &str = "subscriber_count";

// ─── Delivery fields ───────────────────────────────────────────────────────

/// Number of events in a flushed batch.
pub const BATCH_SIZE: &str = "batch_size";

/// HTTP status code returned by a sink.
pub const STATUS_CODE: &str = "status_code";

/// Current backoff delay in milliseconds.
pub const BACKOFF_MS: &str = "backoff_ms";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `default_filter`. `LOG_FORMAT=json` switches the fmt
/// layer to JSON lines. Fails if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {}", e)))
}
