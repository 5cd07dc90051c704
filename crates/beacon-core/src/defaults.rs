//! Centralized default constants for the beacon notification pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Both crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// EVENT BUS
// =============================================================================

/// Number of slots in the event bus ring arena.
///
/// A subscriber that falls more than this many events behind the producer
/// loses the overwritten events and receives a gap signal.
pub const EVENT_BUS_CAPACITY: usize = 1024;

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Default number of events accumulated before a batch is flushed.
pub const BATCH_SIZE: usize = 10;

/// Default connect timeout for sink HTTP calls (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout for sink HTTP calls (seconds).
pub const READ_TIMEOUT_SECS: u64 = 12;

/// Entity-type wildcard in an event filter entry.
pub const FILTER_WILDCARD: &str = "*";

// =============================================================================
// BACKOFF
// =============================================================================

/// Retry delay ladder in milliseconds: normal, 3 s, 30 s, 5 min, 1 h, 24 h.
///
/// Repeated retriable failures walk up the ladder and stay at the last rung.
pub const BACKOFF_LADDER_MS: [u64; 6] = [
    0,
    3_000,
    30_000,
    5 * 60 * 1_000,
    60 * 60 * 1_000,
    24 * 60 * 60 * 1_000,
];

// =============================================================================
// WEBHOOK WIRE CONTRACT
// =============================================================================

/// Header carrying `sha256=<hex hmac>` over the exact request body.
pub const SIGNATURE_HEADER: &str = "X-Beacon-Signature";

/// Prefix of the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// User agent sent with every sink request.
pub const USER_AGENT: &str = concat!("beacon-alerts/", env!("CARGO_PKG_VERSION"));
