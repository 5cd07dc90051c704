//! Per-subscription delivery status.
//!
//! The consumer owns the [`StatusTracker`] and is the only writer. Readers
//! hold a [`StatusReader`] and see atomic snapshots through a `watch` channel,
//! so status updates never block delivery.

use std::time::Duration;

use beacon_core::{DeliveryState, DeliveryStatus};
use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Writer half, owned by the subscription consumer.
#[derive(Debug)]
pub struct StatusTracker {
    tx: watch::Sender<DeliveryStatus>,
}

/// Read-only, cloneable view of one subscription's status.
#[derive(Debug, Clone)]
pub struct StatusReader {
    rx: watch::Receiver<DeliveryStatus>,
}

impl StatusTracker {
    pub fn new() -> (Self, StatusReader) {
        let (tx, rx) = watch::channel(DeliveryStatus::default());
        (Self { tx }, StatusReader { rx })
    }

    pub fn reader(&self) -> StatusReader {
        StatusReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> DeliveryStatus {
        self.tx.borrow().clone()
    }

    pub fn record_attempt(&self, at: DateTime<Utc>) {
        self.tx.send_modify(|s| s.last_attempt_at = Some(at));
    }

    /// Count events accepted by the sink. Does not change the state.
    pub fn record_delivered(&self, events: u64) {
        self.tx.send_modify(|s| s.delivered_events += events);
    }

    /// Whole batch delivered; back to active with the backoff reset.
    pub fn record_success(&self, at: DateTime<Utc>) {
        self.tx.send_modify(|s| {
            s.state = DeliveryState::Active;
            s.last_successful_at = Some(at);
            s.next_attempt_at = None;
            s.current_backoff_ms = 0;
        });
    }

    /// Retriable failure; the consumer sleeps `backoff` before the next try.
    pub fn record_retry(
        &self,
        at: DateTime<Utc>,
        status_code: Option<u16>,
        reason: &str,
        backoff: Duration,
    ) {
        let next = chrono::Duration::from_std(backoff)
            .ok()
            .and_then(|d| at.checked_add_signed(d));
        self.tx.send_modify(|s| {
            s.state = DeliveryState::AwaitingRetry;
            s.last_failed_at = Some(at);
            s.last_failed_status_code = status_code;
            s.last_failed_reason = Some(reason.to_string());
            s.next_attempt_at = next;
            s.current_backoff_ms = backoff.as_millis() as u64;
        });
    }

    /// Permanent failure; `dropped` events were discarded.
    pub fn record_failure(
        &self,
        at: DateTime<Utc>,
        status_code: Option<u16>,
        reason: &str,
        dropped: u64,
    ) {
        self.tx.send_modify(|s| {
            s.state = DeliveryState::Failed;
            s.last_failed_at = Some(at);
            s.last_failed_status_code = status_code;
            s.last_failed_reason = Some(reason.to_string());
            s.next_attempt_at = None;
            s.dropped_events += dropped;
        });
    }

    /// Events overwritten in the bus before this subscription read them.
    pub fn record_missed(&self, missed: u64) {
        self.tx.send_modify(|s| s.missed_events += missed);
    }
}

impl StatusReader {
    pub fn snapshot(&self) -> DeliveryStatus {
        self.rx.borrow().clone()
    }

    pub fn state(&self) -> DeliveryState {
        self.rx.borrow().state
    }

    /// Wait for the next status change. Returns `false` once the consumer
    /// that owned the tracker is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Wait until `predicate` holds for the current status and return it.
    /// Returns `None` if the consumer exits first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<DeliveryStatus>
    where
        F: FnMut(&DeliveryStatus) -> bool,
    {
        self.rx
            .wait_for(|s| predicate(s))
            .await
            .ok()
            .map(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status_is_active() {
        let (tracker, reader) = StatusTracker::new();
        assert_eq!(reader.state(), DeliveryState::Active);
        assert_eq!(tracker.snapshot(), DeliveryStatus::default());
    }

    #[test]
    fn test_retry_then_success() {
        let (tracker, reader) = StatusTracker::new();
        let at = Utc::now();

        tracker.record_attempt(at);
        tracker.record_retry(at, Some(503), "Service Unavailable", Duration::from_secs(3));
        let status = reader.snapshot();
        assert_eq!(status.state, DeliveryState::AwaitingRetry);
        assert_eq!(status.last_failed_status_code, Some(503));
        assert_eq!(status.current_backoff_ms, 3_000);
        assert_eq!(
            status.next_attempt_at,
            Some(at + chrono::Duration::seconds(3))
        );

        tracker.record_delivered(2);
        tracker.record_success(at);
        let status = reader.snapshot();
        assert_eq!(status.state, DeliveryState::Active);
        assert_eq!(status.current_backoff_ms, 0);
        assert_eq!(status.next_attempt_at, None);
        assert_eq!(status.last_successful_at, Some(at));
        assert_eq!(status.delivered_events, 2);
        // Failure history stays visible after recovery.
        assert_eq!(status.last_failed_status_code, Some(503));
    }

    #[test]
    fn test_permanent_failure_counts_dropped() {
        let (tracker, reader) = StatusTracker::new();
        tracker.record_failure(Utc::now(), Some(301), "Moved Permanently", 3);
        tracker.record_failure(Utc::now(), None, "unresolvable host", 1);
        let status = reader.snapshot();
        assert_eq!(status.state, DeliveryState::Failed);
        assert_eq!(status.dropped_events, 4);
        assert_eq!(status.last_failed_status_code, None);
        assert_eq!(status.last_failed_reason.as_deref(), Some("unresolvable host"));
    }

    #[test]
    fn test_missed_accumulates() {
        let (tracker, reader) = StatusTracker::new();
        tracker.record_missed(6);
        tracker.record_missed(1);
        assert_eq!(reader.snapshot().missed_events, 7);
        assert_eq!(reader.state(), DeliveryState::Active);
    }

    #[tokio::test]
    async fn test_reader_observes_changes() {
        let (tracker, mut reader) = StatusTracker::new();
        let second = tracker.reader();

        let waiter = tokio::spawn(async move {
            reader
                .wait_for(|s| s.state == DeliveryState::Failed)
                .await
        });
        tracker.record_failure(Utc::now(), Some(500), "boom", 1);

        let seen = waiter.await.unwrap().unwrap();
        assert_eq!(seen.last_failed_reason.as_deref(), Some("boom"));
        assert_eq!(second.state(), DeliveryState::Failed);
    }

    #[tokio::test]
    async fn test_changed_false_after_tracker_dropped() {
        let (tracker, mut reader) = StatusTracker::new();
        drop(tracker);
        assert!(!reader.changed().await);
    }
}
