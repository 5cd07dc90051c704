//! Subscription consumer: filter → batch → deliver with backoff.
//!
//! One consumer runs per enabled subscription, on its own Tokio task, reading
//! its own [`BusSubscriber`] cursor. Delivery is strictly sequential: the next
//! batch is not started until the current one succeeded or was dropped.
//!
//! ## Flush rule
//!
//! The held batch is flushed when it reaches the subscription's batch size or
//! when the event just read was the last one currently published. The second
//! rule also applies when that last event was filtered out, so a held batch
//! never waits behind filtered traffic.
//!
//! ## Outcomes
//!
//! - Success: each accepted request resets the [`Backoff`] to its base rung
//!   and records success, so a chat batch retried on one event starts the
//!   next event's failures from the first rung again.
//! - Retriable: climb the [`Backoff`] ladder, record awaiting-retry, sleep on
//!   this task, then resend the request that failed. Earlier requests of the
//!   same batch are not resent.
//! - Permanent: record failed, drop the undelivered part of the batch, carry
//!   on with the next event. No sleep.
//!
//! Cancellation interrupts an in-flight request or a backoff sleep; the held
//! batch is discarded and [`ConsumerOutcome::resume_from`] names the first
//! undelivered sequence so a replacement consumer can pick up from there.

use std::sync::Arc;

use beacon_core::{
    BusDelivery, BusSubscriber, ChangeEvent, Error, EventFilter, RecvError, Result, Subscription,
};
use chrono::Utc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::sink::{DeliveryResult, SinkPublisher};
use crate::status::{StatusReader, StatusTracker};

/// Why a consumer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Torn down through its cancellation token.
    Cancelled,
    /// The bus was closed and fully drained.
    BusClosed,
}

/// Returned when a consumer task ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerOutcome {
    pub exit: ConsumerExit,
    /// First bus sequence this consumer did not finish with.
    pub resume_from: u64,
}

/// Marker for "cancellation observed mid-delivery".
struct Cancelled;

pub struct SubscriptionConsumer<P> {
    subscription_id: Uuid,
    name: String,
    batch_size: usize,
    filter: EventFilter,
    sink: P,
    batch: Vec<Arc<ChangeEvent>>,
    /// Bus sequence of each batch entry.
    sequences: Vec<u64>,
    /// Leading batch entries already accepted by the sink.
    delivered: usize,
    backoff: Backoff,
    status: StatusTracker,
    cancel: CancellationToken,
}

impl<P: SinkPublisher> SubscriptionConsumer<P> {
    /// Build a consumer for `subscription`. The returned reader observes its
    /// delivery status.
    pub fn new(
        subscription: &Subscription,
        sink: P,
        cancel: CancellationToken,
    ) -> Result<(Self, StatusReader)> {
        if subscription.batch_size == 0 {
            return Err(Error::InvalidInput("batch size must be at least 1".into()));
        }
        let filter = subscription.filter()?;
        let (status, reader) = StatusTracker::new();

        let consumer = Self {
            subscription_id: subscription.id,
            name: subscription.name.clone(),
            batch_size: subscription.batch_size,
            filter,
            sink,
            batch: Vec::with_capacity(subscription.batch_size),
            sequences: Vec::with_capacity(subscription.batch_size),
            delivered: 0,
            backoff: Backoff::new(),
            status,
            cancel,
        };
        Ok((consumer, reader))
    }

    pub fn status(&self) -> StatusReader {
        self.status.reader()
    }

    /// Consume `subscriber` until cancelled or the bus closes.
    pub async fn run(self, subscriber: BusSubscriber) -> ConsumerOutcome {
        let span = info_span!(
            "subscription_consumer",
            subscription_id = %self.subscription_id,
            sink_type = %self.sink.sink_type(),
        );
        self.run_loop(subscriber).instrument(span).await
    }

    async fn run_loop(mut self, mut subscriber: BusSubscriber) -> ConsumerOutcome {
        info!(
            subscription_name = %self.name,
            batch_size = self.batch_size,
            sequence = subscriber.cursor(),
            "Subscription consumer started"
        );

        let exit = loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break ConsumerExit::Cancelled,
                received = subscriber.recv() => received,
            };

            match received {
                Ok(delivery) => {
                    if self.on_delivery(delivery).await.is_err() {
                        break ConsumerExit::Cancelled;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        missed,
                        sequence = subscriber.cursor(),
                        "Consumer fell behind the event bus, events lost"
                    );
                    self.status.record_missed(missed);
                }
                Err(RecvError::Closed) => break ConsumerExit::BusClosed,
                Err(RecvError::Empty) => continue,
            }
        };

        let resume_from = self
            .sequences
            .get(self.delivered)
            .copied()
            .unwrap_or_else(|| subscriber.cursor());
        if !self.batch.is_empty() {
            debug!(
                batch_size = self.batch.len() - self.delivered,
                "Discarding held batch on teardown"
            );
        }
        info!(?exit, sequence = resume_from, "Subscription consumer stopped");

        ConsumerOutcome { exit, resume_from }
    }

    async fn on_delivery(&mut self, delivery: BusDelivery) -> std::result::Result<(), Cancelled> {
        let BusDelivery {
            sequence,
            event,
            end_of_batch,
        } = delivery;

        if self.filter.matches(&event) {
            trace!(
                sequence,
                event_id = %event.id,
                event_type = %event.event_type,
                entity_type = %event.entity_type,
                "Event accepted"
            );
            self.batch.push(event);
            self.sequences.push(sequence);
        } else {
            trace!(
                sequence,
                event_type = %event.event_type,
                entity_type = %event.entity_type,
                "Event filtered out"
            );
        }

        if self.batch.is_empty() || (!end_of_batch && self.batch.len() < self.batch_size) {
            return Ok(());
        }
        self.flush().await
    }

    async fn flush(&mut self) -> std::result::Result<(), Cancelled> {
        debug!(batch_size = self.batch.len(), "Flushing batch");

        let requests = match self.sink.render(&self.batch) {
            Ok(requests) => requests,
            Err(e) => {
                error!(
                    error = %e,
                    batch_size = self.batch.len(),
                    "Failed to render batch, dropping it"
                );
                let reason = format!("failed to render batch: {}", e);
                self.status
                    .record_failure(Utc::now(), None, &reason, self.batch.len() as u64);
                self.clear_batch();
                return Ok(());
            }
        };

        let started = Instant::now();
        let mut next = 0;
        while next < requests.len() {
            let request = &requests[next];
            let attempt_at = Utc::now();
            self.status.record_attempt(attempt_at);

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Cancelled),
                result = self.sink.send(request) => result,
            };

            match result {
                // Chat sinks accept events one request at a time; each
                // accepted request returns the ladder to its base rung.
                DeliveryResult::Success => {
                    self.backoff.reset();
                    self.status.record_success(Utc::now());
                    self.delivered += request.events;
                    self.status.record_delivered(request.events as u64);
                    next += 1;
                }
                DeliveryResult::RetriableFailure { status, reason } => {
                    let delay = self.backoff.advance();
                    warn!(
                        status_code = ?status,
                        reason = %reason,
                        backoff_ms = delay.as_millis() as u64,
                        "Delivery failed, retrying after backoff"
                    );
                    self.status.record_retry(attempt_at, status, &reason, delay);

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
                DeliveryResult::PermanentFailure { status, reason } => {
                    let dropped = self.batch.len().saturating_sub(self.delivered);
                    error!(
                        status_code = ?status,
                        reason = %reason,
                        batch_size = dropped,
                        "Delivery failed permanently, dropping batch"
                    );
                    self.status
                        .record_failure(attempt_at, status, &reason, dropped as u64);
                    self.clear_batch();
                    return Ok(());
                }
            }
        }

        debug!(
            batch_size = self.batch.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            success = true,
            "Batch delivered"
        );
        self.clear_batch();
        Ok(())
    }

    fn clear_batch(&mut self) {
        self.batch.clear();
        self.sequences.clear();
        self.delivered = 0;
    }
}
