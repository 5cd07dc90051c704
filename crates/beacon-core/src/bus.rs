//! Bounded, ordered, multi-consumer event bus.
//!
//! The bus is a fixed arena of slots addressed by a monotonically increasing
//! sequence number (`slot = sequence % capacity`). Every subscriber owns its
//! own cursor into that sequence and reads at its own pace:
//!
//! ```text
//!   publish() ──► [ s0 | s1 | s2 | s3 ]   head = 6, capacity = 4
//!                  seq4 seq5 seq2 seq3    retained window = 2..6
//!
//!   consumer A cursor = 5  ──► reads seq5 (end_of_batch = true)
//!   consumer B cursor = 0  ──► Lagged(2), fast-forwarded to seq2
//! ```
//!
//! ## Rules
//! - **Never blocks the producer**: when the arena wraps, the oldest slot is
//!   overwritten (drop-oldest). Only a subscriber still pointing at an
//!   overwritten sequence loses events, and it is told so exactly once with
//!   [`RecvError::Lagged`].
//! - **Exact order**: each subscriber observes events in publish order, with
//!   no duplication inside the bus.
//! - **Replay**: [`EventBus::subscribe`] starts at the oldest retained event,
//!   so a new subscriber sees what is still buffered before live events.
//! - **End of batch**: every delivery says whether it was the last event
//!   currently published, which drives batch flushing downstream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::Notify;

use crate::events::ChangeEvent;
use crate::{Error, Result};

/// Why a subscriber could not read the next event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The subscriber fell behind the retained window; `n` events were lost
    /// and the cursor now points at the oldest retained event.
    #[error("subscriber lagged behind by {0} events")]
    Lagged(u64),
    /// The bus was closed and every retained event has been read.
    #[error("event bus closed")]
    Closed,
    /// No event is available right now (only from [`BusSubscriber::try_recv`]).
    #[error("no event available")]
    Empty,
}

/// One event handed to a subscriber.
#[derive(Debug, Clone)]
pub struct BusDelivery {
    /// Bus sequence number of the event.
    pub sequence: u64,
    pub event: Arc<ChangeEvent>,
    /// True when this was the last event published at the time of reading.
    pub end_of_batch: bool,
}

struct Ring {
    slots: Vec<Arc<ChangeEvent>>,
    /// Sequence number the next published event will get.
    head: u64,
    closed: bool,
}

struct Shared {
    ring: Mutex<Ring>,
    notify: Notify,
    capacity: usize,
    subscribers: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Ring> {
        // A panic while holding the lock cannot leave the ring half-written:
        // every mutation is a single slot store followed by the head bump.
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn oldest(&self, ring: &Ring) -> u64 {
        ring.head.saturating_sub(self.capacity as u64)
    }
}

/// Ring-arena event bus shared by the change-event producer and every
/// subscription consumer. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.shared.capacity)
            .field("head", &self.head())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Create a new event bus with the given number of slots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                ring: Mutex::new(Ring {
                    slots: Vec::with_capacity(capacity),
                    head: 0,
                    closed: false,
                }),
                notify: Notify::new(),
                capacity,
                subscribers: AtomicUsize::new(0),
            }),
        }
    }

    /// Append an event and wake waiting subscribers. Returns its sequence number.
    ///
    /// Never waits on subscribers; a full arena overwrites its oldest slot.
    pub fn publish(&self, event: ChangeEvent) -> Result<u64> {
        let event_id = event.id;
        let sequence = {
            let mut ring = self.shared.lock();
            if ring.closed {
                return Err(Error::BusClosed);
            }
            let sequence = ring.head;
            let slot = (sequence % self.shared.capacity as u64) as usize;
            let event = Arc::new(event);
            if slot < ring.slots.len() {
                ring.slots[slot] = event;
            } else {
                ring.slots.push(event);
            }
            ring.head += 1;
            sequence
        };

        tracing::trace!(
            sequence,
            %event_id,
            subscriber_count = self.subscriber_count(),
            "EventBus publish"
        );
        self.shared.notify.notify_waiters();
        Ok(sequence)
    }

    /// Subscribe starting at the oldest retained event (replays the buffer).
    pub fn subscribe(&self) -> BusSubscriber {
        let cursor = {
            let ring = self.shared.lock();
            self.shared.oldest(&ring)
        };
        self.subscriber_at(cursor)
    }

    /// Subscribe starting after the newest event (live events only).
    pub fn subscribe_latest(&self) -> BusSubscriber {
        self.subscriber_at(self.head())
    }

    /// Subscribe starting at `sequence`.
    ///
    /// A sequence past the head is clamped to the head. A sequence older than
    /// the retained window yields [`RecvError::Lagged`] on the first read.
    pub fn subscribe_at(&self, sequence: u64) -> BusSubscriber {
        self.subscriber_at(sequence.min(self.head()))
    }

    fn subscriber_at(&self, cursor: u64) -> BusSubscriber {
        self.shared.subscribers.fetch_add(1, Ordering::SeqCst);
        BusSubscriber {
            shared: self.shared.clone(),
            cursor,
        }
    }

    /// Close the bus. Subscribers drain what is retained, then see `Closed`.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Sequence number the next published event will get.
    pub fn head(&self) -> u64 {
        self.shared.lock().head
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.load(Ordering::SeqCst)
    }
}

/// One subscriber's independent read cursor into an [`EventBus`].
pub struct BusSubscriber {
    shared: Arc<Shared>,
    cursor: u64,
}

impl std::fmt::Debug for BusSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscriber")
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl BusSubscriber {
    /// Sequence number of the next event this subscriber will read.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of published events this subscriber has not read yet.
    pub fn pending(&self) -> u64 {
        let ring = self.shared.lock();
        ring.head.saturating_sub(self.cursor)
    }

    /// Read the next event without waiting.
    pub fn try_recv(&mut self) -> std::result::Result<BusDelivery, RecvError> {
        let ring = self.shared.lock();
        let oldest = self.shared.oldest(&ring);

        if self.cursor < oldest {
            let missed = oldest - self.cursor;
            self.cursor = oldest;
            return Err(RecvError::Lagged(missed));
        }

        if self.cursor < ring.head {
            let sequence = self.cursor;
            let slot = (sequence % self.shared.capacity as u64) as usize;
            let event = ring.slots[slot].clone();
            self.cursor += 1;
            return Ok(BusDelivery {
                sequence,
                event,
                end_of_batch: self.cursor == ring.head,
            });
        }

        if ring.closed {
            Err(RecvError::Closed)
        } else {
            Err(RecvError::Empty)
        }
    }

    /// Wait for the next event.
    ///
    /// Never returns [`RecvError::Empty`].
    pub async fn recv(&mut self) -> std::result::Result<BusDelivery, RecvError> {
        let shared = self.shared.clone();
        loop {
            // Register interest before checking the ring so a publish between
            // the check and the await still wakes us.
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_recv() {
                Err(RecvError::Empty) => notified.await,
                other => return other,
            }
        }
    }
}

impl Drop for BusSubscriber {
    fn drop(&mut self) {
        self.shared.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}
