//! # Bounded audit queue with backpressure.
//!
//! [`AuditQueue`] buffers [`AuditEvent`]s between many producers and the single
//! [`AuditPersister`](crate::audit::AuditPersister).
//!
//! ## Architecture
//! ```text
//! Producers (many):                        Consumer (one):
//!   KMS supervisor ──┐
//!   CLI supervisor ──┼── push ──► [slots: Semaphore(capacity)] ──► VecDeque ──► drain_into(sink)
//!   Daemon root   ──┘             (await permit when full)                       │
//!                                                                                └─► release(n) frees n slots
//! ```
//!
//! ## Rules
//! - **Never drops**: a full queue makes producers wait; nothing is overwritten.
//! - **FIFO**: persistence order is insertion order.
//! - **At-least-once**: a drain removes only events the sink confirmed written.
//! - **Fair waiting**: blocked producers are admitted in the order they started waiting.
//! - **Closed**: after [`AuditQueue::close`] pushes fail with [`QueueClosed`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tracing::warn;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::SinkError;

/// Capacity used by the daemon unless overridden.
pub const DEFAULT_CAPACITY: usize = 100;

/// Returned by [`AuditQueue::push`] once the queue has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

struct State {
    events: VecDeque<AuditEvent>,
    closed: bool,
}

/// Fixed-capacity FIFO of audit events shared by many producers.
pub struct AuditQueue {
    state: Mutex<State>,
    /// One permit per free slot.
    slots: Semaphore,
    /// Serializes drains so two consumers never persist the same snapshot.
    draining: tokio::sync::Mutex<()>,
    capacity: usize,
}

impl AuditQueue {
    /// Creates an empty queue (capacity clamped to a minimum of 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                events: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            slots: Semaphore::new(capacity),
            draining: tokio::sync::Mutex::new(()),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Producers holding a slot whose event is not queued yet.
    ///
    /// Free slots, queued events and admitted producers always add up to
    /// the capacity; only a drain returns slots, so the count is exact
    /// while the caller is the sole drainer.
    pub(crate) fn admitting(&self) -> usize {
        let state = self.lock();
        self.capacity
            .saturating_sub(state.events.len() + self.slots.available_permits())
    }

    /// Appends `event`, waiting for a free slot while the queue is full.
    ///
    /// # Errors
    /// [`QueueClosed`] if the queue is closed before a slot frees up.
    pub async fn push(&self, event: AuditEvent) -> Result<(), QueueClosed> {
        let permit = self.slots.acquire().await.map_err(|_| QueueClosed)?;

        let mut state = self.lock();
        // A permit handed out just before `close` must not strand an event
        // behind the final drain.
        if state.closed {
            return Err(QueueClosed);
        }
        // The slot now belongs to the event; `release` hands it back.
        permit.forget();
        state.events.push_back(event);
        Ok(())
    }

    /// Stops accepting events. Producers blocked in [`push`](Self::push) fail.
    ///
    /// Events already queued stay and can still be drained.
    pub fn close(&self) {
        self.lock().closed = true;
        self.slots.close();
    }

    /// Persists every queued event into `sink`, oldest first.
    ///
    /// Returns how many events were written and removed. On failure the
    /// events the sink confirmed are removed; the rest stay queued.
    pub async fn drain_into(&self, sink: &dyn AuditSink) -> Result<usize, SinkError> {
        let _drain = self.draining.lock().await;

        let batch: Vec<AuditEvent> = self.lock().events.iter().cloned().collect();
        if batch.is_empty() {
            return Ok(0);
        }

        match sink.append(&batch).await {
            Ok(()) => {
                self.release(batch.len());
                Ok(batch.len())
            }
            Err(e) => {
                self.release(e.written.min(batch.len()));
                Err(e)
            }
        }
    }

    /// Removes the `n` oldest events and frees their slots.
    fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let freed = {
            let mut state = self.lock();
            let n = n.min(state.events.len());
            state.events.drain(..n);
            n
        };
        self.slots.add_permits(freed);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock still holds a consistent deque: every critical section
        // is a single push/drain call.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for AuditQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Cloneable capability for recording audit events.
///
/// Handed to every supervisor. A disabled recorder (auditing off) accepts and
/// discards events, so callers never branch on configuration. Recording never
/// fails from the caller's point of view.
#[derive(Clone, Default)]
pub struct AuditRecorder {
    queue: Option<Arc<AuditQueue>>,
}

impl AuditRecorder {
    /// Records into `queue`.
    pub fn new(queue: Arc<AuditQueue>) -> Self {
        Self { queue: Some(queue) }
    }

    /// A recorder that discards events.
    pub fn disabled() -> Self {
        Self { queue: None }
    }

    /// Queues `event`, waiting while the queue is full.
    ///
    /// A closed queue is logged and the event is dropped.
    pub async fn record(&self, event: AuditEvent) {
        let Some(queue) = &self.queue else {
            return;
        };
        if queue.push(event.clone()).await.is_err() {
            warn!(
                group = %event.group,
                topic = %event.topic,
                message = %event.message,
                "audit queue closed; event not recorded"
            );
        }
    }
}
