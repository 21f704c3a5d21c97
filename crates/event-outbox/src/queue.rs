//! In-memory batch queue.
//!
//! Pure state: no I/O, no locking. `EventBuffer` wraps it in a mutex and
//! drives it from the flush worker.

use crate::EventRecord;
use std::collections::VecDeque;

/// Pending records that trigger an immediate flush.
pub const MAX_BATCH_SIZE: usize = 50;

/// Upper bound of the retry store.
pub const MAX_RETRY_BUFFER: usize = 200;

/// Pending batch, sealed full batches and the retry store of one producer.
///
/// Outgoing sets are always ordered retry store first, then sealed batches
/// oldest first, then the pending batch. Every take empties what it copies,
/// so a record sits in exactly one collection or in exactly one outgoing set.
#[derive(Debug)]
pub struct BatchQueue {
    capacity: usize,
    max_retry: usize,
    /// Records accumulating toward the size trigger.
    pending: Vec<EventRecord>,
    /// Full batches waiting for the flush worker.
    sealed: VecDeque<Vec<EventRecord>>,
    /// Records from failed submissions, oldest first.
    retry: VecDeque<EventRecord>,
}

impl BatchQueue {
    /// Create a queue. `capacity` and `max_retry` are clamped to at least 1.
    pub fn new(capacity: usize, max_retry: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_retry: max_retry.max(1),
            pending: Vec::with_capacity(capacity),
            sealed: VecDeque::new(),
            retry: VecDeque::new(),
        }
    }

    /// Append a record.
    ///
    /// Returns `true` when this record filled the pending batch, which is
    /// then sealed and a fresh pending batch started.
    pub fn push(&mut self, record: EventRecord) -> bool {
        self.pending.push(record);
        if self.pending.len() < self.capacity {
            return false;
        }

        let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.capacity));
        self.sealed.push_back(full);
        true
    }

    /// Outgoing set for a size-triggered flush: the retry store followed by
    /// the oldest sealed batch. `None` when nothing is sealed.
    pub fn take_sealed(&mut self) -> Option<Vec<EventRecord>> {
        let batch = self.sealed.pop_front()?;
        let mut outgoing: Vec<EventRecord> = self.retry.drain(..).collect();
        outgoing.extend(batch);
        Some(outgoing)
    }

    /// Outgoing set for an unconditional flush: everything held.
    /// `None` when the queue is empty.
    pub fn take_all(&mut self) -> Option<Vec<EventRecord>> {
        if self.is_empty() {
            return None;
        }

        let mut outgoing: Vec<EventRecord> = self.retry.drain(..).collect();
        for batch in self.sealed.drain(..) {
            outgoing.extend(batch);
        }
        outgoing.append(&mut self.pending);
        Some(outgoing)
    }

    /// Return a failed outgoing set to the retry store.
    ///
    /// The failed records are older than anything already in the store, so
    /// they go in front. The store is then cut back to `max_retry`, dropping
    /// the oldest records. Returns the number of records dropped.
    pub fn restore(&mut self, failed: Vec<EventRecord>) -> usize {
        let newer: Vec<EventRecord> = self.retry.drain(..).collect();
        self.retry.extend(failed);
        self.retry.extend(newer);

        let excess = self.retry.len().saturating_sub(self.max_retry);
        self.retry.drain(..excess);
        excess
    }

    /// Records in the pending batch.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records in sealed batches.
    pub fn sealed_len(&self) -> usize {
        self.sealed.iter().map(Vec::len).sum()
    }

    /// Records in the retry store.
    pub fn retry_len(&self) -> usize {
        self.retry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.sealed.is_empty() && self.retry.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_retry(&self) -> usize {
        self.max_retry
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new(MAX_BATCH_SIZE, MAX_RETRY_BUFFER)
    }
}
