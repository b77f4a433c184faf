//! FIFO of envelopes waiting for the engine to become ready.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::envelope::NotificationEnvelope;

/// A queued envelope.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedNotification {
    pub id: String,
    pub envelope: NotificationEnvelope,
    pub enqueued_at: DateTime<Utc>,
    /// How many times a flush put this entry back.
    pub requeue_count: u32,
    #[serde(skip)]
    generation: u64,
}

impl QueuedNotification {
    pub fn new(id: impl Into<String>, envelope: NotificationEnvelope) -> Self {
        Self {
            id: id.into(),
            envelope,
            enqueued_at: Utc::now(),
            requeue_count: 0,
            generation: 0,
        }
    }
}

/// What [`DeliveryQueue::enqueue`] did with an entry.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting an older entry to stay within the bound.
    Evicted(QueuedNotification),
    /// Not queued: the bound is reached and every queued entry is an emergency.
    Rejected(QueuedNotification),
}

/// Delivery queue.
///
/// Entries leave only through a flush, an explicit cancel, or eviction when a
/// size bound is configured. A flush pass only visits entries that were
/// queued before it started, so entries re-queued during the pass wait for
/// the next one.
#[derive(Debug)]
pub struct DeliveryQueue {
    entries: Mutex<VecDeque<QueuedNotification>>,
    max_size: Option<usize>,
    generation: AtomicU64,
    processing: AtomicBool,
}

/// Held for the duration of a flush pass.
#[derive(Debug)]
pub struct FlushPass<'a> {
    queue: &'a DeliveryQueue,
    generation: u64,
}

impl FlushPass<'_> {
    /// Pop the next entry that was queued before this pass began.
    pub fn next_due(&self) -> Option<QueuedNotification> {
        let mut entries = self.queue.entries.lock();
        if entries.front()?.generation < self.generation {
            entries.pop_front()
        } else {
            None
        }
    }

    /// Put an entry back at the tail. It is not visited again by this pass.
    pub fn requeue(&self, mut entry: QueuedNotification) {
        entry.requeue_count += 1;
        entry.generation = self.generation;
        self.queue.entries.lock().push_back(entry);
    }
}

impl Drop for FlushPass<'_> {
    fn drop(&mut self) {
        self.queue.processing.store(false, Ordering::Release);
    }
}

impl DeliveryQueue {
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_size: max_size.filter(|n| *n > 0),
            generation: AtomicU64::new(0),
            processing: AtomicBool::new(false),
        }
    }

    /// Append an entry.
    ///
    /// Eviction removes the oldest non-emergency entry. When every queued entry
    /// is an emergency, an incoming non-emergency is rejected instead.
    pub fn enqueue(&self, mut entry: QueuedNotification) -> EnqueueOutcome {
        entry.generation = self.generation.load(Ordering::Acquire);
        let mut entries = self.entries.lock();

        let evicted = match self.max_size {
            Some(max) if entries.len() >= max => {
                match entries.iter().position(|e| !e.envelope.is_emergency()) {
                    Some(index) => entries.remove(index),
                    None if !entry.envelope.is_emergency() => {
                        warn!(id = %entry.id, "Delivery queue full of emergencies, discarding entry");
                        return EnqueueOutcome::Rejected(entry);
                    }
                    None => entries.pop_front(),
                }
            }
            _ => None,
        };

        debug!(id = %entry.id, depth = entries.len() + 1, "Queued notification");
        entries.push_back(entry);
        match evicted {
            Some(evicted) => {
                warn!(id = %evicted.id, "Delivery queue full, evicted oldest entry");
                EnqueueOutcome::Evicted(evicted)
            }
            None => EnqueueOutcome::Queued,
        }
    }

    /// Remove the entry with `id`.
    pub fn remove(&self, id: &str) -> Option<QueuedNotification> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|e| e.id == id)?;
        entries.remove(index)
    }

    /// Remove every entry, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the current entries in delivery order.
    pub fn snapshot(&self) -> Vec<QueuedNotification> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Start a flush pass, or `None` if one is already running.
    pub fn begin_flush(&self) -> Option<FlushPass<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Some(FlushPass {
            queue: self,
            generation,
        })
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new(None)
    }
}
