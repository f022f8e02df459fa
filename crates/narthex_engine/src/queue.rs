//! The event queue.
//!
//! Single consumer, multiple producers. Ordering is deterministic:
//! priority class first, then insertion order within a class, via a
//! sorted map keyed on (priority, sequence). Producers hold cloned
//! handles; the dispatch loop is the only consumer.

use crate::event::RuntimeEvent;
use narthex_core::EventPriority;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct QueueInner {
    events: BTreeMap<(EventPriority, u64), RuntimeEvent>,
    next_seq: u64,
}

/// Thread-safe priority event queue
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl EventQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // Producers only insert; a poisoned map is still consistent
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append an event to the tail of its priority class
    pub fn enqueue(&self, event: RuntimeEvent) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.events.insert((event.priority, seq), event);
    }

    /// Remove and return the next event
    #[must_use]
    pub fn dequeue(&self) -> Option<RuntimeEvent> {
        let mut inner = self.lock();
        let key = *inner.events.keys().next()?;
        inner.events.remove(&key)
    }

    /// Number of pending events
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// Whether no events are pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    /// Bulk-clear pending events
    ///
    /// Server-originated events survive when `keep_server_events` is
    /// set, so an abort does not lose work the server handed off.
    pub fn clear(&self, keep_server_events: bool) {
        let mut inner = self.lock();
        if keep_server_events {
            inner.events.retain(|_, event| event.from_server);
        } else {
            inner.events.clear();
        }
    }
}
