//! Event History - bounded in-memory record of recent events
//!
//! EventHistory subscribes to the EventBus and keeps the last N events so
//! callers can inspect what happened after the fact without any storage.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::bus::{EventBus, SubscriptionId};
use super::types::{Event, EventKind};

/// Default number of events retained
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Ring of the most recent events, oldest evicted first
pub struct EventHistory {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "EventHistory::new: called");
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Subscribe this history to every event on the bus
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let history = Arc::clone(self);
        bus.subscribe_all(move |event| history.record(event))
    }

    pub fn record(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
    }

    /// All retained events, oldest first
    pub fn snapshot(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Retained events for one task (or batch), oldest first
    pub fn for_task(&self, task_id: &str) -> Vec<Event> {
        self.filtered(|e| e.task_id == task_id)
    }

    /// Retained events of one kind, oldest first
    pub fn of_kind(&self, kind: EventKind) -> Vec<Event> {
        self.filtered(|e| e.kind() == kind)
    }

    fn filtered(&self, keep: impl Fn(&Event) -> bool) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| keep(e)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
