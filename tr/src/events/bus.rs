//! Event Bus - central pub/sub system for taskrelay events
//!
//! Subscribers register handlers for one event kind or for every kind.
//! Events are either dispatched synchronously on the publisher's thread
//! (`publish`) or queued into a lock-free ring buffer and dispatched by a
//! pool of worker tasks (`publish_async`). The async path never blocks: a
//! full buffer drops the event and counts it.
//!
//! Ordering: each worker dispatches in the order it popped. With more than
//! one worker there is no global order across workers; configure a single
//! worker when per-publisher FIFO delivery matters.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::emitter::TaskEmitter;
use super::ring::RingBuffer;
use super::types::{Event, EventKind};

/// Default ring buffer capacity (events)
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Default number of dispatch workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of events a worker pops per pass
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default pause for an idle worker
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(1);

/// Callback invoked for each delivered event
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Predicate deciding whether a subscriber sees an event
pub type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Identifier returned by the subscribe calls
pub type SubscriptionId = u64;

/// Errors reported by bus lifecycle operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("event bus already closed")]
    AlreadyClosed,
}

/// Bus tuning
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Ring buffer capacity, rounded up to a power of two
    pub buffer_size: usize,

    /// Worker tasks draining the buffer
    pub workers: usize,

    /// Maximum events a worker pops per pass
    pub batch_size: usize,

    /// How long an idle worker waits before polling again
    pub idle_wait: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            idle_wait: DEFAULT_IDLE_WAIT,
        }
    }
}

impl BusConfig {
    /// Replace zero values with defaults
    fn normalized(mut self) -> Self {
        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.idle_wait.is_zero() {
            self.idle_wait = DEFAULT_IDLE_WAIT;
        }
        self
    }
}

/// Point-in-time bus counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusStats {
    pub total_published: u64,
    pub total_dropped: u64,
    pub active_subscribers: usize,
    pub wildcard_subscribers: usize,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub subscribers_by_kind: HashMap<EventKind, usize>,
}

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
    filter: Option<Filter>,
}

impl Subscription {
    /// Run filter and handler, containing any panic
    fn deliver(&self, event: &Event) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let accepted = self.filter.as_ref().is_none_or(|filter| filter(event));
            if accepted {
                (self.handler)(event);
            }
        }));

        if let Err(payload) = outcome {
            error!(
                subscription_id = self.id,
                event_type = event.event_type(),
                task_id = %event.task_id,
                panic = %panic_message(payload.as_ref()),
                "Subscription::deliver: handler panicked"
            );
        }
    }
}

#[derive(Default)]
struct Subscribers {
    by_kind: HashMap<EventKind, HashMap<SubscriptionId, Arc<Subscription>>>,
    wildcard: HashMap<SubscriptionId, Arc<Subscription>>,
}

impl Subscribers {
    fn matching(&self, kind: EventKind) -> Vec<Arc<Subscription>> {
        let specific = self.by_kind.get(&kind).into_iter().flat_map(|subs| subs.values());
        specific.chain(self.wildcard.values()).cloned().collect()
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        if self.wildcard.remove(&id).is_some() {
            return true;
        }

        let mut emptied = None;
        let mut found = false;
        for (kind, subs) in self.by_kind.iter_mut() {
            if subs.remove(&id).is_some() {
                found = true;
                if subs.is_empty() {
                    emptied = Some(*kind);
                }
                break;
            }
        }
        if let Some(kind) = emptied {
            self.by_kind.remove(&kind);
        }
        found
    }

    fn count(&self) -> usize {
        self.by_kind.values().map(HashMap::len).sum::<usize>() + self.wildcard.len()
    }
}

/// State shared between the bus handle and its workers
struct BusShared {
    config: BusConfig,
    buffer: RingBuffer<Event>,
    subscribers: RwLock<Subscribers>,
    next_id: AtomicU64,
    total_published: AtomicU64,
    total_dropped: AtomicU64,
    stopped: AtomicBool,
    /// Async publishes between their `stopped` check and their push
    in_flight: AtomicUsize,
    wake: Notify,
}

impl BusShared {
    fn dispatch(&self, event: &Event) {
        // The read lock is released before any handler runs.
        let targets = match self.subscribers.read() {
            Ok(subscribers) => subscribers.matching(event.kind()),
            Err(_) => {
                error!("EventBus::dispatch: subscriber lock poisoned");
                return;
            }
        };

        for subscription in targets {
            subscription.deliver(event);
        }
    }

    fn drain(&self) -> usize {
        let mut batch = Vec::with_capacity(self.config.batch_size);
        let mut drained = 0;
        while self.buffer.pop_batch(self.config.batch_size, &mut batch) > 0 {
            for event in batch.drain(..) {
                self.dispatch(&event);
                drained += 1;
            }
        }
        drained
    }
}

/// Central publish/subscribe hub
pub struct EventBus {
    shared: Arc<BusShared>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus and start its workers
    ///
    /// Workers are spawned on the current tokio runtime. Without a runtime
    /// the bus still accepts async publishes; they are dispatched on `close`.
    pub fn new(config: BusConfig) -> Self {
        let config = config.normalized();
        debug!(
            buffer_size = config.buffer_size,
            workers = config.workers,
            batch_size = config.batch_size,
            "EventBus::new: creating event bus"
        );

        let shared = Arc::new(BusShared {
            buffer: RingBuffer::new(config.buffer_size),
            subscribers: RwLock::new(Subscribers::default()),
            next_id: AtomicU64::new(1),
            total_published: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            wake: Notify::new(),
            config,
        });

        let (shutdown_tx, _) = watch::channel(false);

        let workers = match tokio::runtime::Handle::try_current() {
            Ok(handle) => (0..shared.config.workers)
                .map(|worker_id| {
                    let shared = Arc::clone(&shared);
                    let shutdown_rx = shutdown_tx.subscribe();
                    handle.spawn(worker_loop(worker_id, shared, shutdown_rx))
                })
                .collect(),
            Err(_) => {
                warn!("EventBus::new: no tokio runtime, async events dispatch on close");
                Vec::new()
            }
        };

        Self {
            shared,
            shutdown_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Create a bus with default settings
    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    /// Dispatch an event to all matching subscribers before returning
    pub fn publish(&self, event: Event) {
        debug!(event_type = event.event_type(), task_id = %event.task_id, "EventBus::publish");
        if self.shared.stopped.load(Ordering::Acquire) {
            debug!("EventBus::publish: bus closed, ignoring event");
            return;
        }
        if event.task_id.is_empty() {
            warn!(event_type = event.event_type(), "EventBus::publish: rejecting event without task id");
            return;
        }

        self.shared.total_published.fetch_add(1, Ordering::Relaxed);
        self.shared.dispatch(&event);
    }

    /// Queue an event for the workers
    ///
    /// Returns false when the event was not accepted: the buffer is full
    /// (counted as a drop), the bus is closed, or the event has no task id.
    pub fn publish_async(&self, event: Event) -> bool {
        // Registering before the `stopped` check pairs with `close`, which sets
        // `stopped` and then waits for `in_flight` to reach zero before its drain.
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let accepted = self.enqueue(event);
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        accepted
    }

    fn enqueue(&self, event: Event) -> bool {
        if self.shared.stopped.load(Ordering::SeqCst) {
            debug!(event_type = event.event_type(), "EventBus::publish_async: bus closed");
            return false;
        }
        if event.task_id.is_empty() {
            warn!(
                event_type = event.event_type(),
                "EventBus::publish_async: rejecting event without task id"
            );
            return false;
        }

        match self.shared.buffer.push(event) {
            Ok(()) => {
                self.shared.total_published.fetch_add(1, Ordering::Relaxed);
                self.shared.wake.notify_one();
                true
            }
            Err(event) => {
                self.shared.total_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event_type = event.event_type(),
                    task_id = %event.task_id,
                    "EventBus::publish_async: buffer full, dropping event"
                );
                false
            }
        }
    }

    /// Subscribe to one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler), None)
    }

    /// Subscribe to one event kind, skipping events the filter rejects
    pub fn subscribe_with_filter<F, P>(&self, kind: EventKind, handler: F, filter: P) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler), Some(Arc::new(filter)))
    }

    /// Subscribe to every event kind
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler), None)
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler, filter: Option<Filter>) -> SubscriptionId {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, ?kind, has_filter = filter.is_some(), "EventBus::register: new subscriber");

        let subscription = Arc::new(Subscription { id, handler, filter });
        match self.shared.subscribers.write() {
            Ok(mut subscribers) => match kind {
                Some(kind) => {
                    subscribers.by_kind.entry(kind).or_default().insert(id, subscription);
                }
                None => {
                    subscribers.wildcard.insert(id, subscription);
                }
            },
            Err(_) => error!(id, "EventBus::register: subscriber lock poisoned"),
        }
        id
    }

    /// Remove a subscription; false if the id is unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        debug!(id, "EventBus::unsubscribe: called");
        match self.shared.subscribers.write() {
            Ok(mut subscribers) => subscribers.remove(id),
            Err(_) => {
                error!(id, "EventBus::unsubscribe: subscriber lock poisoned");
                false
            }
        }
    }

    /// Create an emitter handle bound to one task
    pub fn emitter_for(self: &Arc<Self>, task_id: impl Into<String>, agent_type: impl Into<String>) -> TaskEmitter {
        let task_id = task_id.into();
        debug!(%task_id, "EventBus::emitter_for: creating emitter");
        TaskEmitter::new(Some(Arc::clone(self)), task_id, agent_type.into())
    }

    /// Snapshot of bus counters
    pub fn stats(&self) -> BusStats {
        let mut stats = BusStats {
            total_published: self.shared.total_published.load(Ordering::Relaxed),
            total_dropped: self.shared.total_dropped.load(Ordering::Relaxed),
            queue_size: self.shared.buffer.len(),
            queue_capacity: self.shared.buffer.capacity(),
            ..Default::default()
        };

        if let Ok(subscribers) = self.shared.subscribers.read() {
            stats.active_subscribers = subscribers.count();
            stats.wildcard_subscribers = subscribers.wildcard.len();
            stats.subscribers_by_kind = subscribers
                .by_kind
                .iter()
                .map(|(kind, subs)| (*kind, subs.len()))
                .collect();
        }
        stats
    }

    pub fn is_closed(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Stop the workers and dispatch whatever is still queued
    ///
    /// A second call returns `BusError::AlreadyClosed`.
    pub async fn close(&self) -> Result<(), BusError> {
        if self
            .shared
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("EventBus::close: already closed");
            return Err(BusError::AlreadyClosed);
        }

        info!("EventBus::close: shutting down");
        let _ = self.shutdown_tx.send(true);

        let handles = self
            .workers
            .lock()
            .map(|mut workers| std::mem::take(&mut *workers))
            .unwrap_or_default();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "EventBus::close: worker ended abnormally");
            }
        }

        // Publishers that passed the `stopped` check finish their push before the drain.
        while self.shared.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
        }

        let drained = self.shared.drain();
        let stats = self.stats();
        info!(
            drained,
            published = stats.total_published,
            dropped = stats.total_dropped,
            "EventBus::close: closed"
        );

        if let Ok(mut subscribers) = self.shared.subscribers.write() {
            *subscribers = Subscribers::default();
        }
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(true);
    }
}

/// Create a shared event bus with default settings
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_defaults())
}

async fn worker_loop(worker_id: usize, shared: Arc<BusShared>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(worker_id, "worker_loop: started");
    let batch_size = shared.config.batch_size;
    let idle_wait = shared.config.idle_wait;
    let mut batch = Vec::with_capacity(batch_size);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if shared.buffer.pop_batch(batch_size, &mut batch) > 0 {
            for event in batch.drain(..) {
                shared.dispatch(&event);
            }
            continue;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(idle_wait) => {}
        }
    }

    debug!(worker_id, "worker_loop: stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventPayload;

    fn progress(task_id: &str) -> Event {
        Event::new(
            task_id,
            EventPayload::TaskProgress {
                agent_type: "code-implementer".to_string(),
                stage: "execution".to_string(),
                message: "working".to_string(),
                progress: 0.7,
                elapsed_ms: 1,
            },
        )
    }

    fn started(task_id: &str) -> Event {
        Event::new(
            task_id,
            EventPayload::TaskStarted {
                agent_type: "code-implementer".to_string(),
                prompt: "do it".to_string(),
                retry_count: 0,
                model_hint: None,
                complexity: None,
                timeout_ms: 1000,
            },
        )
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &Event| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_every_matching_subscriber() {
        let bus = EventBus::with_defaults();
        let (first, h1) = counter();
        let (second, h2) = counter();
        let (other, h3) = counter();

        bus.subscribe(EventKind::TaskProgress, h1);
        bus.subscribe(EventKind::TaskProgress, h2);
        bus.subscribe(EventKind::TaskStarted, h3);

        bus.publish(progress("task_1"));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribe_all_sees_every_kind() {
        let bus = EventBus::with_defaults();
        let (count, handler) = counter();
        bus.subscribe_all(handler);

        bus.publish(started("task_1"));
        bus.publish(progress("task_1"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_filter_skips_rejected_events() {
        let bus = EventBus::with_defaults();
        let (count, handler) = counter();
        bus.subscribe_with_filter(EventKind::TaskProgress, handler, |e| e.task_id == "wanted");

        bus.publish(progress("wanted"));
        bus.publish(progress("unwanted"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::with_defaults();
        let (count, handler) = counter();
        let id = bus.subscribe(EventKind::TaskProgress, handler);
        let wildcard = bus.subscribe_all(|_| {});
        assert_eq!(bus.stats().active_subscribers, 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(bus.unsubscribe(wildcard));
        assert!(!bus.unsubscribe(9999));

        bus.publish(progress("task_1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let stats = bus.stats();
        assert_eq!(stats.active_subscribers, 0);
        assert!(stats.subscribers_by_kind.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_ids_are_monotonic() {
        let bus = EventBus::with_defaults();
        let a = bus.subscribe_all(|_| {});
        let b = bus.subscribe(EventKind::TaskFailed, |_| {});
        let c = bus.subscribe_all(|_| {});
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let bus = EventBus::with_defaults();
        bus.subscribe(EventKind::TaskProgress, |_| panic!("subscriber exploded"));
        let (count, handler) = counter();
        bus.subscribe(EventKind::TaskProgress, handler);

        bus.publish(progress("task_1"));
        bus.publish(progress("task_2"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_publish_async_delivers_via_workers() {
        let bus = EventBus::with_defaults();
        let (count, handler) = counter();
        bus.subscribe(EventKind::TaskProgress, handler);

        for i in 0..50 {
            assert!(bus.publish_async(progress(&format!("task_{i}"))));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while count.load(Ordering::SeqCst) < 50 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("workers did not deliver events");

        assert_eq!(bus.stats().total_published, 50);
    }

    #[test]
    fn test_publish_async_full_buffer_drops() {
        // No runtime, so nothing drains the buffer.
        let bus = EventBus::new(BusConfig {
            buffer_size: 2,
            ..Default::default()
        });

        assert!(bus.publish_async(progress("a")));
        assert!(bus.publish_async(progress("b")));
        assert!(!bus.publish_async(progress("c")));

        let stats = bus.stats();
        assert_eq!(stats.total_dropped, 1);
        assert_eq!(stats.total_published, 2);
        assert_eq!(stats.queue_size, 2);
        assert_eq!(stats.queue_capacity, 2);
    }

    #[test]
    fn test_empty_task_id_rejected() {
        let bus = EventBus::new(BusConfig::default());
        let (count, handler) = counter();
        bus.subscribe_all(handler);

        bus.publish(progress(""));
        assert!(!bus.publish_async(progress("")));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.stats().total_published, 0);
    }

    #[tokio::test]
    async fn test_close_drains_queue_and_rejects_second_close() {
        let bus = EventBus::new(BusConfig {
            workers: 1,
            ..Default::default()
        });
        let (count, handler) = counter();
        bus.subscribe_all(handler);

        for i in 0..200 {
            bus.publish_async(progress(&format!("task_{i}")));
        }

        assert_eq!(bus.close().await, Ok(()));
        assert_eq!(count.load(Ordering::SeqCst), 200);
        assert_eq!(bus.stats().queue_size, 0);
        assert_eq!(bus.close().await, Err(BusError::AlreadyClosed));
    }

    #[tokio::test]
    async fn test_closed_bus_ignores_publishes() {
        let bus = EventBus::with_defaults();
        let (count, handler) = counter();
        bus.subscribe_all(handler);
        bus.close().await.unwrap();

        bus.publish(progress("task_1"));
        assert!(!bus.publish_async(progress("task_1")));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn test_stats_by_kind() {
        let bus = EventBus::with_defaults();
        bus.subscribe(EventKind::TaskStarted, |_| {});
        bus.subscribe(EventKind::TaskStarted, |_| {});
        bus.subscribe(EventKind::BatchCompleted, |_| {});
        bus.subscribe_all(|_| {});

        let stats = bus.stats();
        assert_eq!(stats.active_subscribers, 4);
        assert_eq!(stats.wildcard_subscribers, 1);
        assert_eq!(stats.subscribers_by_kind.get(&EventKind::TaskStarted), Some(&2));
        assert_eq!(stats.subscribers_by_kind.get(&EventKind::BatchCompleted), Some(&1));
        assert_eq!(stats.queue_capacity, 16384);
    }

    #[tokio::test]
    async fn test_single_worker_preserves_order() {
        let bus = EventBus::new(BusConfig {
            workers: 1,
            ..Default::default()
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(EventKind::TaskProgress, move |e| s.lock().unwrap().push(e.task_id.clone()));

        let expected: Vec<String> = (0..100).map(|i| format!("task_{i}")).collect();
        for id in &expected {
            bus.publish_async(progress(id));
        }
        bus.close().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_account_for_every_event() {
        let bus = Arc::new(EventBus::new(BusConfig {
            buffer_size: 64,
            workers: 4,
            ..Default::default()
        }));
        let (delivered, handler) = counter();
        bus.subscribe_all(handler);

        let per_thread = 5_000;
        let accepted = Arc::new(AtomicUsize::new(0));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let bus = Arc::clone(&bus);
                let accepted = Arc::clone(&accepted);
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        if bus.publish_async(progress(&format!("task_{p}_{i}"))) {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        bus.close().await.unwrap();

        let stats = bus.stats();
        let accepted = accepted.load(Ordering::SeqCst);
        assert_eq!(delivered.load(Ordering::SeqCst), accepted);
        assert_eq!(stats.total_published as usize, accepted);
        assert_eq!(accepted + stats.total_dropped as usize, 4 * per_thread);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_publishers_racing_close_lose_nothing_accepted() {
        for _ in 0..50 {
            let bus = Arc::new(EventBus::new(BusConfig {
                workers: 2,
                ..Default::default()
            }));
            let (delivered, handler) = counter();
            bus.subscribe_all(handler);

            let accepted = Arc::new(AtomicUsize::new(0));
            let producers: Vec<_> = (0..3)
                .map(|p| {
                    let bus = Arc::clone(&bus);
                    let accepted = Arc::clone(&accepted);
                    std::thread::spawn(move || {
                        for i in 0..500 {
                            if bus.publish_async(progress(&format!("task_{p}_{i}"))) {
                                accepted.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    })
                })
                .collect();

            bus.close().await.unwrap();
            for producer in producers {
                producer.join().unwrap();
            }

            assert_eq!(delivered.load(Ordering::SeqCst), accepted.load(Ordering::SeqCst));
        }
    }

    #[tokio::test]
    async fn test_close_waits_for_publish_in_progress() {
        let bus = Arc::new(EventBus::new(BusConfig {
            workers: 1,
            ..Default::default()
        }));
        let (delivered, handler) = counter();
        bus.subscribe_all(handler);

        // A publisher that has passed the closed check but not pushed yet
        bus.shared.in_flight.fetch_add(1, Ordering::SeqCst);

        let closing = tokio::spawn({
            let bus = Arc::clone(&bus);
            async move { bus.close().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bus.is_closed());
        assert!(!closing.is_finished());

        assert!(bus.shared.buffer.push(started("task_late")).is_ok());
        bus.shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        closing.await.unwrap().unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
