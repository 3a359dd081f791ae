//! Event Bus Architecture for Live Observability
//!
//! Every task and batch transition emits an event. Consumers (the CLI progress
//! display, the in-memory history) subscribe to the bus.
//!
//! # Architecture
//!
//! ```text
//!   Orchestrator            TaskExecutor
//!   - BatchStarted          - TaskStarted
//!   - BatchCompleted        - TaskProgress (per stage)
//!   - BatchFailed           - TaskCompleted / TaskFailed
//!         │                       │
//!         └──────────┬────────────┘
//!                    ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EVENT BUS                              │
//! │   publish:       dispatch on caller's thread                 │
//! │   publish_async: lock-free RingBuffer → worker pool          │
//! └─────────────────────────────────────────────────────────────┘
//!                    ↓
//!     kind subscribers + wildcard subscribers
//!     (EventHistory, CLI display, tests)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskrelay::events::{EventBus, EventKind};
//!
//! let bus = Arc::new(EventBus::with_defaults());
//! bus.subscribe(EventKind::TaskFailed, |event| eprintln!("failed: {}", event.task_id));
//!
//! let emitter = bus.emitter_for("task_1_0a1b2c3d", "code-implementer");
//! emitter.progress("execution", "Running", 0.7, elapsed);
//!
//! bus.close().await?;
//! ```

mod bus;
mod emitter;
mod history;
mod ring;
mod types;

pub use bus::{
    BusConfig, BusError, BusStats, DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_SIZE, DEFAULT_WORKERS, EventBus, Filter, Handler,
    SubscriptionId, create_event_bus,
};
pub use emitter::TaskEmitter;
pub(crate) use emitter::millis;
pub use history::{DEFAULT_HISTORY_SIZE, EventHistory};
pub use ring::RingBuffer;
pub use types::{Event, EventKind, EventPayload};
