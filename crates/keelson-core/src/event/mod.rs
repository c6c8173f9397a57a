//! Event plumbing.
//!
//! `bus` distributes run-lifecycle notifications. `listener` and `bridge`
//! turn external asynchronous signals (timers, queues, webhooks) into
//! task outputs that are resolved once and checkpointed before the source
//! is acknowledged.

pub mod bridge;
pub mod bus;
pub mod listener;

pub use bridge::EventBridge;
pub use bus::EventBus;
pub use listener::{EventListener, ListenerRegistry, TimerListener, sleep, wait_for_event};
