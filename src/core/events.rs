//! Event delivery
//!
//! Subscribers are an observer list. Events are emitted strictly after the
//! corresponding state transition has committed to the transfer log, and a
//! misbehaving subscriber can never corrupt engine state: panics are
//! caught per subscriber and logged.

use crate::types::PluginEvent;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// A subscriber callback
pub type EventHandler = Arc<dyn Fn(&PluginEvent) + Send + Sync>;

/// Observer list the engine publishes lifecycle events through
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<EventHandler>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for all events
    pub fn subscribe(&self, handler: impl Fn(&PluginEvent) + Send + Sync + 'static) {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Deliver an event to every subscriber
    ///
    /// Subscribers are invoked outside the registration lock, so a handler
    /// may itself subscribe. A panicking handler is isolated and logged;
    /// remaining handlers still run.
    pub fn emit(&self, event: PluginEvent) {
        let snapshot: Vec<EventHandler> = self.handlers.read().clone();
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(event = event.name(), "event handler panicked; continuing");
            }
        }
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether any subscriber is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
