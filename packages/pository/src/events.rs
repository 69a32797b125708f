//! Minimal in-process event bus. Subscribers are registered at startup;
//! `emit` is fire-and-forget and isolates handler panics so a misbehaving
//! subscriber cannot take down the emitting request.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::RwLock};

use tracing::warn;

pub const INDEX_CHANGED: &str = "index-changed";

type Handler = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .expect("event handler registry poisoned")
            .entry(event.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    pub fn emit(&self, event: &str, payload: &str) {
        let handlers = self
            .handlers
            .read()
            .expect("event handler registry poisoned");
        let Some(registered) = handlers.get(event) else {
            return;
        };
        for handler in registered {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload)));
            if result.is_err() {
                warn!(event, payload, "event handler panicked");
            }
        }
    }
}
