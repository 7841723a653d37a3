use std::collections::HashMap;
use std::sync::Arc;

use gympoint_common::error::QueueError;

use crate::handler::JobHandler;

/// Process-wide mapping from job key to handler.
///
/// Built once at startup, then shared behind an `Arc` and only read: there is
/// no interior mutability, so concurrent lookups from many workers need no
/// locking.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `key`. Re-registering a key replaces the previous
    /// binding (last registration wins) and returns it.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Option<Arc<dyn JobHandler>> {
        let key = key.into();
        let previous = self.handlers.insert(key.clone(), handler);
        if previous.is_some() {
            tracing::warn!(key = %key, "Job handler re-registered; previous binding replaced");
        } else {
            tracing::debug!(key = %key, "Job handler registered");
        }
        previous
    }

    /// Register a handler under its own `JobHandler::key`.
    pub fn register_handler<H: JobHandler + 'static>(&mut self, handler: H) {
        let key = handler.key();
        self.register(key, Arc::new(handler));
    }

    /// Resolve the handler bound to `key`.
    pub fn resolve(&self, key: &str) -> Result<Arc<dyn JobHandler>, QueueError> {
        self.handlers
            .get(key)
            .cloned()
            .ok_or_else(|| QueueError::UnknownJobType(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Registered keys, sorted for stable log output.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
