//! Shared application state for the Axum API server.

use std::sync::Arc;

use gympoint_queue::{Broker, Producer};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn Broker>,
    pub producer: Producer,
}

impl AppState {
    pub fn new(broker: Arc<dyn Broker>, default_max_attempts: i32) -> Self {
        Self {
            producer: Producer::new(broker.clone(), default_max_attempts),
            broker,
        }
    }
}
