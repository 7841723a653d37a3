//! Durable job queue: broker abstraction, producer API, handler registry and
//! retry policy.

pub mod broker;
pub mod handler;
pub mod memory;
pub mod postgres;
pub mod producer;
pub mod registry;
pub mod retry;

pub use broker::Broker;
pub use handler::{HandlerError, JobHandler};
pub use memory::MemoryBroker;
pub use postgres::PgBroker;
pub use producer::Producer;
pub use registry::HandlerRegistry;
pub use retry::RetryPolicy;
