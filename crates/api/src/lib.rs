//! HTTP surface for the job queue: enqueue jobs and inspect dead letters.

pub mod routes;
pub mod state;
