//! Waypost worker pool.
//!
//! The pool owns the set of active mission workers: it accepts submissions,
//! enforces at-most-one-worker-per-mission, bounds concurrency when
//! configured, and coordinates graceful shutdown and startup-time resumption
//! against the snapshot store.

mod error;
mod pool;
mod worker;

pub use error::PoolError;
pub use pool::{PoolConfig, WorkerPool};
pub use worker::{StopRequest, Worker, WorkerState};
