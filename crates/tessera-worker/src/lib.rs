//! Tessera Worker
//!
//! This crate runs graph nodes. A [`Worker`] consumes jobs from the dispatch
//! queue, executes them, and cascades completions to dependents:
//!
//! ```text
//!   consume ──▶ decode job ──▶ resolve refs ──▶ compute ──▶ complete_node
//!                                                              │
//!                      ┌───────────────────────────────────────┤
//!                      ▼                                       ▼
//!          publish ready dependents            fail orphaned dependents
//!                      │                         (propagate policy)
//!                      └───────────────▶ ack ◀───────────┘
//! ```
//!
//! Operator errors and panics become error records. Backend errors stop the
//! worker without acknowledging the delivery, so it is redelivered once a
//! worker with the same consumer name recovers.
//!
//! [`WorkerPool`] runs several workers on OS threads, stopped through a shared
//! `CancellationToken`.

mod error;
mod pool;
mod worker;

pub use error::WorkerError;
pub use pool::WorkerPool;
pub use worker::{JobReport, Worker, WorkerOptions, WorkerStats};
