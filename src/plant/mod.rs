// src/plant/mod.rs

//! The process plant: schedules runner trees onto a fixed worker pool.
//!
//! - [`process`] is the public [`ProcessPlant`] API.
//! - [`dispatch`] submits runners to the pool and handles the completion
//!   cascade on a single event loop.
//! - [`pool`] is the bounded worker pool.
//! - [`report`] renders a runner tree for humans.

use crate::runner::RunnerId;

pub mod dispatch;
pub mod pool;
pub mod process;
pub mod report;

pub use pool::WorkerPool;
pub use process::ProcessPlant;

/// Events flowing into the plant's dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlantEvent {
    /// A runner left the worker pool (done, failed or timed out).
    Finished(RunnerId),
}
