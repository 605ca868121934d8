// src/runner/mod.rs

//! Runners: the execution side of a task.
//!
//! - [`state`] holds [`RunState`] and [`RunnerId`].
//! - [`task_runner`] is the per-task record (state, timing, claims).
//! - [`arena`] owns every runner and recomputes states across a tree.
//! - [`execution`] is the claim/run/retry loop a worker drives.

pub mod arena;
pub(crate) mod execution;
pub mod state;
pub mod task_runner;

pub use arena::RunnerArena;
pub use state::{Progress, RunState, RunnerId};
pub use task_runner::TaskRunner;
