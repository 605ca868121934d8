// src/task/mod.rs

//! Task descriptors.
//!
//! A [`TaskSpec`] is plain data: a name, the resource keys it needs, the
//! specs that must finish first, and the closures to run. The plant turns
//! a spec tree into runners; the spec itself never changes.

pub mod params;
pub mod spec;

pub use params::ResourceParams;
pub use spec::{FailureHook, TaskSpec, WorkFn};
