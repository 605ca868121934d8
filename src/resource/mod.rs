// src/resource/mod.rs

//! Shared resources and their registry.
//!
//! - [`sharable`] holds the [`Sharable`] seam plus the exclusive
//!   [`SharableResource`].
//! - [`read_only`] holds [`ReadOnlyResource`], which hands out snapshots
//!   instead of holding the claim across the caller's use of the value.
//! - [`registry`] maps resource keys to shared resources.

pub mod read_only;
pub mod registry;
pub mod sharable;

pub use read_only::ReadOnlyResource;
pub use registry::ResourceRegistry;
pub use sharable::{Claim, ClaimedValue, Sharable, SharableResource};
