// src/config/mod.rs

//! Configuration loading and validation for workplant.
//!
//! Responsibilities:
//! - Define the TOML-backed data model and [`PlantConfig`] (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate the pipeline: task kinds, resources, dependents (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, MIN_RETRY_INTERVAL, PlantConfig, PlantSection, RawConfigFile, TaskConfig, TaskKind};
pub use validate::dependency_order;
