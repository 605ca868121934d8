#![allow(dead_code)]

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use workplant::config::PlantConfig;
use workplant::plant::ProcessPlant;
use workplant::resource::ResourceRegistry;

pub use workplant_test_utils::{ConcurrencyProbe, Recorder, init_tracing, with_timeout};

/// A plant with a short retry interval so contended tests finish quickly.
pub fn plant(workers: usize) -> ProcessPlant {
    plant_with(workers, ResourceRegistry::new())
}

pub fn plant_with(workers: usize, registry: ResourceRegistry) -> ProcessPlant {
    init_tracing();
    let config = PlantConfig::default()
        .with_workers(workers)
        .with_retry_interval(Duration::from_millis(1));
    ProcessPlant::with_registry(config, registry)
}

/// Write `contents` to a temporary `.toml` file that lives as long as the
/// returned handle.
pub fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file.flush().expect("flush temp config");
    file
}
