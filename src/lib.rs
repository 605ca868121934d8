// src/lib.rs

pub mod cli;
pub mod config;
pub mod demo;
pub mod errors;
pub mod logging;
pub mod plant;
pub mod resource;
pub mod runner;
pub mod task;
pub mod types;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{PlantConfig, default_config_path, load_and_validate};
use crate::demo::Pipeline;
use crate::plant::ProcessPlant;
use crate::task::TaskSpec;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (or the built-in pipeline)
/// - the process plant and its worker pool
/// - printing the journal and the final runner tree
pub async fn run(args: CliArgs) -> Result<()> {
    let (mut plant_config, pipeline, source) = match resolve_config_path(args.config.as_deref()) {
        Some(path) => {
            let cfg = load_and_validate(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            (cfg.plant, cfg.pipeline()?, path.display().to_string())
        }
        None => (
            PlantConfig::default(),
            demo::morning_prep(),
            "built-in morning prep".to_string(),
        ),
    };

    if let Some(workers) = args.workers {
        if workers == 0 {
            bail!("--workers must be >= 1");
        }
        plant_config.workers = workers;
    }

    if args.dry_run {
        print_dry_run(&source, &plant_config, &pipeline);
        return Ok(());
    }

    info!(pipeline = %source, root = pipeline.root.name(), "running pipeline");
    let plant = ProcessPlant::with_registry(plant_config, pipeline.registry.clone());
    let root = plant.run_task(&pipeline.root).await?;
    let tree = plant.render_tree(root)?;

    if !pipeline.log_tree(&tree) {
        warn!("journal still held by a task; tree not logged");
    }
    match pipeline.journal_text() {
        Some(text) => print!("{text}"),
        None => print!("{tree}"),
    }

    let runner = plant.runner(root)?;
    match runner.failure() {
        Some(failure) => Err(anyhow!(
            "pipeline '{}' failed: {}",
            runner.name(),
            failure.root_cause()
        )),
        None => Ok(()),
    }
}

/// The explicit `--config` path, else `Workplant.toml` if it exists.
fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let default = default_config_path();
            is_file(&default).then_some(default)
        }
    }
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

/// Simple dry-run output: plant settings, resources and the task tree.
fn print_dry_run(source: &str, plant: &PlantConfig, pipeline: &Pipeline) {
    println!("workplant dry-run ({source})");
    println!("  plant.workers = {}", plant.workers);
    println!("  plant.resource_timeout = {}", plant.resource_timeout);
    println!("  plant.retry_interval = {:?}", plant.retry_interval);
    println!();

    let keys: Vec<_> = pipeline.registry.keys().collect();
    println!("resources ({}): {}", keys.len(), keys.join(", "));
    println!();

    println!("tasks ({}):", pipeline.root.tree_size());
    let mut stack: Vec<(usize, &TaskSpec)> = vec![(0, &pipeline.root)];
    while let Some((depth, spec)) = stack.pop() {
        let keys: Vec<_> = spec.resource_keys().iter().map(String::as_str).collect();
        print!("  {}{} [{}]", "-".repeat(depth), spec.name(), keys.join(", "));
        if let Some(timeout) = spec.acquire_timeout() {
            print!(" timeout={timeout}");
        }
        println!();
        for child in spec.dependent_specs().iter().rev() {
            stack.push((depth + 1, child));
        }
    }

    debug!("dry-run complete (no execution)");
}
