// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, PlantConfig, RawConfigFile, TaskConfig, TaskKind};
use crate::demo::JOURNAL_KEY;
use crate::errors::{PlantError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PlantError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let root = validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(
            PlantConfig::from(raw.plant),
            raw.resources,
            raw.task,
            root,
        ))
    }
}

/// Run every check and return the name of the root task.
fn validate_raw_config(cfg: &RawConfigFile) -> Result<String> {
    ensure_has_tasks(cfg)?;
    validate_plant_section(cfg)?;
    validate_resources(cfg)?;
    validate_task_kinds(cfg)?;
    validate_task_dependents(cfg)?;
    dependency_order(&cfg.task)?;
    find_root(cfg)
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(PlantError::Config(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_plant_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.plant.workers == 0 {
        return Err(PlantError::Config(
            "[plant].workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.plant.retry_interval.0.is_zero() {
        return Err(PlantError::Config(
            "[plant].retry_interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_resources(cfg: &RawConfigFile) -> Result<()> {
    if cfg.resources.contains_key(JOURNAL_KEY) {
        return Err(PlantError::Config(format!(
            "resource key '{JOURNAL_KEY}' is reserved for the journal"
        )));
    }
    Ok(())
}

fn validate_task_kinds(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        let keys: Vec<&str> = match task.kind() {
            Some(TaskKind::Append { target, .. }) => vec![target],
            Some(TaskKind::Print { keys }) => keys.iter().map(String::as_str).collect(),
            None => {
                return Err(PlantError::Config(format!(
                    "task '{}' must set exactly one of `append` (with `target`) or `print`",
                    name
                )));
            }
        };

        for key in keys {
            if !cfg.resources.contains_key(key) {
                return Err(PlantError::Config(format!(
                    "task '{}' uses undeclared resource '{}'",
                    name, key
                )));
            }
        }
    }
    Ok(())
}

fn validate_task_dependents(cfg: &RawConfigFile) -> Result<()> {
    let mut claimed: BTreeMap<&str, &str> = BTreeMap::new();

    for (name, task) in cfg.task.iter() {
        let mut seen = BTreeSet::new();
        for dep in task.dependents.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(PlantError::Config(format!(
                    "task '{}' has unknown dependent '{}'",
                    name, dep
                )));
            }
            if dep == name {
                return Err(PlantError::Config(format!(
                    "task '{}' cannot list itself as a dependent",
                    name
                )));
            }
            if !seen.insert(dep.as_str()) {
                return Err(PlantError::Config(format!(
                    "task '{}' lists dependent '{}' twice",
                    name, dep
                )));
            }
            // Runner trees are trees: a shared dependent would run twice.
            if let Some(other) = claimed.insert(dep.as_str(), name.as_str()) {
                return Err(PlantError::Config(format!(
                    "task '{}' is a dependent of both '{}' and '{}'",
                    dep, other, name
                )));
            }
        }
    }
    Ok(())
}

fn find_root(cfg: &RawConfigFile) -> Result<String> {
    let listed: BTreeSet<&str> = cfg
        .task
        .values()
        .flat_map(|t| t.dependents.iter().map(String::as_str))
        .collect();
    let roots: Vec<&str> = cfg
        .task
        .keys()
        .map(String::as_str)
        .filter(|name| !listed.contains(name))
        .collect();

    match roots.as_slice() {
        [root] => Ok(root.to_string()),
        [] => Err(PlantError::Config(
            "no root task: every task is listed as a dependent".to_string(),
        )),
        many => Err(PlantError::Config(format!(
            "expected exactly one root task, found {}: {}",
            many.len(),
            many.join(", ")
        ))),
    }
}

/// Task names ordered so that every task comes after all of its dependents.
///
/// Fails with [`PlantError::PipelineCycle`] if the dependents form a cycle.
pub fn dependency_order(tasks: &BTreeMap<String, TaskConfig>) -> Result<Vec<&str>> {
    // Edge direction: dependent -> task. For
    //   [task.B]
    //   dependents = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in tasks.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in tasks.iter() {
        for dep in task.dependents.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        PlantError::PipelineCycle(format!(
            "cycle detected in task dependents involving task '{}'",
            cycle.node_id()
        ))
    })
}
