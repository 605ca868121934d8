// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::demo::{self, Pipeline};
use crate::errors::{PlantError, Result};
use crate::task::TaskSpec;
use crate::types::{AcquireTimeout, HumanDuration};

use super::validate::dependency_order;

/// Smallest retry interval a plant runs with.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Runtime settings of a [`crate::plant::ProcessPlant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlantConfig {
    /// Size of the fixed worker pool.
    pub workers: usize,
    /// Default acquisition timeout for tasks that do not set their own.
    pub resource_timeout: AcquireTimeout,
    /// Upper bound on how long a runner sleeps between claim attempts when
    /// no release notification arrives.
    pub retry_interval: Duration,
}

impl PlantConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_resource_timeout(mut self, timeout: impl Into<AcquireTimeout>) -> Self {
        self.resource_timeout = timeout.into();
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resource_timeout: AcquireTimeout::default(),
            retry_interval: default_retry_interval().0,
        }
    }
}

/// `[plant]` section.
///
/// ```toml
/// [plant]
/// workers = 8
/// resource_timeout = "60s"   # or "none"
/// retry_interval = "5ms"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PlantSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub resource_timeout: AcquireTimeout,

    #[serde(default = "default_retry_interval")]
    pub retry_interval: HumanDuration,
}

fn default_workers() -> usize {
    8
}

fn default_retry_interval() -> HumanDuration {
    HumanDuration(Duration::from_millis(5))
}

impl Default for PlantSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resource_timeout: AcquireTimeout::default(),
            retry_interval: default_retry_interval(),
        }
    }
}

impl From<PlantSection> for PlantConfig {
    fn from(section: PlantSection) -> Self {
        Self {
            workers: section.workers,
            resource_timeout: section.resource_timeout,
            retry_interval: section.retry_interval.into(),
        }
    }
}

/// `[task."<name>"]` section.
///
/// A task either appends text to a string resource or prints resources to
/// the journal:
///
/// ```toml
/// [task."Eat"]
/// append = "ate food"
/// target = "body"
///
/// [task."Print results"]
/// print = ["body", "mind"]
/// dependents = ["Eat"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    /// Text appended as ` (<text>)` to `target`.
    #[serde(default)]
    pub append: Option<String>,

    #[serde(default)]
    pub target: Option<String>,

    /// Resources written to the journal, in order.
    #[serde(default)]
    pub print: Option<Vec<String>>,

    /// Tasks that must finish before this one starts.
    #[serde(default)]
    pub dependents: Vec<String>,

    /// Overrides `[plant].resource_timeout` for this task.
    #[serde(default)]
    pub timeout: Option<AcquireTimeout>,
}

/// What a validated [`TaskConfig`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind<'a> {
    Append { text: &'a str, target: &'a str },
    Print { keys: &'a [String] },
}

impl TaskConfig {
    /// `None` unless exactly one kind is configured (and `append` has a target).
    pub fn kind(&self) -> Option<TaskKind<'_>> {
        match (&self.append, &self.target, &self.print) {
            (Some(text), Some(target), None) => Some(TaskKind::Append { text, target }),
            (None, None, Some(keys)) => Some(TaskKind::Print { keys }),
            _ => None,
        }
    }
}

/// Configuration exactly as deserialized, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub plant: PlantSection,

    /// Initial values of the string resources, by key.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,

    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration. Built with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub plant: PlantConfig,
    pub resources: BTreeMap<String, String>,
    pub task: BTreeMap<String, TaskConfig>,
    root: String,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        plant: PlantConfig,
        resources: BTreeMap<String, String>,
        task: BTreeMap<String, TaskConfig>,
        root: String,
    ) -> Self {
        Self {
            plant,
            resources,
            task,
            root,
        }
    }

    /// The one task no other task lists as a dependent.
    pub fn root_task(&self) -> &str {
        &self.root
    }

    /// Build the resources and the task tree this file describes.
    pub fn pipeline(&self) -> Result<Pipeline> {
        let (mut registry, journal) = demo::journal_registry();
        for (key, value) in &self.resources {
            registry.add_new_resource(key.clone(), value.clone());
        }

        // Dependents come first, so every child spec exists before its parent.
        let mut built: BTreeMap<&str, TaskSpec> = BTreeMap::new();
        for name in dependency_order(&self.task)? {
            let task = &self.task[name];
            let spec = match task.kind() {
                Some(TaskKind::Append { text, target }) => demo::string_append(name, text, target),
                Some(TaskKind::Print { keys }) => demo::print_result(name, keys.iter().cloned()),
                None => {
                    return Err(PlantError::Config(format!(
                        "task '{name}' must set exactly one of `append` or `print`"
                    )));
                }
            };
            let spec = match task.timeout {
                Some(timeout) => spec.timeout(timeout),
                None => spec,
            };

            let mut children = Vec::with_capacity(task.dependents.len());
            for dep in &task.dependents {
                let child = built.remove(dep.as_str()).ok_or_else(|| {
                    PlantError::Config(format!("task '{dep}' is listed as a dependent twice"))
                })?;
                children.push(child);
            }
            built.insert(name, spec.dependents(children));
        }

        let root = built
            .remove(self.root.as_str())
            .ok_or_else(|| PlantError::Config(format!("root task '{}' was not built", self.root)))?;
        Ok(Pipeline {
            registry,
            journal,
            root,
        })
    }
}
