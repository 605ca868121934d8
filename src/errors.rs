// src/errors.rs

//! Crate-wide error types.
//!
//! - [`PlantError`] covers everything the plant API, the config loader and
//!   the parameter accessors can return.
//! - [`RunFailure`] is the cause a runner captures when it ends in
//!   `ERROR`. It is stored behind an `Arc` so that ancestors can inherit it
//!   without copying.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::runner::RunnerId;

#[derive(Error, Debug)]
pub enum PlantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("task '{task}' requires unknown resource '{key}'")]
    UnknownResource { task: String, key: String },

    #[error("unknown runner {0}")]
    UnknownRunner(RunnerId),

    #[error("runner {0} is not the root of a task tree")]
    NotATreeRoot(RunnerId),

    #[error("task tree {0} still has unfinished runners")]
    TreeStillRunning(RunnerId),

    #[error("resource '{0}' was not claimed for this task")]
    MissingParam(String),

    #[error("resource '{0}' is already borrowed by this task")]
    ParamInUse(String),

    #[error("resource '{key}' does not hold a value of type {expected}")]
    ParamType { key: String, expected: &'static str },

    #[error("Cycle detected in pipeline: {0}")]
    PipelineCycle(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PlantError>;

/// Why a runner ended in `ERROR`.
#[derive(Error, Debug)]
pub enum RunFailure {
    /// The runner could not claim every required resource before its
    /// acquisition deadline.
    #[error("task '{task}' could not claim its resources within {timeout:?}: {resources}")]
    ResourceAcquisitionTimeout {
        task: String,
        timeout: Duration,
        resources: String,
    },

    /// The work closure returned an error or panicked.
    #[error("task '{task}' failed: {source}")]
    WorkFailure {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    /// A dependent ended in `ERROR`; the parent never ran.
    #[error("task '{task}' cannot run because dependent '{dependent}' failed")]
    InheritedFailure {
        task: String,
        dependent: String,
        #[source]
        cause: Arc<RunFailure>,
    },
}

impl RunFailure {
    /// Name of the task this failure is attributed to.
    pub fn task(&self) -> &str {
        match self {
            RunFailure::ResourceAcquisitionTimeout { task, .. }
            | RunFailure::WorkFailure { task, .. }
            | RunFailure::InheritedFailure { task, .. } => task,
        }
    }

    /// Follow inherited failures down to the runner that actually failed.
    pub fn root_cause(&self) -> &RunFailure {
        let mut current = self;
        while let RunFailure::InheritedFailure { cause, .. } = current {
            current = cause;
        }
        current
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RunFailure::ResourceAcquisitionTimeout { .. })
    }

    pub fn is_inherited(&self) -> bool {
        matches!(self, RunFailure::InheritedFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_walks_inherited_chain() {
        let leaf = Arc::new(RunFailure::WorkFailure {
            task: "leaf".to_string(),
            source: anyhow::anyhow!("boom"),
        });
        let mid = Arc::new(RunFailure::InheritedFailure {
            task: "mid".to_string(),
            dependent: "leaf".to_string(),
            cause: leaf,
        });
        let top = RunFailure::InheritedFailure {
            task: "top".to_string(),
            dependent: "mid".to_string(),
            cause: mid,
        };

        assert_eq!(top.task(), "top");
        assert!(top.is_inherited());
        assert_eq!(top.root_cause().task(), "leaf");
        assert!(!top.root_cause().is_inherited());
        assert!(top.root_cause().to_string().contains("boom"));
    }
}
