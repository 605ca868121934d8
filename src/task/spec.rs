// src/task/spec.rs

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::errors::RunFailure;
use crate::task::params::ResourceParams;
use crate::types::AcquireTimeout;

/// The work a task performs once its resources are claimed.
pub type WorkFn = Arc<dyn Fn(&ResourceParams<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Called when the task ends in `ERROR`.
///
/// `params` is `Some` only when the work closure itself failed; the
/// resources are still claimed at that point. An acquisition timeout passes
/// `None` even if some keys were claimed on the last attempt, because every
/// contended attempt gives its claims back before retrying. Inherited
/// failures also pass `None`.
pub type FailureHook = Arc<dyn Fn(&RunFailure, Option<&ResourceParams<'_>>) + Send + Sync>;

/// Immutable description of one unit of work and everything it needs.
///
/// Specs nest: `dependents` must all finish successfully before this task
/// runs. Cloning is cheap for the closures (they are shared) but copies
/// the dependent tree.
#[derive(Clone)]
pub struct TaskSpec {
    name: String,
    resource_keys: BTreeSet<String>,
    dependents: Vec<TaskSpec>,
    work: WorkFn,
    on_failure: Option<FailureHook>,
    timeout: Option<AcquireTimeout>,
}

impl TaskSpec {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(&ResourceParams<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            resource_keys: BTreeSet::new(),
            dependents: Vec::new(),
            work: Arc::new(work),
            on_failure: None,
            timeout: None,
        }
    }

    /// A task that only groups its dependents.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, |_| Ok(()))
    }

    pub fn resource(mut self, key: impl Into<String>) -> Self {
        self.resource_keys.insert(key.into());
        self
    }

    pub fn resources<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.resource_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn dependent(mut self, spec: TaskSpec) -> Self {
        self.dependents.push(spec);
        self
    }

    pub fn dependents<I>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = TaskSpec>,
    {
        self.dependents.extend(specs);
        self
    }

    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RunFailure, Option<&ResourceParams<'_>>) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Override the plant-wide acquisition timeout for this task.
    pub fn timeout(mut self, timeout: impl Into<AcquireTimeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_keys(&self) -> &BTreeSet<String> {
        &self.resource_keys
    }

    pub fn dependent_specs(&self) -> &[TaskSpec] {
        &self.dependents
    }

    pub fn acquire_timeout(&self) -> Option<AcquireTimeout> {
        self.timeout
    }

    pub(crate) fn work(&self) -> &WorkFn {
        &self.work
    }

    pub(crate) fn failure_hook(&self) -> Option<&FailureHook> {
        self.on_failure.as_ref()
    }

    /// Number of tasks in this tree, including `self`.
    pub fn tree_size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(spec) = stack.pop() {
            count += 1;
            stack.extend(spec.dependents.iter());
        }
        count
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("resource_keys", &self.resource_keys)
            .field("dependents", &self.dependents)
            .field("timeout", &self.timeout)
            .field("has_failure_hook", &self.on_failure.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn builder_collects_everything() {
        let leaf = TaskSpec::noop("leaf").resource("a");
        let spec = TaskSpec::noop("root")
            .resources(["b", "a", "b"])
            .dependent(leaf.clone())
            .dependents(vec![leaf])
            .timeout(Duration::from_millis(10))
            .on_failure(|_, _| {});

        assert_eq!(spec.name(), "root");
        assert_eq!(
            spec.resource_keys().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(spec.dependent_specs().len(), 2);
        assert_eq!(spec.tree_size(), 3);
        assert_eq!(
            spec.acquire_timeout(),
            Some(AcquireTimeout::After(Duration::from_millis(10)))
        );
        assert!(spec.failure_hook().is_some());
    }
}
