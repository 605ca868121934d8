// src/plant/process.rs

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{MIN_RETRY_INTERVAL, PlantConfig};
use crate::errors::{PlantError, Result};
use crate::resource::{ResourceRegistry, Sharable, SharableResource};
use crate::runner::{Progress, RunState, RunnerArena, RunnerId, TaskRunner};
use crate::task::TaskSpec;

use super::PlantEvent;
use super::dispatch::{self, PlantShared};
use super::pool::WorkerPool;
use super::report;

/// Schedules task trees onto a fixed pool of workers.
///
/// A plant owns a [`ResourceRegistry`] and every runner it ever created.
/// Queuing a [`TaskSpec`] turns it into a runner tree and starts every
/// leaf that can start; the rest follow as their dependents finish.
///
/// Runners stay in memory until their tree is retired with
/// [`ProcessPlant::retire_tree`], so a long-lived plant that queues many
/// trees should retire each one once it has been inspected.
///
/// Must be created inside a Tokio runtime.
pub struct ProcessPlant {
    config: PlantConfig,
    registry: RwLock<ResourceRegistry>,
    shared: Arc<PlantShared>,
}

impl ProcessPlant {
    pub fn new(config: PlantConfig) -> Self {
        Self::with_registry(config, ResourceRegistry::new())
    }

    /// A retry interval below [`MIN_RETRY_INTERVAL`] is raised to it.
    pub fn with_registry(mut config: PlantConfig, registry: ResourceRegistry) -> Self {
        if config.retry_interval < MIN_RETRY_INTERVAL {
            warn!(
                requested = ?config.retry_interval,
                using = ?MIN_RETRY_INTERVAL,
                "retry interval too small; raising it"
            );
            config.retry_interval = MIN_RETRY_INTERVAL;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PlantShared {
            arena: Arc::new(RunnerArena::new()),
            pool: WorkerPool::new(config.workers),
            retry_interval: config.retry_interval,
            events: events_tx,
        });
        dispatch::spawn_dispatcher(Arc::downgrade(&shared), events_rx);

        info!(
            workers = config.workers,
            resource_timeout = %config.resource_timeout,
            resources = registry.len(),
            "process plant started"
        );

        Self {
            config,
            registry: RwLock::new(registry),
            shared,
        }
    }

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }

    /// A copy of the registry; the resources themselves are shared.
    pub fn registry(&self) -> ResourceRegistry {
        self.registry.read().clone()
    }

    pub fn add_resource(&self, key: impl Into<String>, resource: Arc<dyn Sharable>) {
        self.registry.write().add_resource(key, resource);
    }

    pub fn add_new_resource<T>(&self, key: impl Into<String>, value: T) -> Arc<SharableResource<T>>
    where
        T: fmt::Debug + Send + 'static,
    {
        self.registry.write().add_new_resource(key, value)
    }

    pub fn add_all_resources<I, K>(&self, resources: I)
    where
        I: IntoIterator<Item = (K, Arc<dyn Sharable>)>,
        K: Into<String>,
    {
        let mut registry = self.registry.write();
        for (key, resource) in resources {
            registry.add_resource(key, resource);
        }
    }

    pub fn add_sharable_map(&self, other: &ResourceRegistry) {
        self.registry.write().merge(other);
    }

    /// Create the runner tree for `spec` without starting anything.
    ///
    /// Fails with [`PlantError::UnknownResource`] if a task names a key
    /// that is not registered.
    pub fn build_runners(&self, spec: &TaskSpec) -> Result<RunnerId> {
        let registry = self.registry.read();
        self.shared
            .arena
            .insert_tree(spec, &registry, self.config.resource_timeout)
    }

    /// Create the runner tree for `spec` and start every runner that can
    /// start. Returns the root's id straight away.
    pub fn queue_task(&self, spec: &TaskSpec) -> Result<RunnerId> {
        let root = self.build_runners(spec)?;
        let submitted = dispatch::dispatch_ready(&self.shared, root)?;
        info!(
            task = spec.name(),
            runner = %root,
            runners = spec.tree_size(),
            submitted,
            "task tree queued"
        );
        Ok(root)
    }

    /// Start `id` if it can start, otherwise start whatever can start below it.
    ///
    /// When this call hands a non-root runner to the pool it waits for that
    /// runner to finish and returns its final state. Otherwise it returns
    /// the runner's current state without waiting.
    pub async fn queue_work_unit(&self, id: RunnerId) -> Result<RunState> {
        let runner = self.runner(id)?;
        let state = self.shared.arena.update_state(id)?;

        if state.can_start() {
            let submitted = dispatch::submit(&self.shared, &runner);
            if submitted && runner.parent().is_some() {
                return self.wait(id).await;
            }
            return Ok(runner.state());
        }

        if state == RunState::WaitingDependent {
            let submitted = dispatch::dispatch_ready(&self.shared, id)?;
            debug!(task = runner.name(), submitted, "queued dependents");
        }
        Ok(runner.state())
    }

    /// Report `id` as finished to the dispatch loop, which re-evaluates its
    /// parent and starts it if possible.
    pub fn signal_complete(&self, id: RunnerId) -> Result<()> {
        self.runner(id)?;
        self.shared
            .events
            .send(PlantEvent::Finished(id))
            .map_err(|_| PlantError::Other(anyhow!("dispatch loop has stopped")))
    }

    pub fn update_state(&self, id: RunnerId) -> Result<RunState> {
        self.shared.arena.update_state(id)
    }

    pub fn runner(&self, id: RunnerId) -> Result<Arc<TaskRunner>> {
        self.shared.arena.try_get(id)
    }

    /// Wait until `id` is terminal and its bookkeeping is done.
    pub async fn wait(&self, id: RunnerId) -> Result<RunState> {
        let runner = self.runner(id)?;
        let mut progress = runner.subscribe();
        let state = progress
            .wait_for(Progress::is_finished)
            .await
            .map_err(|_| PlantError::Other(anyhow!("{id} stopped publishing its state")))?
            .state;
        Ok(state)
    }

    /// Queue `spec` and wait for its root to finish.
    pub async fn run_task(&self, spec: &TaskSpec) -> Result<RunnerId> {
        let root = self.queue_task(spec)?;
        self.wait(root).await?;
        Ok(root)
    }

    /// One line per runner, indented with `-` per level.
    pub fn render_tree(&self, root: RunnerId) -> Result<String> {
        let tree = self.shared.arena.tree(root)?;
        Ok(report::render(&tree))
    }

    /// Number of runners created so far, across every queued tree.
    pub fn runner_count(&self) -> usize {
        self.shared.arena.len()
    }

    /// Runners still held by the plant, i.e. not retired.
    pub fn live_runners(&self) -> usize {
        self.shared.arena.live()
    }

    /// Forget the finished tree rooted at `root`. Returns the number of
    /// runners dropped.
    ///
    /// Fails with [`PlantError::TreeStillRunning`] while any runner of the
    /// tree is unsettled and with [`PlantError::NotATreeRoot`] for a
    /// dependent.
    pub fn retire_tree(&self, root: RunnerId) -> Result<usize> {
        let retired = self.shared.arena.retire(root)?;
        info!(runner = %root, retired, "task tree retired");
        Ok(retired)
    }

    /// Workers currently running a task.
    pub fn busy_workers(&self) -> usize {
        self.shared.pool.busy()
    }
}

impl fmt::Debug for ProcessPlant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessPlant")
            .field("config", &self.config)
            .field("registry", &*self.registry.read())
            .field("runners", &self.shared.arena.live())
            .finish_non_exhaustive()
    }
}
