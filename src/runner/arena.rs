// src/runner/arena.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::errors::{PlantError, Result, RunFailure};
use crate::resource::{ResourceRegistry, Sharable};
use crate::task::TaskSpec;
use crate::types::AcquireTimeout;

use super::state::{RunState, RunnerId};
use super::task_runner::TaskRunner;

/// Owner of every runner a plant has created.
///
/// Ids are never reused. A finished tree can be retired with
/// [`RunnerArena::retire`], which drops its runners and leaves empty slots
/// behind; until then every runner stays in memory.
#[derive(Debug, Default)]
pub struct RunnerArena {
    runners: RwLock<Vec<Option<Arc<TaskRunner>>>>,
}

fn slot(runners: &[Option<Arc<TaskRunner>>], id: RunnerId) -> Option<&Arc<TaskRunner>> {
    runners.get(id.index()).and_then(Option::as_ref)
}

impl RunnerArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids handed out, retired ones included.
    pub fn len(&self) -> usize {
        self.runners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.read().is_empty()
    }

    /// Runners that have not been retired.
    pub fn live(&self) -> usize {
        self.runners.read().iter().flatten().count()
    }

    pub fn get(&self, id: RunnerId) -> Option<Arc<TaskRunner>> {
        slot(&self.runners.read(), id).cloned()
    }

    pub fn try_get(&self, id: RunnerId) -> Result<Arc<TaskRunner>> {
        self.get(id).ok_or(PlantError::UnknownRunner(id))
    }

    /// Turn a spec tree into runners and return the root's id.
    ///
    /// Ids are assigned in pre-order, so a parent always has a smaller id
    /// than its dependents. Resource keys are resolved against `registry`
    /// before anything is inserted: an unknown key leaves the arena
    /// untouched.
    pub fn insert_tree(
        &self,
        spec: &TaskSpec,
        registry: &ResourceRegistry,
        default_timeout: AcquireTimeout,
    ) -> Result<RunnerId> {
        let mut flat: Vec<(&TaskSpec, Option<usize>)> = Vec::with_capacity(spec.tree_size());
        let mut stack = vec![(spec, None)];
        while let Some((node, parent)) = stack.pop() {
            let slot = flat.len();
            flat.push((node, parent));
            for child in node.dependent_specs().iter().rev() {
                stack.push((child, Some(slot)));
            }
        }

        let mut resolved = Vec::with_capacity(flat.len());
        for (node, _) in &flat {
            let mut resources: BTreeMap<String, Arc<dyn Sharable>> = BTreeMap::new();
            for key in node.resource_keys() {
                let resource = registry.get(key).ok_or_else(|| PlantError::UnknownResource {
                    task: node.name().to_string(),
                    key: key.clone(),
                })?;
                resources.insert(key.clone(), resource.clone());
            }
            resolved.push(resources);
        }

        let mut runners = self.runners.write();
        let base = runners.len();

        let mut children: Vec<Vec<RunnerId>> = vec![Vec::new(); flat.len()];
        for (slot, (_, parent)) in flat.iter().enumerate() {
            if let Some(parent) = parent {
                children[*parent].push(RunnerId::new(base + slot));
            }
        }

        for (((node, parent), resources), dependents) in
            flat.into_iter().zip(resolved).zip(children)
        {
            let id = RunnerId::new(runners.len());
            let timeout = node.acquire_timeout().unwrap_or(default_timeout);
            runners.push(Some(Arc::new(TaskRunner::new(
                id,
                node,
                parent.map(|p| RunnerId::new(base + p)),
                dependents,
                resources,
                timeout,
            ))));
        }

        let root = RunnerId::new(base);
        debug!(root = %root, task = spec.name(), count = runners.len() - base, "runner tree created");
        Ok(root)
    }

    /// Recompute the state of `id` and of every dependent below it that is
    /// neither terminal nor executing, and return the new state of `id`.
    ///
    /// Terminal and executing runners are returned unchanged. A runner whose
    /// dependent is in `ERROR` becomes `ERROR` itself, inheriting the cause;
    /// its failure hook runs once, after all state locks are released.
    pub fn update_state(&self, id: RunnerId) -> Result<RunState> {
        let mut newly_failed = Vec::new();

        let state = {
            let runners = self.runners.read();
            if slot(&runners, id).is_none() {
                return Err(PlantError::UnknownRunner(id));
            }

            // Pre-order walk; reversed, every dependent comes before its parent.
            let mut order = Vec::new();
            let mut stack = vec![id];
            while let Some(next) = stack.pop() {
                let Some(runner) = slot(&runners, next) else {
                    continue;
                };
                order.push(next);
                let state = runner.state();
                if !state.is_terminal() && !state.is_executing() {
                    stack.extend(runner.dependents().iter().copied());
                }
            }

            let mut computed: HashMap<RunnerId, RunState> = HashMap::with_capacity(order.len());
            for next in order.iter().rev() {
                let Some(runner) = slot(&runners, *next) else {
                    continue;
                };
                let (state, inherited) = reevaluate(runner, &runners, &computed);
                if let Some(failure) = inherited {
                    newly_failed.push((runner.clone(), failure));
                }
                computed.insert(*next, state);
            }

            computed.get(&id).copied().unwrap_or(RunState::Error)
        };

        for (runner, failure) in newly_failed {
            info!(task = runner.name(), error = %failure, "dependent failed; task will not run");
            runner.handle_failure(&failure, None);
        }

        Ok(state)
    }

    /// Sum of the recorded total times of `runner`'s dependents. Dependents
    /// that never ran count as zero.
    pub fn dependents_total(&self, runner: &TaskRunner) -> Duration {
        let runners = self.runners.read();
        runner
            .dependents()
            .iter()
            .filter_map(|d| slot(&runners, *d))
            .filter_map(|d| d.total_time())
            .sum()
    }

    /// Snapshot of the runners in the tree rooted at `root`, pre-order,
    /// paired with their depth.
    pub fn tree(&self, root: RunnerId) -> Result<Vec<(usize, Arc<TaskRunner>)>> {
        let runners = self.runners.read();
        if slot(&runners, root).is_none() {
            return Err(PlantError::UnknownRunner(root));
        }

        let mut out = Vec::new();
        let mut stack = vec![(0, root)];
        while let Some((depth, id)) = stack.pop() {
            let Some(runner) = slot(&runners, id) else {
                continue;
            };
            for dep in runner.dependents().iter().rev() {
                stack.push((depth + 1, *dep));
            }
            out.push((depth, runner.clone()));
        }
        Ok(out)
    }

    /// Drop every runner of the tree rooted at `root` and return how many
    /// were removed. Their ids are not reused and resolve to
    /// [`PlantError::UnknownRunner`] afterwards.
    ///
    /// Every runner in the tree must be settled: an `ERROR` root can finish
    /// while a sibling of the failed dependent is still running.
    pub fn retire(&self, root: RunnerId) -> Result<usize> {
        let mut runners = self.runners.write();
        let runner = slot(&runners, root).ok_or(PlantError::UnknownRunner(root))?;
        if runner.parent().is_some() {
            return Err(PlantError::NotATreeRoot(root));
        }

        let mut ids = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(runner) = slot(&runners, id) else {
                continue;
            };
            if !runner.is_settled() {
                return Err(PlantError::TreeStillRunning(root));
            }
            stack.extend(runner.dependents().iter().copied());
            ids.push(id);
        }

        for id in &ids {
            runners[id.index()] = None;
        }
        debug!(root = %root, count = ids.len(), "runner tree retired");
        Ok(ids.len())
    }
}

/// New state for one runner, given the already-recomputed states of the
/// dependents in `computed`. Returns the inherited failure when this call
/// moved the runner into `ERROR`.
fn reevaluate(
    runner: &Arc<TaskRunner>,
    runners: &[Option<Arc<TaskRunner>>],
    computed: &HashMap<RunnerId, RunState>,
) -> (RunState, Option<Arc<RunFailure>>) {
    let current = runner.state();
    if current.is_terminal() || current.is_executing() {
        return (current, None);
    }

    // A dependent counts as DONE only once its times are recorded, so the
    // parent's total always includes them.
    let dependent_state = |dep: &RunnerId| {
        let dependent = slot(runners, *dep)?;
        Some(match computed.get(dep).copied().unwrap_or_else(|| dependent.state()) {
            RunState::Done if !dependent.is_settled() => RunState::InProgress,
            state => state,
        })
    };

    let summary = RunState::summarize(runner.dependents().iter().filter_map(dependent_state));
    let next = match summary {
        RunState::Error => {
            let failed = runner
                .dependents()
                .iter()
                .filter_map(|d| slot(runners, *d))
                .find_map(|d| d.failure().map(|cause| (d.name().to_string(), cause)));

            if let Some((dependent, cause)) = failed {
                let failure = Arc::new(RunFailure::InheritedFailure {
                    task: runner.name().to_string(),
                    dependent,
                    cause,
                });
                if runner.fail(failure.clone()) {
                    runner.settle(None, None);
                    return (RunState::Error, Some(failure));
                }
                return (runner.state(), None);
            }
            // Error is always stored with its cause; a dependent observed
            // in ERROR without one has not finished publishing yet.
            RunState::WaitingDependent
        }
        RunState::Done => {
            if runner.resources_available() {
                RunState::Ready
            } else {
                RunState::WaitingResource
            }
        }
        _ => RunState::WaitingDependent,
    };

    (runner.transition(current, next), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        registry.add_new_resource("body", String::new());
        registry
    }

    #[test]
    fn ids_are_pre_order_and_links_are_wired() {
        let spec = TaskSpec::noop("root").dependents([
            TaskSpec::noop("a").dependent(TaskSpec::noop("a1")),
            TaskSpec::noop("b"),
        ]);
        let arena = RunnerArena::new();
        let root = arena.insert_tree(&spec, &registry(), AcquireTimeout::default()).unwrap();

        let names: Vec<_> = (0..arena.len())
            .map(|i| arena.get(RunnerId::new(i)).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);

        let root = arena.get(root).unwrap();
        assert_eq!(root.dependents(), &[RunnerId::new(1), RunnerId::new(3)]);
        assert_eq!(root.state(), RunState::WaitingDependent);
        let a1 = arena.get(RunnerId::new(2)).unwrap();
        assert_eq!(a1.parent(), Some(RunnerId::new(1)));
        assert_eq!(a1.state(), RunState::Ready);
    }

    #[test]
    fn unknown_resource_leaves_arena_untouched() {
        let spec = TaskSpec::noop("root").dependent(TaskSpec::noop("leaf").resource("mind"));
        let arena = RunnerArena::new();
        let err = arena
            .insert_tree(&spec, &registry(), AcquireTimeout::default())
            .unwrap_err();
        assert!(matches!(err, PlantError::UnknownResource { ref key, .. } if key == "mind"));
        assert!(arena.is_empty());
    }

    #[test]
    fn second_tree_gets_fresh_ids() {
        let arena = RunnerArena::new();
        arena.insert_tree(&TaskSpec::noop("one"), &registry(), AcquireTimeout::default()).unwrap();
        let spec = TaskSpec::noop("two").dependent(TaskSpec::noop("leaf"));
        let root = arena.insert_tree(&spec, &registry(), AcquireTimeout::default()).unwrap();
        assert_eq!(root, RunnerId::new(1));
        let leaf = arena.get(RunnerId::new(2)).unwrap();
        assert_eq!(leaf.parent(), Some(root));
    }

    #[test]
    fn held_resource_means_waiting_resource() {
        let mut reg = ResourceRegistry::new();
        let body = reg.add_new_resource("body", String::new());
        let arena = RunnerArena::new();
        let id = arena
            .insert_tree(&TaskSpec::noop("t").resource("body"), &reg, AcquireTimeout::default())
            .unwrap();

        drop(body.claim(RunnerId::EXTERNAL));
        assert_eq!(arena.update_state(id).unwrap(), RunState::WaitingResource);
        body.release(RunnerId::EXTERNAL);
        assert_eq!(arena.update_state(id).unwrap(), RunState::Ready);
    }

    #[test]
    fn error_is_inherited_up_the_chain_and_hook_sees_no_params() {
        let hook_calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let calls = hook_calls.clone();
        let spec = TaskSpec::noop("top")
            .on_failure(move |failure, params| {
                calls.lock().push((failure.to_string(), params.is_none()));
            })
            .dependent(
                TaskSpec::noop("mid").dependents([
                    TaskSpec::new("leaf", |_| Err(anyhow::anyhow!("broken"))),
                    TaskSpec::noop("sibling"),
                ]),
            );
        let arena = RunnerArena::new();
        let root = arena.insert_tree(&spec, &registry(), AcquireTimeout::default()).unwrap();

        let leaf = arena.get(RunnerId::new(2)).unwrap();
        leaf.attempt_once();
        assert_eq!(leaf.state(), RunState::Error);

        assert_eq!(arena.update_state(root).unwrap(), RunState::Error);
        let mid = arena.get(RunnerId::new(1)).unwrap();
        assert_eq!(mid.state(), RunState::Error);
        assert_eq!(mid.failure().unwrap().root_cause().task(), "leaf");

        // A second evaluation must not call the hook again.
        assert_eq!(arena.update_state(root).unwrap(), RunState::Error);
        let calls = hook_calls.lock();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.contains("'mid' failed"), "{}", calls[0].0);
        assert!(calls[0].1);

        // Sibling was never touched.
        let sibling = arena.get(RunnerId::new(3)).unwrap();
        assert_eq!(sibling.state(), RunState::Ready);
    }

    #[test]
    fn parent_waits_for_every_dependent() {
        let spec = TaskSpec::noop("P").dependents([TaskSpec::noop("C1"), TaskSpec::noop("C2")]);
        let arena = RunnerArena::new();
        let parent = arena.insert_tree(&spec, &registry(), AcquireTimeout::default()).unwrap();
        let c1 = arena.get(RunnerId::new(1)).unwrap();
        let c2 = arena.get(RunnerId::new(2)).unwrap();

        assert_eq!(arena.update_state(parent).unwrap(), RunState::WaitingDependent);
        c1.attempt_once();
        c1.settle(None, None);
        assert_eq!(arena.update_state(parent).unwrap(), RunState::WaitingDependent);

        // Done but not yet settled still holds the parent back.
        c2.attempt_once();
        assert_eq!(arena.update_state(parent).unwrap(), RunState::WaitingDependent);
        c2.settle(None, None);
        assert_eq!(arena.update_state(parent).unwrap(), RunState::Ready);
    }

    #[test]
    fn executing_runner_is_not_reevaluated() {
        let mut reg = ResourceRegistry::new();
        let body = reg.add_new_resource("body", String::new());
        let arena = RunnerArena::new();
        let id = arena
            .insert_tree(&TaskSpec::noop("t").resource("body"), &reg, AcquireTimeout::default())
            .unwrap();
        let runner = arena.get(id).unwrap();

        runner.begin(std::time::Instant::now());
        drop(body.claim(id));
        assert_eq!(arena.update_state(id).unwrap(), RunState::Initiated);
        body.release(id);
    }

    #[test]
    fn dependents_total_skips_runners_that_never_ran() {
        let spec = TaskSpec::noop("root").dependents([TaskSpec::noop("a"), TaskSpec::noop("b")]);
        let arena = RunnerArena::new();
        let root = arena.insert_tree(&spec, &registry(), AcquireTimeout::default()).unwrap();

        let a = arena.get(RunnerId::new(1)).unwrap();
        a.attempt_once();
        a.settle(Some(Duration::from_millis(4)), Some(Duration::from_millis(4)));

        let root = arena.get(root).unwrap();
        assert_eq!(arena.dependents_total(&root), Duration::from_millis(4));
    }

    #[test]
    fn retired_tree_frees_its_slots() {
        let arena = RunnerArena::new();
        let spec = TaskSpec::noop("root").dependent(TaskSpec::noop("leaf"));
        let root = arena.insert_tree(&spec, &registry(), AcquireTimeout::default()).unwrap();
        let leaf = RunnerId::new(1);

        assert!(matches!(arena.retire(leaf), Err(PlantError::NotATreeRoot(_))));
        assert!(matches!(arena.retire(root), Err(PlantError::TreeStillRunning(_))));

        for id in [leaf, root] {
            let runner = arena.get(id).unwrap();
            runner.set_state(RunState::Done);
            runner.settle(None, None);
        }
        assert_eq!(arena.retire(root).unwrap(), 2);

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.live(), 0);
        assert!(arena.get(leaf).is_none());
        assert!(matches!(arena.update_state(root), Err(PlantError::UnknownRunner(_))));
        assert!(arena.tree(root).is_err());
        assert!(matches!(arena.retire(root), Err(PlantError::UnknownRunner(_))));
    }
}
