// src/runner/execution.rs

//! The run loop a worker executes for one runner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::RunFailure;
use crate::plant::PlantEvent;

use super::arena::RunnerArena;
use super::state::RunState;
use super::task_runner::{Attempt, TaskRunner};

/// Everything a worker needs to run one runner to completion.
pub(crate) struct Execution {
    pub runner: Arc<TaskRunner>,
    pub arena: Arc<RunnerArena>,
    pub retry_interval: Duration,
    pub events: mpsc::UnboundedSender<PlantEvent>,
}

/// Releases claims, records times and reports completion to the plant.
///
/// Lives on the stack of [`execute`] so the bookkeeping also happens when a
/// failure hook panics and the worker unwinds. A runner that is still not
/// terminal at that point is failed, so its tree can finish.
struct FinishGuard {
    runner: Arc<TaskRunner>,
    arena: Arc<RunnerArena>,
    events: mpsc::UnboundedSender<PlantEvent>,
    started: Instant,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.runner.release_all();

        if !self.runner.state().is_terminal() {
            error!(
                task = self.runner.name(),
                state = %self.runner.state(),
                "worker stopped before the task finished"
            );
            self.runner.fail(Arc::new(RunFailure::WorkFailure {
                task: self.runner.name().to_string(),
                source: anyhow::anyhow!("worker stopped before the task finished"),
            }));
        }

        let own = self.started.elapsed();
        let total = own.saturating_add(self.arena.dependents_total(&self.runner));
        self.runner.settle(Some(own), Some(total));

        info!(
            task = self.runner.name(),
            state = %self.runner.state(),
            elapsed_ms = own.as_millis() as u64,
            total_ms = total.as_millis() as u64,
            "task finished"
        );

        if self
            .events
            .send(PlantEvent::Finished(self.runner.id()))
            .is_err()
        {
            warn!(task = self.runner.name(), "plant is gone; completion not reported");
        }
    }
}

/// Claim the runner's resources and run its work, retrying until the
/// acquisition deadline passes.
///
/// A runner that is already `DONE` is left alone and nothing is reported.
pub(crate) async fn execute(exec: Execution) -> Result<(), Arc<RunFailure>> {
    let Execution {
        runner,
        arena,
        retry_interval,
        events,
    } = exec;

    if runner.state() == RunState::Done {
        debug!(task = runner.name(), "already done; skipping");
        return Ok(());
    }

    let started = Instant::now();
    runner.begin(started);
    let _finish = FinishGuard {
        runner: runner.clone(),
        arena,
        events,
        started,
    };

    let timeout = runner.timeout();
    let deadline = timeout.deadline(started);
    debug!(task = runner.name(), %timeout, "claiming resources");

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        if runner.resources_available() {
            match attempt(&runner).await {
                Attempt::Completed => return Ok(()),
                Attempt::Failed(failure) => return Err(failure),
                Attempt::Contended => {}
            }
        }

        wait_for_release(&runner, deadline, retry_interval).await;
    }

    let failure = Arc::new(RunFailure::ResourceAcquisitionTimeout {
        task: runner.name().to_string(),
        timeout: timeout.as_duration().unwrap_or_default(),
        resources: runner.describe_resources(),
    });
    runner.fail(failure.clone());
    runner.handle_failure(&failure, None);
    Err(failure)
}

/// One claim-and-run attempt on the blocking pool.
async fn attempt(runner: &Arc<TaskRunner>) -> Attempt {
    let worker = runner.clone();
    match tokio::task::spawn_blocking(move || worker.attempt_once()).await {
        Ok(attempt) => attempt,
        Err(join_error) if join_error.is_panic() => {
            // Work panics are caught inside the attempt, so this came from
            // the failure hook. Claims are dropped by the unwind; the finish
            // guard does the rest on the way out.
            error!(task = runner.name(), "failure hook panicked");
            runner.release_all();
            std::panic::resume_unwind(join_error.into_panic())
        }
        Err(join_error) => {
            let failure = Arc::new(RunFailure::WorkFailure {
                task: runner.name().to_string(),
                source: anyhow::Error::new(join_error),
            });
            runner.release_all();
            runner.fail(failure.clone());
            Attempt::Failed(failure)
        }
    }
}

/// Sleep until one of the runner's held resources is released, the retry
/// interval passes, or the deadline is reached, whichever comes first.
async fn wait_for_release(runner: &TaskRunner, deadline: Option<Instant>, retry_interval: Duration) {
    let mut wait = retry_interval;
    if let Some(deadline) = deadline {
        wait = wait.min(deadline.saturating_duration_since(Instant::now()));
    }

    match runner.first_locked_resource() {
        Some(resource) => {
            let _ = tokio::time::timeout(wait, resource.released().notified()).await;
        }
        None => tokio::time::sleep(wait).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceRegistry;
    use crate::task::TaskSpec;
    use crate::types::AcquireTimeout;

    #[test]
    fn unwinding_worker_leaves_the_runner_failed() {
        let arena = Arc::new(RunnerArena::new());
        let id = arena
            .insert_tree(&TaskSpec::noop("stuck"), &ResourceRegistry::new(), AcquireTimeout::default())
            .unwrap();
        let runner = arena.get(id).unwrap();
        let (events, mut rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        runner.begin(started);
        drop(FinishGuard {
            runner: runner.clone(),
            arena,
            events,
            started,
        });

        assert_eq!(runner.state(), RunState::Error);
        assert!(runner.is_settled());
        assert!(runner.task_time().is_some());
        let failure = runner.failure().unwrap();
        assert!(matches!(*failure, RunFailure::WorkFailure { ref task, .. } if task == "stuck"));
        assert_eq!(rx.try_recv().unwrap(), PlantEvent::Finished(id));
    }

    #[test]
    fn finished_runner_keeps_its_state() {
        let arena = Arc::new(RunnerArena::new());
        let id = arena
            .insert_tree(&TaskSpec::noop("fine"), &ResourceRegistry::new(), AcquireTimeout::default())
            .unwrap();
        let runner = arena.get(id).unwrap();
        let (events, _rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        runner.begin(started);
        assert!(matches!(runner.attempt_once(), Attempt::Completed));
        drop(FinishGuard {
            runner: runner.clone(),
            arena,
            events,
            started,
        });

        assert_eq!(runner.state(), RunState::Done);
        assert!(runner.failure().is_none());
        assert!(runner.is_settled());
    }
}
