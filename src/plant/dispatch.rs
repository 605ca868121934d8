// src/plant/dispatch.rs

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::runner::execution::{Execution, execute};
use crate::runner::{RunState, RunnerArena, RunnerId, TaskRunner};

use super::PlantEvent;
use super::pool::WorkerPool;

/// State shared between the plant handle, its dispatch loop and workers.
#[derive(Debug)]
pub(crate) struct PlantShared {
    pub arena: Arc<RunnerArena>,
    pub pool: WorkerPool,
    pub retry_interval: Duration,
    pub events: mpsc::UnboundedSender<PlantEvent>,
}

/// Spawn the loop that reacts to [`PlantEvent`]s.
///
/// The loop only holds a weak reference to the shared state, so it ends
/// once the plant and every in-flight worker are gone and the channel
/// closes.
pub(crate) fn spawn_dispatcher(
    shared: Weak<PlantShared>,
    mut events: mpsc::UnboundedReceiver<PlantEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("dispatch loop started");

        while let Some(event) = events.recv().await {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            match event {
                PlantEvent::Finished(id) => cascade(&shared, id),
            }
        }

        debug!("dispatch loop finished");
    })
}

/// Hand `runner` to the worker pool unless it was handed over before.
///
/// Returns whether this call submitted it.
pub(crate) fn submit(shared: &PlantShared, runner: &Arc<TaskRunner>) -> bool {
    if !runner.mark_dispatched() {
        debug!(task = runner.name(), runner = %runner.id(), "already dispatched");
        return false;
    }

    debug!(task = runner.name(), runner = %runner.id(), state = %runner.state(), "submitting");

    let exec = Execution {
        runner: runner.clone(),
        arena: shared.arena.clone(),
        retry_interval: shared.retry_interval,
        events: shared.events.clone(),
    };
    let name = runner.name().to_string();
    shared.pool.spawn(async move {
        if let Err(failure) = execute(exec).await {
            warn!(task = %name, error = %failure, "task failed");
        }
    });
    true
}

/// Submit every runner below `root` that can start, without waiting.
///
/// Only `WAITING_DEPENDENT` runners are descended into; anything else
/// either starts here or has nothing pending below it.
pub(crate) fn dispatch_ready(shared: &PlantShared, root: RunnerId) -> Result<usize> {
    let mut submitted = 0;
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        let runner = shared.arena.try_get(id)?;
        let state = shared.arena.update_state(id)?;

        if state.can_start() {
            if submit(shared, &runner) {
                submitted += 1;
            }
        } else if state == RunState::WaitingDependent {
            stack.extend(runner.dependents().iter().rev().copied());
        }
    }

    Ok(submitted)
}

/// React to a finished runner: re-evaluate its parent and submit it when it
/// can start. An `ERROR` is carried upward one ancestor at a time so that
/// every ancestor ends up `ERROR` as well.
pub(crate) fn cascade(shared: &PlantShared, finished: RunnerId) {
    let mut pending = VecDeque::from([finished]);

    while let Some(id) = pending.pop_front() {
        let Some(runner) = shared.arena.get(id) else {
            debug!(runner = %id, "completion for unknown or retired runner");
            continue;
        };
        let state = runner.state();

        let Some(parent_id) = runner.parent() else {
            info!(task = runner.name(), %state, "task tree finished");
            continue;
        };

        let parent_state = match shared.arena.update_state(parent_id) {
            Ok(s) => s,
            Err(e) => {
                warn!(runner = %parent_id, error = %e, "cannot re-evaluate parent");
                continue;
            }
        };
        debug!(
            task = runner.name(),
            %state,
            parent = %parent_id,
            %parent_state,
            "dependent finished"
        );

        if state == RunState::Error {
            pending.push_back(parent_id);
        } else if parent_state.can_start() {
            if let Some(parent) = shared.arena.get(parent_id) {
                submit(shared, &parent);
            }
        }
    }
}
