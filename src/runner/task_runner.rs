// src/runner/task_runner.rs

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::errors::RunFailure;
use crate::resource::Sharable;
use crate::task::{FailureHook, ResourceParams, TaskSpec, WorkFn};
use crate::types::AcquireTimeout;

use super::state::{Progress, RunState, RunnerId};

/// Result of one claim-and-run attempt.
#[derive(Debug)]
pub(crate) enum Attempt {
    /// The work ran and returned `Ok`.
    Completed,
    /// The work ran and failed; the runner is now `ERROR`.
    Failed(Arc<RunFailure>),
    /// Some resource could not be claimed; nothing is held.
    Contended,
}

#[derive(Debug)]
struct RunnerStatus {
    state: RunState,
    start_time: Option<Instant>,
    task_time: Option<Duration>,
    total_time: Option<Duration>,
    failure: Option<Arc<RunFailure>>,
    /// Bookkeeping for this runner is complete: times are recorded and every
    /// claim is released. Only meaningful in a terminal state.
    settled: bool,
}

/// Execution wrapper around one [`TaskSpec`].
///
/// Runners live in a [`RunnerArena`](super::RunnerArena) and refer to
/// their parent and dependents by [`RunnerId`]. The mutable part (state,
/// timing, failure) sits behind one mutex; every state change is also
/// published on a `watch` channel so callers can await completion.
pub struct TaskRunner {
    id: RunnerId,
    name: String,
    work: WorkFn,
    on_failure: Option<FailureHook>,
    parent: Option<RunnerId>,
    dependents: Vec<RunnerId>,
    resources: BTreeMap<String, Arc<dyn Sharable>>,
    timeout: AcquireTimeout,
    dispatched: AtomicBool,
    status: Mutex<RunnerStatus>,
    state_tx: watch::Sender<Progress>,
}

impl TaskRunner {
    pub(crate) fn new(
        id: RunnerId,
        spec: &TaskSpec,
        parent: Option<RunnerId>,
        dependents: Vec<RunnerId>,
        resources: BTreeMap<String, Arc<dyn Sharable>>,
        timeout: AcquireTimeout,
    ) -> Self {
        let state = if dependents.is_empty() {
            RunState::Ready
        } else {
            RunState::WaitingDependent
        };
        let (state_tx, _) = watch::channel(Progress {
            state,
            settled: false,
        });

        Self {
            id,
            name: spec.name().to_string(),
            work: spec.work().clone(),
            on_failure: spec.failure_hook().cloned(),
            parent,
            dependents,
            resources,
            timeout,
            dispatched: AtomicBool::new(false),
            status: Mutex::new(RunnerStatus {
                state,
                start_time: None,
                task_time: None,
                total_time: None,
                failure: None,
                settled: false,
            }),
            state_tx,
        }
    }

    pub fn id(&self) -> RunnerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<RunnerId> {
        self.parent
    }

    pub fn dependents(&self) -> &[RunnerId] {
        &self.dependents
    }

    pub fn resource_keys(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn timeout(&self) -> AcquireTimeout {
        self.timeout
    }

    pub fn state(&self) -> RunState {
        self.status.lock().state
    }

    /// When a worker picked this runner up.
    pub fn start_time(&self) -> Option<Instant> {
        self.status.lock().start_time
    }

    /// Wall time of this runner's own execution, from pick-up to release.
    pub fn task_time(&self) -> Option<Duration> {
        self.status.lock().task_time
    }

    /// Own time plus the total time of every dependent.
    pub fn total_time(&self) -> Option<Duration> {
        self.status.lock().total_time
    }

    pub fn failure(&self) -> Option<Arc<RunFailure>> {
        self.status.lock().failure.clone()
    }

    /// Terminal and done with bookkeeping.
    pub fn is_settled(&self) -> bool {
        let status = self.status.lock();
        status.settled && status.state.is_terminal()
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched.load(Ordering::Acquire)
    }

    /// Receiver that observes every state change of this runner.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.state_tx.subscribe()
    }

    /// Mark the runner as handed to the pool. Returns `false` if it already was.
    pub(crate) fn mark_dispatched(&self) -> bool {
        !self.dispatched.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set_state(&self, state: RunState) {
        let mut status = self.status.lock();
        if status.state.is_terminal() {
            warn!(
                task = %self.name,
                from = %status.state,
                to = %state,
                "ignoring state change of a finished runner"
            );
            return;
        }
        status.state = state;
        self.publish(&status);
    }

    /// Move from `expected` to `next` unless someone else changed the state
    /// in between. Returns the state after the call.
    pub(crate) fn transition(&self, expected: RunState, next: RunState) -> RunState {
        let mut status = self.status.lock();
        if status.state == expected && expected != next {
            status.state = next;
            self.publish(&status);
        }
        status.state
    }

    /// Called by the worker that picked the runner up.
    pub(crate) fn begin(&self, now: Instant) {
        let mut status = self.status.lock();
        status.start_time = Some(now);
        status.state = RunState::Initiated;
        self.publish(&status);
    }

    /// Move to `ERROR` with `failure` as the cause. Returns `false` if the
    /// runner was already terminal, in which case nothing changes.
    pub(crate) fn fail(&self, failure: Arc<RunFailure>) -> bool {
        let mut status = self.status.lock();
        if status.state.is_terminal() {
            return false;
        }
        status.state = RunState::Error;
        status.failure = Some(failure);
        self.publish(&status);
        true
    }

    /// Record timing and flag the runner as settled.
    pub(crate) fn settle(&self, task_time: Option<Duration>, total_time: Option<Duration>) {
        let mut status = self.status.lock();
        if task_time.is_some() {
            status.task_time = task_time;
            status.total_time = total_time;
        }
        status.settled = true;
        self.publish(&status);
    }

    // Called with the status lock held so observers see changes in order.
    fn publish(&self, status: &RunnerStatus) {
        self.state_tx.send_replace(Progress {
            state: status.state,
            settled: status.settled,
        });
    }

    /// True iff no required resource is currently held by anyone.
    pub(crate) fn resources_available(&self) -> bool {
        self.resources.values().all(|r| !r.is_locked())
    }

    pub(crate) fn first_locked_resource(&self) -> Option<&Arc<dyn Sharable>> {
        self.resources.values().find(|r| r.is_locked())
    }

    /// Release every resource this runner holds. Resources held by other
    /// runners are left alone.
    pub(crate) fn release_all(&self) {
        for resource in self.resources.values() {
            resource.release(self.id);
        }
    }

    /// `key: state` for every resource, for timeout messages.
    pub(crate) fn describe_resources(&self) -> String {
        self.resources
            .iter()
            .map(|(key, r)| format!("{key}: {}", r.describe()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Claim every resource in key order and, if all claims succeed, run the
    /// work closure. Blocking; runs on the blocking pool.
    ///
    /// On contention every claim taken during this attempt is given back
    /// before returning. A panic in the work closure is reported as a work
    /// failure; a panic in the failure hook propagates to the caller.
    pub(crate) fn attempt_once(&self) -> Attempt {
        let mut params = ResourceParams::new();
        for (key, resource) in &self.resources {
            match resource.claim_erased(self.id) {
                Some(claim) => params.insert(key.clone(), claim),
                None => {
                    trace!(task = %self.name, resource = %key, "resource busy");
                    drop(params);
                    self.release_all();
                    return Attempt::Contended;
                }
            }
        }

        self.set_state(RunState::InProgress);
        debug!(task = %self.name, runner = %self.id, "running work");

        let outcome = match catch_unwind(AssertUnwindSafe(|| (self.work)(&params))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("work panicked: {}", panic_message(payload.as_ref()))),
        };

        let attempt = match outcome {
            Ok(()) => {
                self.set_state(RunState::Done);
                Attempt::Completed
            }
            Err(source) => {
                let failure = Arc::new(RunFailure::WorkFailure {
                    task: self.name.clone(),
                    source,
                });
                self.fail(failure.clone());
                self.handle_failure(&failure, Some(&params));
                Attempt::Failed(failure)
            }
        };

        drop(params);
        self.release_all();
        attempt
    }

    /// Invoke the failure hook, if the task has one.
    pub(crate) fn handle_failure(&self, failure: &RunFailure, params: Option<&ResourceParams<'_>>) {
        match &self.on_failure {
            Some(hook) => hook(failure, params),
            None => debug!(task = %self.name, error = %failure, "no failure hook"),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

impl fmt::Display for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, task_time, total_time) = {
            let status = self.status.lock();
            (status.state, status.task_time, status.total_time)
        };
        write!(f, "{} - {}", self.name, state)?;
        if let (Some(own), Some(total)) = (task_time, total_time) {
            write!(f, " in {} ms (Total: {} ms)", own.as_millis(), total.as_millis())?;
        }
        Ok(())
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("dependents", &self.dependents)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("status", &*self.status.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::SharableResource;

    fn runner_with(resources: &[(&str, Arc<dyn Sharable>)], spec: TaskSpec) -> TaskRunner {
        let resources = resources
            .iter()
            .map(|(k, r)| (k.to_string(), r.clone()))
            .collect();
        TaskRunner::new(
            RunnerId::new(0),
            &spec,
            None,
            Vec::new(),
            resources,
            AcquireTimeout::default(),
        )
    }

    #[test]
    fn contention_gives_back_partial_claims() {
        let a = Arc::new(SharableResource::new(1_u32));
        let b = Arc::new(SharableResource::new(2_u32));
        let other = RunnerId::new(9);
        drop(b.claim(other));

        let runner = runner_with(
            &[("a", a.clone() as Arc<dyn Sharable>), ("b", b.clone() as Arc<dyn Sharable>)],
            TaskSpec::noop("t").resources(["a", "b"]),
        );

        assert!(matches!(runner.attempt_once(), Attempt::Contended));
        assert!(!a.is_locked(), "claim on 'a' must be given back");
        assert_eq!(b.holder(), Some(other));
        assert_eq!(runner.state(), RunState::Ready);
    }

    #[test]
    fn work_error_calls_hook_with_params() {
        let seen = Arc::new(Mutex::new(None::<String>));
        let seen_hook = seen.clone();
        let body = Arc::new(SharableResource::new(String::from("My body:")));

        let spec = TaskSpec::new("broken", |_| Err(anyhow!("nope")))
            .resource("body")
            .on_failure(move |failure, params| {
                let value = params
                    .and_then(|p| p.get::<String>("body").ok().map(|b| b.clone()))
                    .unwrap_or_default();
                *seen_hook.lock() = Some(format!("{failure} / {value}"));
            });
        let runner = runner_with(&[("body", body.clone() as Arc<dyn Sharable>)], spec);

        assert!(matches!(runner.attempt_once(), Attempt::Failed(_)));
        assert_eq!(runner.state(), RunState::Error);
        assert!(!body.is_locked());
        let seen = seen.lock().clone().unwrap();
        assert!(seen.contains("nope"), "{seen}");
        assert!(seen.ends_with("My body:"), "{seen}");
    }

    #[test]
    fn panicking_work_becomes_failure() {
        let runner = runner_with(&[], TaskSpec::new("boom", |_| panic!("kaboom")));
        match runner.attempt_once() {
            Attempt::Failed(failure) => assert!(failure.to_string().contains("kaboom")),
            other => panic!("unexpected attempt result: {other:?}"),
        }
    }

    #[test]
    fn terminal_state_is_sticky() {
        let runner = runner_with(&[], TaskSpec::noop("t"));
        assert!(matches!(runner.attempt_once(), Attempt::Completed));
        runner.set_state(RunState::Ready);
        assert_eq!(runner.state(), RunState::Done);
        assert!(!runner.fail(Arc::new(RunFailure::WorkFailure {
            task: "t".into(),
            source: anyhow!("late"),
        })));
        assert!(runner.failure().is_none());
    }

    #[test]
    fn display_includes_times_once_settled() {
        let runner = runner_with(&[], TaskSpec::noop("Eat"));
        assert_eq!(runner.to_string(), "Eat - READY");
        runner.attempt_once();
        runner.settle(Some(Duration::from_millis(3)), Some(Duration::from_millis(7)));
        assert_eq!(runner.to_string(), "Eat - DONE in 3 ms (Total: 7 ms)");
        assert!(runner.is_settled());
    }
}
