use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use workplant::task::TaskSpec;
use workplant::types::AcquireTimeout;

use crate::probe::ConcurrencyProbe;

/// One call of a recorded task's failure hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCall {
    pub task: String,
    pub had_params: bool,
    pub message: String,
    pub root_task: String,
}

#[derive(Debug, Default)]
struct Log {
    executed: Vec<String>,
    hooks: Vec<HookCall>,
}

/// Shared log of which recorded tasks ran, in what order, and which
/// failure hooks fired.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Log>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a task that records itself here when it runs.
    pub fn task(&self, name: &str) -> RecordingTask {
        RecordingTask {
            recorder: self.clone(),
            name: name.to_string(),
            resources: Vec::new(),
            delay: Duration::ZERO,
            failure: None,
            panics: false,
            timeout: None,
            probe: None,
        }
    }

    /// Task names in the order their work started.
    pub fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap().executed.clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .executed
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.log
            .lock()
            .unwrap()
            .executed
            .iter()
            .position(|n| n == name)
    }

    pub fn hook_calls(&self) -> Vec<HookCall> {
        self.log.lock().unwrap().hooks.clone()
    }

    fn record_run(&self, name: &str) {
        self.log.lock().unwrap().executed.push(name.to_string());
    }

    fn record_hook(&self, call: HookCall) {
        self.log.lock().unwrap().hooks.push(call);
    }
}

/// Builder for a [`TaskSpec`] whose work records its name in a [`Recorder`].
#[derive(Debug, Clone)]
pub struct RecordingTask {
    recorder: Recorder,
    name: String,
    resources: Vec<String>,
    delay: Duration,
    failure: Option<String>,
    panics: bool,
    timeout: Option<AcquireTimeout>,
    probe: Option<ConcurrencyProbe>,
}

impl RecordingTask {
    pub fn resource(mut self, key: &str) -> Self {
        self.resources.push(key.to_string());
        self
    }

    /// Block the worker for `delay` inside the work closure.
    pub fn sleep(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Return an error with `message` after recording the run.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn timeout(mut self, timeout: impl Into<AcquireTimeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Count this task in `probe` while its work runs.
    pub fn probe(mut self, probe: &ConcurrencyProbe) -> Self {
        self.probe = Some(probe.clone());
        self
    }

    pub fn build(self) -> TaskSpec {
        let RecordingTask {
            recorder,
            name,
            resources,
            delay,
            failure,
            panics,
            timeout,
            probe,
        } = self;

        let work_recorder = recorder.clone();
        let task_name = name.clone();
        let spec = TaskSpec::new(name, move |_params| {
            let _inside = probe.as_ref().map(ConcurrencyProbe::enter);
            work_recorder.record_run(&task_name);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if panics {
                panic!("{task_name} panicked on purpose");
            }
            match &failure {
                Some(message) => Err(anyhow!("{message}")),
                None => Ok(()),
            }
        })
        .resources(resources)
        .on_failure(move |failure, params| {
            recorder.record_hook(HookCall {
                task: failure.task().to_string(),
                had_params: params.is_some(),
                message: failure.to_string(),
                root_task: failure.root_cause().task().to_string(),
            });
        });

        match timeout {
            Some(timeout) => spec.timeout(timeout),
            None => spec,
        }
    }
}
