// tests/failure_cascade.rs

mod common;
use crate::common::{Recorder, plant, plant_with, with_timeout};

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use workplant::errors::RunFailure;
use workplant::resource::ResourceRegistry;
use workplant::runner::{RunState, RunnerId};
use workplant::task::TaskSpec;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_reaches_every_ancestor_and_no_ancestor_runs() -> TestResult {
    let recorder = Recorder::new();
    let plant = plant(4);

    let spec = recorder.task("top").build().dependent(
        recorder
            .task("mid")
            .build()
            .dependent(recorder.task("leaf").failing("broken leg").build()),
    );

    let root = with_timeout(plant.run_task(&spec)).await?;

    for id in [0, 1, 2].map(RunnerId::new) {
        let runner = plant.runner(id)?;
        assert_eq!(runner.state(), RunState::Error, "{}", runner.name());
        let failure = runner.failure().ok_or("missing failure")?;
        assert_eq!(failure.root_cause().task(), "leaf");
    }
    assert_eq!(recorder.executed(), vec!["leaf"]);

    let top = plant.runner(root)?;
    let failure = top.failure().ok_or("missing failure")?;
    assert!(matches!(
        failure.as_ref(),
        RunFailure::InheritedFailure { dependent, .. } if dependent == "mid"
    ));

    let hooks = recorder.hook_calls();
    assert_eq!(hooks.len(), 3);
    let leaf_hook = hooks.iter().find(|h| h.task == "leaf").ok_or("no leaf hook")?;
    assert!(leaf_hook.had_params);
    assert!(leaf_hook.message.contains("broken leg"));
    assert!(hooks.iter().filter(|h| h.task != "leaf").all(|h| !h.had_params));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deep_chain_fails_without_recursion_limits() -> TestResult {
    let plant = plant(2);

    let mut spec = TaskSpec::new("bottom", |_| anyhow::bail!("bottom gave way"));
    for level in 0..400 {
        spec = TaskSpec::noop(format!("level {level}")).dependent(spec);
    }

    let root = with_timeout(plant.run_task(&spec)).await?;

    assert_eq!(plant.runner(root)?.state(), RunState::Error);
    assert_eq!(plant.runner_count(), 401);
    let failure = plant.runner(root)?.failure().ok_or("missing failure")?;
    assert_eq!(failure.root_cause().task(), "bottom");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_work_is_reported_as_work_failure() -> TestResult {
    let recorder = Recorder::new();
    let plant = plant(2);

    let spec = recorder
        .task("root")
        .build()
        .dependent(recorder.task("boom").panicking().build());

    let root = with_timeout(plant.run_task(&spec)).await?;
    let boom = plant.runner(RunnerId::new(1))?;

    assert_eq!(boom.state(), RunState::Error);
    let failure = boom.failure().ok_or("missing failure")?;
    assert!(matches!(failure.as_ref(), RunFailure::WorkFailure { .. }));
    assert!(failure.to_string().contains("panicked on purpose"), "{failure}");
    assert_eq!(plant.runner(root)?.state(), RunState::Error);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_hook_can_use_claimed_resources() -> TestResult {
    let mut registry = ResourceRegistry::new();
    let notes = registry.add_new_resource("notes", Vec::<String>::new());
    let plant = plant_with(2, registry);

    let spec = TaskSpec::new("writer", |_| anyhow::bail!("disk full"))
        .resource("notes")
        .on_failure(|failure, params| {
            if let Some(params) = params {
                if let Ok(mut notes) = params.get_mut::<Vec<String>>("notes") {
                    notes.push(failure.to_string());
                }
            }
        });

    let root = with_timeout(plant.run_task(&spec)).await?;

    assert_eq!(plant.runner(root)?.state(), RunState::Error);
    let notes = notes.snapshot(RunnerId::EXTERNAL).ok_or("notes still held")?;
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("disk full"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_hook_still_releases_and_reports() -> TestResult {
    let mut registry = ResourceRegistry::new();
    let r = registry.add_new_resource("R", 0_u8);
    let plant = plant_with(2, registry);

    let spec = TaskSpec::noop("root").dependent(
        TaskSpec::new("fragile", |_| anyhow::bail!("first failure"))
            .resource("R")
            .on_failure(|_, _| panic!("hook exploded")),
    );

    let root = with_timeout(plant.run_task(&spec)).await?;
    let fragile = plant.runner(RunnerId::new(1))?;

    assert_eq!(fragile.state(), RunState::Error);
    assert!(fragile.task_time().is_some());
    assert!(!r.is_locked());
    assert_eq!(plant.runner(root)?.state(), RunState::Error);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_siblings_are_not_cancelled() -> TestResult {
    let recorder = Recorder::new();
    let plant = plant(4);

    let spec = recorder.task("root").build().dependents([
        recorder.task("fails").failing("nope").build(),
        recorder
            .task("slow")
            .sleep(Duration::from_millis(60))
            .build(),
    ]);

    let root = with_timeout(plant.run_task(&spec)).await?;
    assert_eq!(plant.runner(root)?.state(), RunState::Error);

    let slow = RunnerId::new(2);
    assert_eq!(with_timeout(plant.wait(slow)).await?, RunState::Done);
    assert_eq!(recorder.count("slow"), 1);
    assert_eq!(recorder.count("root"), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inherited_hook_runs_once_per_ancestor() -> TestResult {
    let calls = Arc::new(Mutex::new(0_usize));
    let counted = calls.clone();
    let plant = plant(4);

    let spec = TaskSpec::noop("root")
        .on_failure(move |_, _| *counted.lock().unwrap() += 1)
        .dependents([
            TaskSpec::new("a", |_| anyhow::bail!("a failed")),
            TaskSpec::new("b", |_| anyhow::bail!("b failed")),
        ]);

    let root = with_timeout(plant.run_task(&spec)).await?;
    for id in [1, 2].map(RunnerId::new) {
        with_timeout(plant.wait(id)).await?;
    }
    // Let the second dependent's completion go through the dispatch loop.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(plant.runner(root)?.state(), RunState::Error);
    assert_eq!(*calls.lock().unwrap(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn huge_timeout_waits_without_a_deadline() -> TestResult {
    let recorder = Recorder::new();
    let mut registry = ResourceRegistry::new();
    registry.add_new_resource("body", String::new());
    let plant = plant_with(2, registry);

    let spec = recorder.task("root").build().dependents([
        recorder
            .task("holder")
            .resource("body")
            .sleep(Duration::from_millis(20))
            .build(),
        recorder
            .task("patient")
            .resource("body")
            .timeout(Duration::MAX)
            .build(),
    ]);

    let root = with_timeout(plant.run_task(&spec)).await?;

    for id in 0..plant.runner_count() {
        let runner = plant.runner(RunnerId::new(id))?;
        assert_eq!(runner.state(), RunState::Done, "{}", runner.name());
        assert!(runner.failure().is_none(), "{}", runner.name());
    }
    assert_eq!(recorder.count("patient"), 1);
    assert_eq!(recorder.position("root"), Some(2));
    assert!(plant.runner(root)?.total_time().is_some());
    Ok(())
}
