// src/plant/report.rs

use std::fmt::Write as _;
use std::sync::Arc;

use crate::runner::TaskRunner;

/// Render a pre-order `(depth, runner)` listing, one runner per line,
/// prefixed with one `-` per level below the root:
///
/// ```text
/// Print results - DONE in 12 ms (Total: 40 ms)
/// -Start work - DONE in 0 ms (Total: 28 ms)
/// --Drive to work - DONE in 3 ms (Total: 9 ms)
/// ```
pub fn render(tree: &[(usize, Arc<TaskRunner>)]) -> String {
    let mut out = String::new();
    for (depth, runner) in tree {
        let _ = writeln!(out, "{}{}", "-".repeat(*depth), runner);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceRegistry;
    use crate::runner::{RunnerArena, RunnerId};
    use crate::task::TaskSpec;
    use crate::types::AcquireTimeout;

    #[test]
    fn renders_one_dash_per_level() {
        let spec = TaskSpec::noop("root").dependents([
            TaskSpec::noop("a").dependent(TaskSpec::noop("a1")),
            TaskSpec::noop("b"),
        ]);
        let arena = RunnerArena::new();
        let root = arena
            .insert_tree(&spec, &ResourceRegistry::new(), AcquireTimeout::default())
            .unwrap();

        let rendered = render(&arena.tree(root).unwrap());
        assert_eq!(
            rendered,
            "root - WAITING_DEPENDENT\n-a - WAITING_DEPENDENT\n--a1 - READY\n-b - READY\n"
        );
        assert!(arena.tree(RunnerId::new(99)).is_err());
    }
}
