// src/demo/mod.rs

//! Demo tasks and the built-in "morning prep" pipeline.
//!
//! Every demo task writes to a shared [`Journal`] registered under
//! [`JOURNAL_KEY`]; the other resources are plain `String`s.

use std::sync::Arc;

use crate::resource::{ResourceRegistry, SharableResource};
use crate::runner::RunnerId;
use crate::task::TaskSpec;

pub mod journal;
pub mod morning_prep;
pub mod tasks;

pub use journal::Journal;
pub use morning_prep::morning_prep;
pub use tasks::{print_result, string_append};

/// Resource key of the journal. Reserved in config files.
pub const JOURNAL_KEY: &str = "log";

/// Resources plus the task tree that uses them.
#[derive(Debug)]
pub struct Pipeline {
    pub registry: ResourceRegistry,
    pub journal: Arc<SharableResource<Journal>>,
    pub root: TaskSpec,
}

impl Pipeline {
    /// Everything logged so far, or `None` while a task holds the journal.
    pub fn journal_text(&self) -> Option<String> {
        self.journal
            .snapshot(RunnerId::EXTERNAL)
            .map(|journal| journal.to_string())
    }

    /// Append a rendered runner tree to the journal. Returns `false` while
    /// a task holds the journal.
    pub fn log_tree(&self, rendered: &str) -> bool {
        let Some(mut journal) = self.journal.claim(RunnerId::EXTERNAL) else {
            return false;
        };
        journal.log_tree(rendered);
        drop(journal);
        self.journal.release(RunnerId::EXTERNAL);
        true
    }
}

/// A registry holding only a fresh journal under [`JOURNAL_KEY`].
pub fn journal_registry() -> (ResourceRegistry, Arc<SharableResource<Journal>>) {
    let mut registry = ResourceRegistry::new();
    let journal = registry.add_new_resource(JOURNAL_KEY, Journal::new());
    (registry, journal)
}
