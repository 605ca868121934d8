// src/demo/tasks.rs

use tracing::warn;

use crate::task::TaskSpec;

use super::JOURNAL_KEY;
use super::journal::Journal;

/// Append ` (<text>)` to the string resource `target`, then log the task
/// name and the new value.
pub fn string_append(
    name: impl Into<String>,
    text: impl Into<String>,
    target: impl Into<String>,
) -> TaskSpec {
    let name = name.into();
    let text = text.into();
    let target = target.into();

    let task_name = name.clone();
    let key = target.clone();
    TaskSpec::new(name, move |params| {
        let mut value = params.get_mut::<String>(&key)?;
        value.push_str(" (");
        value.push_str(&text);
        value.push(')');

        let mut journal = params.get_mut::<Journal>(JOURNAL_KEY)?;
        journal.log(task_name.as_str());
        journal.log(value.as_str());
        Ok(())
    })
    .resources([target, JOURNAL_KEY.to_string()])
}

/// Log the current value of each string resource in `keys`, in order.
///
/// On failure the error goes to the journal when the journal is at hand
/// and to the tracing log otherwise.
pub fn print_result<I>(name: impl Into<String>, keys: I) -> TaskSpec
where
    I: IntoIterator<Item = String>,
{
    let keys: Vec<String> = keys.into_iter().collect();
    let printed = keys.clone();

    TaskSpec::new(name, move |params| {
        let mut journal = params.get_mut::<Journal>(JOURNAL_KEY)?;
        for key in &printed {
            let value = params.get::<String>(key)?;
            journal.log(value.as_str());
        }
        Ok(())
    })
    .resources(keys)
    .resource(JOURNAL_KEY)
    .on_failure(|failure, params| {
        match params.and_then(|p| p.get_mut::<Journal>(JOURNAL_KEY).ok()) {
            Some(mut journal) => journal.log(failure.to_string()),
            None => warn!(task = failure.task(), error = %failure, "could not print results"),
        }
    })
}
