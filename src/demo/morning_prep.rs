// src/demo/morning_prep.rs

use anyhow::bail;

use crate::task::TaskSpec;

use super::journal::Journal;
use super::tasks::{print_result, string_append};
use super::{JOURNAL_KEY, Pipeline, journal_registry};

pub const BODY: &str = "body";
pub const MIND: &str = "mind";
pub const LOCATION: &str = "location";

/// Fails unless the location still reads `home`.
pub fn get_dressed() -> TaskSpec {
    TaskSpec::new("Get Dressed", |params| {
        let location = params.get::<String>(LOCATION)?;
        if location.as_str() != "home" {
            bail!("Can't get dressed unless at home");
        }

        let mut body = params.get_mut::<String>(BODY)?;
        body.push_str(" (dressed)");

        let mut journal = params.get_mut::<Journal>(JOURNAL_KEY)?;
        journal.log("Get Dressed");
        journal.log(body.as_str());
        Ok(())
    })
    .resources([JOURNAL_KEY, LOCATION, BODY])
}

/// Rewrites the location to `work`.
pub fn drive_to_work() -> TaskSpec {
    TaskSpec::new("Drive to work", |params| {
        let mut location = params.get_mut::<String>(LOCATION)?;
        location.clear();
        location.push_str("work");

        let mut journal = params.get_mut::<Journal>(JOURNAL_KEY)?;
        journal.log("Drive to work");
        journal.log(location.as_str());
        Ok(())
    })
    .resources([LOCATION, JOURNAL_KEY])
}

/// The built-in demo pipeline:
///
/// ```text
/// Print results
/// -Start work
/// --Drive to work
/// ---Get Dressed
/// ---Eat
/// --Go to the Bathroom
/// --Drink coffee
/// --Check calendar
/// --Check the news
/// ```
pub fn morning_prep() -> Pipeline {
    let (mut registry, journal) = journal_registry();
    registry.add_new_resource(BODY, String::from("My body:"));
    registry.add_new_resource(MIND, String::from("My mind:"));
    registry.add_new_resource(LOCATION, String::from("home"));

    let drive = drive_to_work().dependents([get_dressed(), string_append("Eat", "ate food", BODY)]);
    let work = string_append("Start work", "ready to work", MIND).dependents([
        drive,
        string_append("Go to the Bathroom", "used bathroom", BODY),
        string_append("Drink coffee", "caffinated", BODY),
        string_append("Check calendar", "calendar checked", MIND),
        string_append("Check the news", "latest news", MIND),
    ]);
    let root = print_result("Print results", [MIND, LOCATION, BODY].map(String::from))
        .dependent(work);

    Pipeline {
        registry,
        journal,
        root,
    }
}
