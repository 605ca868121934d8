// src/demo/journal.rs

use std::fmt;

use tracing::info;

/// Append-only log shared by the demo tasks as the `log` resource.
///
/// Every line is kept for later inspection and echoed through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    lines: Vec<String>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "workplant::journal", "{message}");
        self.lines.push(message);
    }

    /// Log every line of an already rendered runner tree.
    pub fn log_tree(&mut self, rendered: &str) {
        for line in rendered.lines() {
            self.log(line);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Every line followed by a newline.
impl fmt::Display for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_lines_in_order() {
        let mut journal = Journal::new();
        journal.log("Eat");
        journal.log_tree("root - DONE\n-leaf - DONE\n");
        assert_eq!(journal.lines().len(), 3);
        assert_eq!(journal.to_string(), "Eat\nroot - DONE\n-leaf - DONE\n");
    }
}
