use std::fmt::Display;

use anyhow::{anyhow, Result};

/// Collects the outcomes of several steps which must all be attempted
///
/// Unlike `?`, a failed step does not stop the following ones. All error
/// messages are kept and joined when the result is converted.
#[derive(Debug, Default)]
pub struct TestResult {
    errors: Vec<String>,
}

impl From<TestResult> for Result<()> {
    fn from(result: TestResult) -> Self {
        if result.errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} step(s) failed:\n{}",
                result.errors.len(),
                result.errors.join("\n")
            ))
        }
    }
}

impl TestResult {
    /// Applies the AND operation to the given result
    ///
    /// An error in `other_result` is recorded; earlier errors are kept.
    pub fn combine<T, E>(&mut self, other_result: &Result<T, E>)
    where
        E: Display,
    {
        if let Err(error) = other_result {
            self.errors.push(format!("{:#}", error));
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the recorded error messages in the order of their steps.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}
