use std::fmt;
use chrono::NaiveDateTime;
use crate::checks::Stage;
use crate::probe::CheckFailure;

pub const SUCCESS_PREFIX: &str = "SUCCESS: ";
pub const FAILURE_PREFIX: &str = "FAILURE: ";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub label: String,
    pub passed: bool,
    pub message: String,
}

impl CheckResult {
    pub fn pass(stage: Stage, message: impl Into<String>) -> Self {
        Self { label: stage.to_string(), passed: true, message: message.into() }
    }

    pub fn fail(stage: Stage, message: impl Into<String>) -> Self {
        Self { label: stage.to_string(), passed: false, message: message.into() }
    }

    pub fn from_outcome(stage: Stage, outcome: Result<(), CheckFailure>, success: impl Into<String>) -> Self {
        match outcome {
            Ok(()) => Self::pass(stage, success),
            Err(failure) => Self::fail(stage, failure.to_string()),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.passed { SUCCESS_PREFIX } else { FAILURE_PREFIX };
        write!(f, "{}{} - {}", prefix, self.label, self.message)
    }
}

/// Collects results in the order the pipeline produces them. Results are only ever appended.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: Vec<CheckResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: &str, passed: bool, message: &str) {
        self.push(CheckResult { label: label.to_string(), passed, message: message.to_string() });
    }

    pub fn push(&mut self, result: CheckResult) {
        if result.passed {
            tracing::info!("{}", result);
        } else {
            tracing::error!("{}", result);
        }
        self.results.push(result);
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.passed)
    }

    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    pub fn finalize(self, test_case_name: &str, host_count: usize, started: NaiveDateTime) -> TestReport {
        TestReport {
            test_case_name: test_case_name.to_string(),
            results: self.results,
            host_count,
            started,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub test_case_name: String,
    pub results: Vec<CheckResult>,
    pub host_count: usize,
    pub started: NaiveDateTime,
}

impl TestReport {
    pub fn failed(&self) -> bool {
        self.results.iter().any(|r| !r.passed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed() { 1 } else { 0 }
    }

    pub fn lines(&self) -> Vec<String> {
        self.results.iter().map(|r| r.to_string()).collect()
    }

    pub fn timestamp(&self) -> String {
        self.started.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn results_file_name(&self) -> String {
        format!("{}_test_case_results_{}_hosts.txt", self.timestamp(), self.host_count)
    }

    pub fn state_copy_file_name(&self) -> String {
        format!("{}_project-state.json", self.timestamp())
    }

    /// Write the summary at the end of a run to the log
    pub fn log_summary(&self) {
        tracing::info!("{}", "=".repeat(30));
        tracing::info!("Results for test case '{}' on {} testbed hosts:", self.test_case_name, self.host_count);
        for result in &self.results {
            tracing::info!("{}", result);
        }
        if self.failed() {
            tracing::error!("FAIL: test case '{}' has failed checks, see the FAILURE lines above", self.test_case_name);
        } else {
            tracing::info!("SUCCESS: test case '{}' passed", self.test_case_name);
        }
    }
}
