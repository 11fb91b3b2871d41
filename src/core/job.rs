//! Job data model
//!
//! An [`ExecutionRequest`] arrives from the transport, becomes a [`Job`]
//! (identifier + submission time) for the duration of one orchestrator run,
//! and ends as exactly one [`ExecutionResult`] or a categorized error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Request to execute a guest program
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Guest program text
    pub code: String,
    /// Standard input fed to the guest, then closed
    #[serde(default)]
    pub stdin: Option<String>,
    /// Optional verification program run after the guest
    #[serde(default)]
    pub tests: Option<String>,
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(code: impl Into<String>) -> Self {
        ExecutionRequest {
            code: code.into(),
            stdin: None,
            tests: None,
        }
    }

    /// Set stdin
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Attach a verification program
    pub fn with_tests(mut self, tests: impl Into<String>) -> Self {
        self.tests = Some(tests.into());
        self
    }
}

/// One in-flight execution
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique identifier, also used in event envelopes and workspace names
    pub id: Uuid,
    /// Guest program text
    pub code: String,
    /// Standard input text
    pub stdin: Option<String>,
    /// Verification program text
    pub tests: Option<String>,
    /// When the request arrived
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    /// Wrap a request, assigning a fresh identifier
    pub fn new(request: ExecutionRequest) -> Self {
        Job {
            id: Uuid::new_v4(),
            code: request.code,
            // empty stdin is the same as none
            stdin: request.stdin.filter(|s| !s.is_empty()),
            tests: request.tests.filter(|s| !s.trim().is_empty()),
            submitted_at: Utc::now(),
        }
    }
}

/// Outcome status of a single verification test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl TestStatus {
    /// Map a verification-tool outcome string
    pub fn from_outcome(outcome: &str) -> Self {
        match outcome {
            "passed" | "xpassed" => TestStatus::Passed,
            "failed" => TestStatus::Failed,
            "skipped" | "xfailed" => TestStatus::Skipped,
            _ => TestStatus::Error,
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Error => write!(f, "error"),
            TestStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A named verification outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Test identifier as reported by the verification tool
    pub name: String,
    /// Outcome
    pub status: TestStatus,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

/// Terminal record of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Guest exit status; negative values are the terminating signal
    pub exit_code: i32,
    /// Captured standard output, one line per `stdout` event
    pub stdout: String,
    /// Captured standard error, byte-capped
    pub stderr: String,
    /// Verification outcomes, present only when a verification program was supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<TestOutcome>>,
    /// Guest wall time in milliseconds
    pub duration_ms: u64,
    /// Whether the output-line ceiling cut the guest short
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    /// Whether the guest exited cleanly
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Guest wall time
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}
