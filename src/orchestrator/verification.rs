//! Verification report parsing
//!
//! Reads the pytest-json-report layout:
//! `{"tests": [{"nodeid", "outcome", "duration"?, "setup"?, "call"?, "teardown"?}]}`.
//! Phase durations are summed when the record has no top-level duration.

use serde::Deserialize;

use crate::core::{TestOutcome, TestStatus};
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    tests: Vec<ReportTest>,
}

#[derive(Debug, Deserialize)]
struct ReportTest {
    nodeid: String,
    outcome: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    setup: Option<Phase>,
    #[serde(default)]
    call: Option<Phase>,
    #[serde(default)]
    teardown: Option<Phase>,
}

#[derive(Debug, Deserialize)]
struct Phase {
    #[serde(default)]
    duration: f64,
}

impl ReportTest {
    fn seconds(&self) -> f64 {
        self.duration.unwrap_or_else(|| {
            [&self.setup, &self.call, &self.teardown]
                .into_iter()
                .flatten()
                .map(|phase| phase.duration)
                .sum()
        })
    }
}

/// Parse report text into ordered outcomes
pub fn parse_report(text: &str) -> Result<Vec<TestOutcome>> {
    let report: Report = serde_json::from_str(text)?;
    Ok(report
        .tests
        .into_iter()
        .map(|test| TestOutcome {
            duration_ms: to_millis(test.seconds()),
            status: TestStatus::from_outcome(&test.outcome),
            name: test.nodeid,
        })
        .collect())
}

fn to_millis(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}
