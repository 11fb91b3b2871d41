//! Core module - data model shared by the sandbox, pump, hub and orchestrator
//!
//! - job.rs: requests, jobs, results and verification outcomes
//! - events.rs: live stream events broadcast while a job runs

pub mod events;
pub mod job;

pub use events::{EventKind, StreamEvent};
pub use job::{ExecutionRequest, ExecutionResult, Job, TestOutcome, TestStatus};
