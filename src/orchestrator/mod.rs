//! Execution Orchestrator
//!
//! Drives one job end to end:
//! validating -> workspace-ready -> guest-running -> [verification-running]
//! -> result-ready, with every path ending in cleanup. The workspace and the
//! guest's process group are owned by scoped guards, so release happens on
//! success, error, timeout and cancellation alike.
//!
//! Observers always see `execution_start` first and exactly one terminal
//! event (`execution_complete` or `error`) last for each job.

mod verification;

pub use verification::parse_report;

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use crate::config::{Config, ExecutionConfig};
use crate::core::{ExecutionRequest, ExecutionResult, Job, StreamEvent, TestOutcome};
use crate::error::{Error, Result};
use crate::hub::EventSink;
use crate::pump::{PumpLimits, StopReason, StreamPump};
use crate::sandbox::{
    exit_code, scanner_from_config, GroupGuard, ProcessGroup, ProgramScanner, SandboxPolicy,
    Workspace, WorkspaceManager,
};

/// How long to wait for a killed guest to be reaped
const REAP_GRACE: Duration = Duration::from_secs(5);

/// What the guest phase produced
struct GuestRun {
    exit_code: i32,
    stdout: String,
    stderr: String,
    truncated: bool,
    elapsed: Duration,
}

/// Runs jobs under one sandbox policy, reporting to one event sink
pub struct Orchestrator {
    policy: SandboxPolicy,
    workspaces: WorkspaceManager,
    scanner: Arc<dyn ProgramScanner>,
    execution: ExecutionConfig,
    pump_limits: PumpLimits,
    sink: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Build from configuration
    ///
    /// Fails if the interpreter cannot be resolved or the workspace root
    /// cannot be created.
    pub fn new(config: &Config, sink: Arc<dyn EventSink>) -> Result<Self> {
        Ok(Orchestrator {
            policy: SandboxPolicy::from_config(&config.sandbox)?,
            workspaces: WorkspaceManager::new(&config.sandbox.workspace_root)?,
            scanner: scanner_from_config(&config.sandbox.scan),
            execution: config.execution.clone(),
            pump_limits: PumpLimits::from_config(&config.execution),
            sink,
        })
    }

    /// Replace the static scanner
    pub fn with_scanner(mut self, scanner: Arc<dyn ProgramScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Start a job on its own task
    ///
    /// The job runs to its terminal event even if the returned handle is
    /// dropped, so a caller going away never abandons a running guest.
    pub fn submit(
        self: &Arc<Self>,
        request: ExecutionRequest,
    ) -> tokio::task::JoinHandle<Result<ExecutionResult>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.execute(request).await })
    }

    /// Execute one request to completion
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let job = Job::new(request);
        let span = tracing::info_span!("job", job_id = %job.id);

        async {
            tracing::info!("Job submitted ({} bytes)", job.code.len());
            self.sink.emit(StreamEvent::execution_start(job.id)).await;

            let outcome = self.run(&job).await;

            match &outcome {
                Ok(result) => {
                    tracing::info!(
                        exit_code = result.exit_code,
                        duration_ms = result.duration_ms,
                        "Job finished"
                    );
                    self.sink
                        .emit(StreamEvent::execution_complete(job.id, result.exit_code))
                        .await;
                }
                Err(e) => {
                    if e.is_client_error() {
                        tracing::info!("Job rejected: {}", e);
                    } else {
                        tracing::warn!("Job failed: {}", e);
                    }
                    self.sink
                        .emit(StreamEvent::error(Some(job.id), terminal_message(e)))
                        .await;
                }
            }
            tracing::debug!("cleaned-up");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, job: &Job) -> Result<ExecutionResult> {
        let workspace = self.workspaces.acquire(job.id)?;

        tracing::debug!("validating");
        self.validate(job)?;

        tracing::debug!("workspace-ready");
        let invocation = self.policy.invocation();
        workspace.write_file(&invocation.entry_file, &job.code)?;
        if let Some(tests) = &job.tests {
            workspace.write_file(&invocation.tests_file, tests)?;
        }
        workspace.clear_bytecode_caches();

        let guest = self.run_guest(job, &workspace).await?;

        let tests = match &job.tests {
            Some(_) => Some(self.run_verification(job, &workspace).await?),
            None => None,
        };

        tracing::debug!("result-ready");
        workspace.clear_bytecode_caches();
        workspace.release();

        Ok(ExecutionResult {
            exit_code: guest.exit_code,
            stdout: guest.stdout,
            stderr: guest.stderr,
            tests,
            duration_ms: u64::try_from(guest.elapsed.as_millis()).unwrap_or(u64::MAX),
            truncated: guest.truncated,
        })
    }

    /// Reject empty or oversized submissions and anything the scanner flags
    fn validate(&self, job: &Job) -> Result<()> {
        if job.code.trim().is_empty() {
            return Err(Error::InvalidInput("Program text is empty".into()));
        }
        self.check_size("Program", &job.code)?;
        if let Some(tests) = &job.tests {
            self.check_size("Verification program", tests)?;
        }

        if let Some(finding) = self.scanner.scan(&job.code) {
            return Err(Error::PolicyViolation(format!("Program rejected: {}", finding)));
        }
        if let Some(finding) = job.tests.as_deref().and_then(|t| self.scanner.scan(t)) {
            return Err(Error::PolicyViolation(format!(
                "Verification program rejected: {}",
                finding
            )));
        }
        Ok(())
    }

    fn check_size(&self, what: &str, text: &str) -> Result<()> {
        if text.len() > self.execution.max_program_bytes {
            return Err(Error::InvalidInput(format!(
                "{} exceeds {} bytes",
                what, self.execution.max_program_bytes
            )));
        }
        let lines = text.lines().count();
        if lines > self.execution.max_program_lines {
            return Err(Error::InvalidInput(format!(
                "{} has {} lines, limit is {}",
                what, lines, self.execution.max_program_lines
            )));
        }
        Ok(())
    }

    async fn run_guest(&self, job: &Job, workspace: &Workspace) -> Result<GuestRun> {
        let started = Instant::now();
        let mut child = self
            .policy
            .guest_command(workspace)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to launch guest: {}", e)))?;
        let group = ProcessGroup::of(&child)?;
        let _guard = GroupGuard::new(group);
        tracing::debug!(pgid = group.id(), "guest-running");

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("Guest stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("Guest stderr was not captured".into()))?;

        let input = job.stdin.clone();
        let feed = async move {
            if let Some(mut pipe) = stdin {
                if let Some(text) = input {
                    if let Err(e) = pipe.write_all(text.as_bytes()).await {
                        tracing::debug!("Guest closed stdin early: {}", e);
                    }
                }
                // dropping the pipe closes the guest's stdin
            }
        };

        let wait = async {
            let status = child.wait().await;
            // descendants still holding the output pipes would keep the pump alive
            if let Err(e) = group.terminate() {
                tracing::warn!("Failed to stop guest descendants: {}", e);
            }
            status
        };

        let pump = StreamPump::new(job.id, &self.pump_limits, self.sink.as_ref(), group);

        let joined = tokio::time::timeout(self.execution.guest_timeout, async {
            tokio::join!(feed, wait, pump.run(stdout, stderr))
        })
        .await;

        let (status, outcome) = match joined {
            Ok(((), status, outcome)) => (status?, outcome),
            Err(_) => {
                if let Err(e) = group.terminate() {
                    tracing::warn!("Failed to stop guest after its deadline: {}", e);
                }
                if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
                    tracing::warn!("Guest {} not reaped after kill", group.id());
                }
                return Err(Error::Timeout(format!(
                    "Guest exceeded the {}s deadline",
                    self.execution.guest_timeout.as_secs_f64()
                )));
            }
        };

        let elapsed = started.elapsed();
        tracing::debug!(status = %status, "guest-terminated");

        if outcome.stop == StopReason::WallClock {
            return Err(Error::Timeout(format!(
                "Guest exceeded the {}s wall-clock limit",
                self.pump_limits.wall_clock.as_secs_f64()
            )));
        }

        Ok(GuestRun {
            exit_code: exit_code(status),
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            truncated: outcome.stop == StopReason::LineLimit,
            elapsed,
        })
    }

    async fn run_verification(&self, job: &Job, workspace: &Workspace) -> Result<Vec<TestOutcome>> {
        self.sink.emit(StreamEvent::test_start(job.id)).await;
        tracing::debug!("verification-running");

        // only the report file is read, so the verification output is discarded
        let mut command = self.policy.verification_command(workspace);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = command
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to launch verification: {}", e)))?;
        let _guard = GroupGuard::new(ProcessGroup::of(&child)?);

        let status =
            match tokio::time::timeout(self.execution.verification_timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    return Err(Error::Timeout(format!(
                        "Verification exceeded the {}s deadline",
                        self.execution.verification_timeout.as_secs_f64()
                    )))
                }
            };
        tracing::debug!(exit_code = exit_code(status), "verification-done");

        let report_file = &self.policy.invocation().report_file;
        match workspace.read_file(report_file)? {
            Some(text) => match parse_report(&text) {
                Ok(outcomes) => Ok(outcomes),
                Err(e) => {
                    tracing::warn!("Unreadable verification report: {}", e);
                    Ok(Vec::new())
                }
            },
            None => {
                tracing::debug!("No verification report produced");
                Ok(Vec::new())
            }
        }
    }
}

/// Text of the terminal `error` event for a failed job
fn terminal_message(error: &Error) -> String {
    match error {
        Error::Timeout(_) => "Execution timed out".to_string(),
        other => format!("Execution error: {}", other),
    }
}
