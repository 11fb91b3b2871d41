//! Stream Pump
//!
//! Drains a running guest's stdout line by line while the guest runs,
//! forwarding each line to the hub and recognizing structured-state lines.
//! Stderr is collected concurrently (byte-capped) and forwarded once after
//! stdout ends. The pump enforces the output-line ceiling and a wall-clock
//! ceiling, killing the guest's process group when either is hit.

mod structured;

pub use structured::{classify, StructuredLine};

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::core::StreamEvent;
use crate::hub::EventSink;
use crate::sandbox::ProcessGroup;

/// How long to wait for stderr to close once the guest has been killed
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Ceilings enforced while draining
#[derive(Debug, Clone)]
pub struct PumpLimits {
    pub max_output_lines: usize,
    pub max_line_bytes: usize,
    pub max_stderr_bytes: usize,
    pub wall_clock: Duration,
    pub structured_prefix: String,
}

impl PumpLimits {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        PumpLimits {
            max_output_lines: config.max_output_lines,
            max_line_bytes: config.max_line_bytes.max(1),
            max_stderr_bytes: config.max_stderr_bytes,
            wall_clock: config.pump_wall_clock,
            structured_prefix: config.structured_prefix.clone(),
        }
    }
}

/// Why draining stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stdout closed
    Eof,
    /// Output-line ceiling exceeded, guest killed
    LineLimit,
    /// Wall-clock ceiling exceeded, guest killed
    WallClock,
}

/// What the pump captured
#[derive(Debug, Clone)]
pub struct PumpOutcome {
    /// Captured stdout lines joined with `\n`
    pub stdout: String,
    /// Captured stderr, at most `max_stderr_bytes`
    pub stderr: String,
    /// Number of stdout lines captured
    pub lines: usize,
    pub stop: StopReason,
}

/// Output drain for one guest process
pub struct StreamPump<'a> {
    job_id: Uuid,
    limits: &'a PumpLimits,
    sink: &'a dyn EventSink,
    group: ProcessGroup,
}

impl<'a> StreamPump<'a> {
    pub fn new(
        job_id: Uuid,
        limits: &'a PumpLimits,
        sink: &'a dyn EventSink,
        group: ProcessGroup,
    ) -> Self {
        StreamPump {
            job_id,
            limits,
            sink,
            group,
        }
    }

    /// Drain until stdout closes or a ceiling is hit
    pub async fn run<O, E>(self, stdout: O, stderr: E) -> PumpOutcome
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let stderr_task = tokio::spawn(collect_capped(stderr, self.limits.max_stderr_bytes));

        let deadline = tokio::time::Instant::now() + self.limits.wall_clock;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::with_capacity(256);
        let mut captured: Vec<String> = Vec::new();

        // bytes of a multibyte character split by the line cap
        let mut carry: Vec<u8> = Vec::new();
        let mut after_cut = false;

        let mut stop = loop {
            buf.clear();
            buf.append(&mut carry);
            let budget = self.limits.max_line_bytes.saturating_sub(buf.len()).max(1);
            let mut limited = (&mut reader).take(budget as u64);
            let read = tokio::select! {
                read = limited.read_until(b'\n', &mut buf) => read,
                _ = tokio::time::sleep_until(deadline) => break StopReason::WallClock,
            };

            let at_eof = match read {
                Ok(0) => true,
                Ok(_) => false,
                Err(e) => {
                    tracing::warn!("Reading guest stdout failed: {}", e);
                    true
                }
            };
            if at_eof && buf.is_empty() {
                break StopReason::Eof;
            }

            // terminator of a line that was cut exactly at the cap
            if after_cut && matches!(buf.as_slice(), b"\n" | b"\r\n") {
                after_cut = false;
                continue;
            }
            after_cut = !at_eof
                && !buf.ends_with(b"\n")
                && buf.len() >= self.limits.max_line_bytes;
            if after_cut {
                let keep = char_boundary(&buf);
                if keep > 0 {
                    carry.extend_from_slice(&buf[keep..]);
                    buf.truncate(keep);
                }
            }

            if captured.len() >= self.limits.max_output_lines {
                break StopReason::LineLimit;
            }

            let line = decode_line(&buf);
            self.sink
                .emit(StreamEvent::stdout(self.job_id, line.clone()))
                .await;

            match classify(&line, &self.limits.structured_prefix) {
                StructuredLine::Plain => {}
                StructuredLine::State(payload) => {
                    self.sink
                        .emit(StreamEvent::joint_state(self.job_id, payload))
                        .await;
                }
                StructuredLine::Malformed(reason) => {
                    tracing::warn!("Ignoring malformed structured line: {}", reason);
                }
            }

            captured.push(line);
            if at_eof {
                break StopReason::Eof;
            }
        };

        match stop {
            StopReason::Eof => {}
            StopReason::LineLimit => {
                self.abort(format!(
                    "Output limit exceeded ({} lines), execution stopped",
                    self.limits.max_output_lines
                ))
                .await;
            }
            StopReason::WallClock => self.abort(self.wall_clock_message()).await,
        }

        let stderr = self.finish_stderr(stderr_task, &mut stop, deadline).await;
        if !stderr.is_empty() {
            self.sink
                .emit(StreamEvent::stderr(self.job_id, stderr.clone()))
                .await;
        }

        tracing::debug!("Pump stopped ({:?}) after {} lines", stop, captured.len());
        PumpOutcome {
            lines: captured.len(),
            stdout: captured.join("\n"),
            stderr,
            stop,
        }
    }

    async fn abort(&self, message: String) {
        tracing::info!("{}", message);
        self.sink
            .emit(StreamEvent::error(Some(self.job_id), message))
            .await;
        if let Err(e) = self.group.terminate() {
            tracing::warn!("Failed to stop guest: {}", e);
        }
    }

    fn wall_clock_message(&self) -> String {
        format!(
            "Wall-clock limit of {}s exceeded, execution stopped",
            self.limits.wall_clock.as_secs_f64()
        )
    }

    /// Wait for the stderr collector
    ///
    /// After a clean stdout EOF the guest may still be running, so stderr is
    /// awaited up to the wall-clock deadline; hitting it turns the stop into
    /// `WallClock`. Once the group has been killed only a short grace remains.
    async fn finish_stderr(
        &self,
        mut task: JoinHandle<Vec<u8>>,
        stop: &mut StopReason,
        deadline: tokio::time::Instant,
    ) -> String {
        if *stop == StopReason::Eof {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(joined) => return collected(joined),
                Err(_) => {
                    *stop = StopReason::WallClock;
                    self.abort(self.wall_clock_message()).await;
                }
            }
        }

        match tokio::time::timeout(STDERR_GRACE, &mut task).await {
            Ok(joined) => collected(joined),
            Err(_) => {
                task.abort();
                tracing::warn!("Stderr stayed open after the guest was killed, discarding it");
                String::new()
            }
        }
    }
}

fn collected(joined: Result<Vec<u8>, tokio::task::JoinError>) -> String {
    match joined {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("Stderr collector failed: {}", e);
            String::new()
        }
    }
}

/// Length of `buf` without a trailing incomplete UTF-8 sequence
fn char_boundary(buf: &[u8]) -> usize {
    match std::str::from_utf8(buf) {
        Ok(_) => buf.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => buf.len(),
    }
}

/// Read up to `cap` bytes, then keep draining so the writer never blocks
async fn collect_capped<R>(reader: R, cap: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut reader = reader;
    let mut bytes = Vec::new();
    if let Err(e) = (&mut reader).take(cap as u64).read_to_end(&mut bytes).await {
        tracing::debug!("Stderr read ended early: {}", e);
        return bytes;
    }
    if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
        tracing::debug!("Stderr drain ended early: {}", e);
    }
    bytes
}

fn decode_line(buf: &[u8]) -> String {
    let bytes = buf.strip_suffix(b"\n").unwrap_or(buf);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
