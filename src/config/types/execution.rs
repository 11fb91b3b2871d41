//! Per-job execution configuration
//!
//! Deadlines nest: the pump's wall-clock ceiling must be strictly tighter
//! than the guest deadline, and the verification run has its own shorter
//! timeout. `validate_config` enforces the ordering.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deadlines, output ceilings and submission ceilings for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Hard deadline for the whole guest phase (launch through drain)
    #[serde(with = "humantime_serde", default = "default_guest_timeout")]
    pub guest_timeout: Duration,
    /// Wall-clock ceiling enforced by the stream pump
    #[serde(with = "humantime_serde", default = "default_pump_wall_clock")]
    pub pump_wall_clock: Duration,
    /// Deadline for the verification run
    #[serde(with = "humantime_serde", default = "default_verification_timeout")]
    pub verification_timeout: Duration,
    /// Maximum number of stdout lines drained before the guest is killed
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,
    /// Longer stdout lines are split into chunks of this size
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Captured stderr is truncated to this many bytes
    #[serde(default = "default_max_stderr_bytes")]
    pub max_stderr_bytes: usize,
    /// Largest accepted program text
    #[serde(default = "default_max_program_bytes")]
    pub max_program_bytes: usize,
    /// Most lines accepted in a program text
    #[serde(default = "default_max_program_lines")]
    pub max_program_lines: usize,
    /// Reserved prefix of the structured-state sub-protocol
    #[serde(default = "default_structured_prefix")]
    pub structured_prefix: String,
    /// Events buffered per observer before it is considered stalled
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            guest_timeout: default_guest_timeout(),
            pump_wall_clock: default_pump_wall_clock(),
            verification_timeout: default_verification_timeout(),
            max_output_lines: default_max_output_lines(),
            max_line_bytes: default_max_line_bytes(),
            max_stderr_bytes: default_max_stderr_bytes(),
            max_program_bytes: default_max_program_bytes(),
            max_program_lines: default_max_program_lines(),
            structured_prefix: default_structured_prefix(),
            observer_buffer: default_observer_buffer(),
        }
    }
}

fn default_guest_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_pump_wall_clock() -> Duration {
    Duration::from_secs(12)
}

fn default_verification_timeout() -> Duration {
    Duration::from_secs(6)
}

fn default_max_output_lines() -> usize {
    10_000
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_max_stderr_bytes() -> usize {
    64 * 1024
}

fn default_max_program_bytes() -> usize {
    256 * 1024
}

fn default_max_program_lines() -> usize {
    5_000
}

fn default_structured_prefix() -> String {
    "JOINT_STATE:".to_string()
}

fn default_observer_buffer() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deadlines_nest() {
        let config = ExecutionConfig::default();
        assert!(config.pump_wall_clock < config.guest_timeout);
        assert!(config.verification_timeout < config.guest_timeout);
    }

    #[test]
    fn test_humantime_durations() {
        let config: ExecutionConfig =
            serde_json::from_str(r#"{ "guest_timeout": "30s", "pump_wall_clock": "500ms" }"#)
                .unwrap();
        assert_eq!(config.guest_timeout, Duration::from_secs(30));
        assert_eq!(config.pump_wall_clock, Duration::from_millis(500));
        assert_eq!(config.verification_timeout, Duration::from_secs(6));
    }
}
