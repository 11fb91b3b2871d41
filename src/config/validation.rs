//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_deadlines(config, result);
    result = validate_ceilings(config, result);
    result = validate_sandbox_config(config, result);

    result
}

fn validate_deadlines(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let exec = &config.execution;

    if exec.guest_timeout.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "execution.guest_timeout",
            "Guest deadline must be greater than zero",
        ));
    }

    if exec.pump_wall_clock >= exec.guest_timeout {
        result = result.with_error(
            ValidationIssue::new(
                "execution.pump_wall_clock",
                format!(
                    "Pump wall-clock ceiling ({:?}) must be strictly tighter than the guest deadline ({:?})",
                    exec.pump_wall_clock, exec.guest_timeout
                ),
            )
            .with_suggestion("Lower execution.pump_wall_clock or raise execution.guest_timeout"),
        );
    }

    if exec.verification_timeout >= exec.guest_timeout {
        result = result.with_error(
            ValidationIssue::new(
                "execution.verification_timeout",
                "Verification timeout must be shorter than the guest deadline",
            )
            .with_suggestion("Lower execution.verification_timeout"),
        );
    }

    result
}

fn validate_ceilings(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let exec = &config.execution;

    for (path, value) in [
        ("execution.max_output_lines", exec.max_output_lines),
        ("execution.max_line_bytes", exec.max_line_bytes),
        ("execution.max_stderr_bytes", exec.max_stderr_bytes),
        ("execution.max_program_bytes", exec.max_program_bytes),
        ("execution.max_program_lines", exec.max_program_lines),
        ("execution.observer_buffer", exec.observer_buffer),
    ] {
        if value == 0 {
            result = result.with_error(ValidationIssue::new(path, "Ceiling must be greater than zero"));
        }
    }

    if exec.structured_prefix.trim().is_empty() {
        result = result.with_error(
            ValidationIssue::new("execution.structured_prefix", "Structured-state prefix is empty")
                .with_suggestion("Use the default \"JOINT_STATE:\""),
        );
    }

    result
}

fn validate_sandbox_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;
    let limits = &sandbox.limits;

    if limits.memory_bytes == 0 || limits.cpu_seconds == 0 || limits.max_open_files == 0 {
        result = result.with_error(ValidationIssue::new(
            "sandbox.limits",
            "Memory, CPU and file descriptor ceilings must be greater than zero",
        ));
    }

    if limits.max_open_files < 8 {
        result = result.with_warning(ValidationIssue::new(
            "sandbox.limits.max_open_files",
            "Very low descriptor ceiling; most interpreters will fail to start",
        ));
    }

    if which::which(&sandbox.interpreter.program).is_err() {
        result = result.with_warning(
            ValidationIssue::new(
                "sandbox.interpreter.program",
                format!("Interpreter not found: {}", sandbox.interpreter.program),
            )
            .with_suggestion("Install it or set CODEDOCK_PYTHON"),
        );
    }

    if !sandbox.scan.enabled {
        result = result.with_warning(ValidationIssue::new(
            "sandbox.scan.enabled",
            "Advisory source scan is disabled",
        ));
    }

    result
}
