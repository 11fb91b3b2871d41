//! Configuration module
//!
//! - types/mod.rs: top-level `Config`, server and logging settings
//! - types/sandbox.rs: interpreter, resource ceilings, env filtering, scan
//! - types/execution.rs: per-job deadlines and output ceilings
//! - io.rs: configuration loading and saving
//! - validation.rs: configuration validation
//! - paths.rs: configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::{Config, LogConfig, ServerConfig};

pub use types::sandbox::{
    EnvPolicyConfig, InterpreterConfig, ResourceLimits, SandboxConfig, ScanConfig,
};

pub use types::execution::ExecutionConfig;

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path, workspace_dir};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
