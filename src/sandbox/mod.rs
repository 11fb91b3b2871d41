//! Sandbox module - bounded execution of untrusted guest programs
//!
//! - policy.rs: command construction with rlimits, process group and scrubbed env
//! - env.rs: credential-stripping environment filter
//! - scan.rs: advisory static scan (swappable)
//! - workspace.rs: per-job owner-only directories with drop-time release
//! - process.rs: process-group termination

mod env;
mod policy;
mod process;
mod scan;
mod workspace;

pub use env::EnvFilter;
pub use policy::SandboxPolicy;
pub use process::{exit_code, GroupGuard, ProcessGroup};
pub use scan::{scanner_from_config, AllowAll, Finding, PatternScanner, ProgramScanner};
pub use workspace::{Workspace, WorkspaceManager};

#[cfg(test)]
pub(crate) use policy::tests::sh_config;
