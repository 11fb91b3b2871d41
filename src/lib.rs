//! # Code Dock
//!
//! Runs untrusted programs in resource-bounded subprocesses and streams
//! their output live to any number of attached observers.
//!
//! ## Features
//!
//! - **Kernel-enforced ceilings:** memory, CPU time, process count, open files and file size
//! - **Process-group termination:** deadlines kill the whole guest subtree, never just one process
//! - **Live streaming:** every output line is fanned out through the broadcast hub as it is read
//! - **Structured state:** `JOINT_STATE:{...}` lines become typed `joint_state` events
//! - **Optional verification:** a second sandboxed run whose report becomes per-test outcomes

pub mod config;
pub mod core;
pub mod error;
pub mod hub;
pub mod orchestrator;
pub mod pump;
pub mod sandbox;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use hub::{EventSink, Hub};
pub use orchestrator::Orchestrator;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
