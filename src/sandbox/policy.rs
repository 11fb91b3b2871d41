//! Sandbox Policy
//!
//! Builds guest and verification commands: interpreter flags, scrubbed
//! environment, fresh process group, and kernel resource ceilings applied
//! in the child between fork and exec, before any guest code runs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::env::EnvFilter;
use super::workspace::Workspace;
use crate::config::{InterpreterConfig, ResourceLimits, SandboxConfig};
use crate::error::{Error, Result};

/// Resolved launch policy shared by every job
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    interpreter: PathBuf,
    invocation: InterpreterConfig,
    limits: ResourceLimits,
    env: EnvFilter,
}

impl SandboxPolicy {
    /// Resolve the interpreter and compile the environment filter
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let interpreter = which::which(&config.interpreter.program).map_err(|e| {
            Error::Config(format!(
                "Interpreter '{}' not found: {}",
                config.interpreter.program, e
            ))
        })?;

        Ok(SandboxPolicy {
            interpreter,
            invocation: config.interpreter.clone(),
            limits: config.limits,
            env: EnvFilter::new(&config.env)?,
        })
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn invocation(&self) -> &InterpreterConfig {
        &self.invocation
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Command running the materialized guest program
    pub fn guest_command(&self, workspace: &Workspace) -> Command {
        let mut args = self.invocation.flags.clone();
        args.push(self.invocation.entry_file.clone());
        self.command(&args, workspace)
    }

    /// Command running the verification tool against the materialized tests
    pub fn verification_command(&self, workspace: &Workspace) -> Command {
        self.command(&self.invocation.verification_args, workspace)
    }

    fn command(&self, args: &[String], workspace: &Workspace) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .args(args)
            .current_dir(workspace.path())
            .env_clear()
            .envs(self.env.guest_env(workspace.path()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let limits = self.limits;
        // SAFETY: the closure only issues async-signal-safe syscalls
        // (setrlimit, prctl) and does not allocate.
        unsafe {
            command.pre_exec(move || apply_limits(&limits));
        }
        command
    }
}

/// Apply ceilings to the calling process; runs in the forked child
fn apply_limits(limits: &ResourceLimits) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    setrlimit(Resource::RLIMIT_AS, limits.memory_bytes as _, limits.memory_bytes as _)?;
    // the hard limit trails by a second so SIGXCPU arrives before SIGKILL
    setrlimit(
        Resource::RLIMIT_CPU,
        limits.cpu_seconds as _,
        limits.cpu_seconds.saturating_add(1) as _,
    )?;
    setrlimit(Resource::RLIMIT_NPROC, limits.max_processes as _, limits.max_processes as _)?;
    setrlimit(Resource::RLIMIT_NOFILE, limits.max_open_files as _, limits.max_open_files as _)?;
    setrlimit(
        Resource::RLIMIT_FSIZE,
        limits.max_file_size_bytes as _,
        limits.max_file_size_bytes as _,
    )?;
    if !limits.core_dumps {
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
    }

    #[cfg(target_os = "linux")]
    nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sandbox::WorkspaceManager;
    use uuid::Uuid;

    /// Policy running `/bin/sh` with room for the test harness itself
    pub(crate) fn sh_config(workspace_root: &Path) -> SandboxConfig {
        SandboxConfig {
            interpreter: InterpreterConfig {
                program: "sh".to_string(),
                flags: Vec::new(),
                entry_file: "main.sh".to_string(),
                tests_file: "test_user.sh".to_string(),
                report_file: ".report.json".to_string(),
                verification_args: vec!["test_user.sh".to_string()],
            },
            limits: ResourceLimits {
                memory_bytes: 512 << 20,
                cpu_seconds: 5,
                max_processes: 4096,
                max_open_files: 64,
                max_file_size_bytes: 1 << 20,
                core_dumps: false,
            },
            workspace_root: workspace_root.to_path_buf(),
            ..SandboxConfig::default()
        }
    }

    #[test]
    fn test_missing_interpreter_is_a_config_error() {
        let mut config = SandboxConfig::default();
        config.interpreter.program = "definitely-not-an-interpreter-4821".to_string();
        assert!(matches!(
            SandboxPolicy::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_guest_sees_limits_and_scrubbed_env() {
        let root = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::from_config(&sh_config(root.path())).unwrap();
        let manager = WorkspaceManager::new(root.path()).unwrap();
        let workspace = manager.acquire(Uuid::new_v4()).unwrap();
        workspace
            .write_file(
                "main.sh",
                "ulimit -n\nulimit -c\necho \"home=$HOME\"\necho \"secret=${CODEDOCK_TEST_SECRET:-unset}\"\npwd\n",
            )
            .unwrap();

        std::env::set_var("CODEDOCK_TEST_SECRET", "leak");
        let output = policy.guest_command(&workspace).output().await.unwrap();
        std::env::remove_var("CODEDOCK_TEST_SECRET");

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<&str> = stdout.lines().collect();
        assert_eq!(lines[0], "64");
        assert_eq!(lines[1], "0");
        assert_eq!(lines[2], format!("home={}", workspace.path().display()));
        assert_eq!(lines[3], "secret=unset");
        assert_eq!(
            std::fs::canonicalize(lines[4]).unwrap(),
            std::fs::canonicalize(workspace.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_guest_leads_its_own_group() {
        let root = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::from_config(&sh_config(root.path())).unwrap();
        let manager = WorkspaceManager::new(root.path()).unwrap();
        let workspace = manager.acquire(Uuid::new_v4()).unwrap();
        workspace.write_file("main.sh", "sleep 5\n").unwrap();

        let mut child = policy.guest_command(&workspace).spawn().unwrap();
        let pid = nix::unistd::Pid::from_raw(child.id().unwrap() as i32);
        assert_eq!(nix::unistd::getpgid(Some(pid)).unwrap(), pid);

        child.kill().await.unwrap();
    }
}
