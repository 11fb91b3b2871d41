//! Process-group handle
//!
//! Guests are launched as the leader of a fresh process group, so one
//! `killpg` reaches every descendant they spawn.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::ExitStatus;
use tokio::process::Child;

use crate::error::{Error, Result};

/// Handle to a guest's process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: Pid,
}

impl ProcessGroup {
    /// Group led by `child`
    ///
    /// Only valid for children spawned with `process_group(0)`.
    pub fn of(child: &Child) -> Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| Error::Internal("Child exited before its group was recorded".into()))?;
        let pgid = i32::try_from(pid)
            .map_err(|_| Error::Internal(format!("Process id {} out of range", pid)))?;
        Ok(ProcessGroup {
            pgid: Pid::from_raw(pgid),
        })
    }

    /// Process group id
    pub fn id(&self) -> i32 {
        self.pgid.as_raw()
    }

    /// SIGKILL every member of the group
    ///
    /// Idempotent: a group that no longer exists counts as terminated.
    pub fn terminate(&self) -> Result<()> {
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) => {
                tracing::debug!("Killed process group {}", self.pgid);
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether any member of the group is still alive (zombies included)
    pub fn is_alive(&self) -> bool {
        killpg(self.pgid, None).is_ok()
    }
}

/// Kills the group when dropped
///
/// Held by the orchestrator for the life of a job so an early return,
/// panic or cancelled request future never leaves guest processes behind.
#[derive(Debug)]
pub struct GroupGuard {
    group: ProcessGroup,
}

impl GroupGuard {
    pub fn new(group: ProcessGroup) -> Self {
        GroupGuard { group }
    }

    pub fn group(&self) -> ProcessGroup {
        self.group
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Err(e) = self.group.terminate() {
            tracing::warn!("Failed to kill process group {}: {}", self.group.id(), e);
        }
    }
}

/// Exit code for a finished child; a signal death maps to the negated signal number
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        (None, None) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::process::Command;

    fn spawn_group(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_terminate_kills_leader() {
        let mut child = spawn_group("sleep 30 & sleep 30 & wait");
        let group = ProcessGroup::of(&child).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        group.terminate().unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(exit_code(status), -9);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut child = spawn_group("exit 3");
        let group = ProcessGroup::of(&child).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(exit_code(status), 3);

        group.terminate().unwrap();
        group.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_guard_kills_on_drop() {
        let mut child = spawn_group("sleep 30");
        let group = ProcessGroup::of(&child).unwrap();
        drop(GroupGuard::new(group));

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
