//! Per-job workspaces
//!
//! Every job gets a fresh owner-only directory under the workspace root.
//! A [`Workspace`] removes its directory when dropped, so release happens on
//! every exit path; removal failures are logged and never surface.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use uuid::Uuid;

use crate::error::{Error, Result};

const JOB_DIR_PREFIX: &str = "job_";

/// Interpreter caches that must not leak between jobs
const BYTECODE_CACHES: &[&str] = &["__pycache__", ".pytest_cache"];

/// Creates and sweeps job workspaces under one root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Use `root`, creating it (owner-only) if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::Workspace(format!("Failed to create workspace root {}: {}", root.display(), e))
        })?;
        fs::set_permissions(&root, fs::Permissions::from_mode(0o700)).map_err(|e| {
            Error::Workspace(format!("Failed to restrict workspace root {}: {}", root.display(), e))
        })?;
        Ok(WorkspaceManager { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire a fresh workspace for `job_id`
    pub fn acquire(&self, job_id: Uuid) -> Result<Workspace> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}_", JOB_DIR_PREFIX, job_id))
            .tempdir_in(&self.root)
            .map_err(|e| Error::Workspace(format!("Failed to create workspace: {}", e)))?;

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::Workspace(format!("Failed to restrict workspace: {}", e)))?;

        tracing::debug!("Acquired workspace {}", dir.path().display());
        Ok(Workspace { dir: Some(dir) })
    }

    /// Remove job directories older than `max_age`
    ///
    /// Returns how many were removed. Only entries carrying the job prefix
    /// are touched.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read workspace root {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(JOB_DIR_PREFIX) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_dir() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to sweep {}: {}", entry.path().display(), e),
            }
        }

        if removed > 0 {
            tracing::info!("Swept {} stale workspaces", removed);
        }
        removed
    }
}

/// One job's directory; removed on drop
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    /// Write `contents` to `name` inside the workspace (owner read/write only)
    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.resolve(name)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| Error::Workspace(format!("Failed to write {}: {}", name, e)))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| Error::Workspace(format!("Failed to write {}: {}", name, e)))?;
        Ok(path)
    }

    /// Read `name` if the guest produced it
    pub fn read_file(&self, name: &str) -> Result<Option<String>> {
        let path = self.resolve(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove interpreter bytecode caches left in the workspace
    pub fn clear_bytecode_caches(&self) {
        for cache in BYTECODE_CACHES {
            let path = self.path().join(cache);
            if path.exists() {
                if let Err(e) = fs::remove_dir_all(&path) {
                    tracing::warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Remove the workspace now
    pub fn release(mut self) {
        self.release_inner();
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && !name.contains('/')
            && name != "."
            && name != ".."
            && !name.contains('\0');
        if !valid {
            return Err(Error::Workspace(format!("Invalid workspace file name: {:?}", name)));
        }
        Ok(self.path().join(name))
    }

    fn release_inner(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => tracing::debug!("Released workspace {}", path.display()),
                Err(e) => tracing::warn!("Failed to remove workspace {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(root: &Path) -> usize {
        fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn test_acquire_is_owner_only_and_released_on_drop() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().join("ws")).unwrap();
        let id = Uuid::new_v4();

        let workspace = manager.acquire(id).unwrap();
        let path = workspace.path().to_path_buf();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(&format!("job_{}_", id)));

        drop(workspace);
        assert!(!path.exists());
        assert_eq!(entries(manager.root()), 0);
    }

    #[test]
    fn test_write_and_read_files() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path()).unwrap();
        let workspace = manager.acquire(Uuid::new_v4()).unwrap();

        let path = workspace.write_file("main.py", "print(1)\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(
            workspace.read_file("main.py").unwrap().as_deref(),
            Some("print(1)\n")
        );
        assert_eq!(workspace.read_file(".report.json").unwrap(), None);
    }

    #[test]
    fn test_file_names_cannot_escape() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path()).unwrap();
        let workspace = manager.acquire(Uuid::new_v4()).unwrap();

        for name in ["", "..", "../evil.py", "a/b.py"] {
            assert!(matches!(
                workspace.write_file(name, "x"),
                Err(Error::Workspace(_))
            ));
        }
    }

    #[test]
    fn test_bytecode_caches_are_removed() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path()).unwrap();
        let workspace = manager.acquire(Uuid::new_v4()).unwrap();
        fs::create_dir(workspace.path().join("__pycache__")).unwrap();
        fs::write(workspace.path().join("__pycache__/main.cpython-312.pyc"), b"x").unwrap();

        workspace.clear_bytecode_caches();
        assert!(!workspace.path().join("__pycache__").exists());
        workspace.release();
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn test_sweep_only_touches_job_dirs() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path()).unwrap();
        fs::create_dir(root.path().join("job_leftover")).unwrap();
        fs::create_dir(root.path().join("keep_me")).unwrap();

        assert_eq!(manager.sweep_stale(Duration::from_secs(3600)), 0);
        assert_eq!(manager.sweep_stale(Duration::ZERO), 1);
        assert!(root.path().join("keep_me").exists());
        assert!(!root.path().join("job_leftover").exists());
    }
}
