//! Configuration paths
//!
//! Utilities for resolving configuration file paths.

use std::path::PathBuf;

/// Get the configuration directory
pub fn config_dir() -> PathBuf {
    // Check for explicit override
    if let Ok(dir) = std::env::var("CODEDOCK_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .map(|d| d.join("codedock"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".config").join("codedock"))
                .unwrap_or_else(|| PathBuf::from(".codedock"))
        })
}

/// Get the main configuration file path
pub fn config_path() -> PathBuf {
    // Check for explicit override
    if let Ok(path) = std::env::var("CODEDOCK_CONFIG") {
        return PathBuf::from(path);
    }

    config_dir().join("config.json")
}

/// Get the directory under which per-job workspaces are created
///
/// Job workspaces are short-lived, so this defaults to the system temp
/// directory rather than a persistent data directory.
pub fn workspace_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CODEDOCK_WORKSPACE") {
        return PathBuf::from(dir);
    }

    std::env::temp_dir().join("codedock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        // Just ensure these don't panic
        let _ = config_dir();
        let _ = config_path();
        assert!(workspace_dir().is_absolute() || std::env::var("CODEDOCK_WORKSPACE").is_ok());
    }
}
