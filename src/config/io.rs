//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    parse_config(&content, path.extension().and_then(|ext| ext.to_str()))
}

fn parse_config(content: &str, extension: Option<&str>) -> Result<Config> {
    match extension {
        Some("json") | Some("json5") => {
            json5::from_str(content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))
        }
        Some("toml") => {
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))
        }
        // Try JSON5 first, then TOML
        _ => json5::from_str(content)
            .or_else(|_| toml::from_str(content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e))),
    }
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Values that do not
/// parse are ignored and the file/default value is kept.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();

    // Server overrides (PORT kept for container platforms)
    if let Ok(port) = std::env::var("CODEDOCK_PORT").or_else(|_| std::env::var("PORT")) {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }
    if let Ok(bind) = std::env::var("CODEDOCK_BIND") {
        config.server.bind = bind;
    }

    // Sandbox overrides
    if let Ok(python) = std::env::var("CODEDOCK_PYTHON") {
        config.sandbox.interpreter.program = python;
    }
    if let Ok(dir) = std::env::var("CODEDOCK_WORKSPACE") {
        config.sandbox.workspace_root = std::path::PathBuf::from(dir);
    }
    if let Ok(scan) = std::env::var("CODEDOCK_SCAN") {
        config.sandbox.scan.enabled = !matches!(scan.to_lowercase().as_str(), "off" | "false" | "0");
    }

    // Execution overrides
    if let Ok(timeout) = std::env::var("CODEDOCK_GUEST_TIMEOUT") {
        if let Ok(v) = humantime_serde::re::humantime::parse_duration(&timeout) {
            config.execution.guest_timeout = v;
        }
    }

    // Logging overrides
    if let Ok(level) = std::env::var("RUST_LOG") {
        config.log.level = level;
    }
    if let Ok(format) = std::env::var("LOG_FORMAT") {
        config.log.format = format;
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "toml") {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
