//! Sandbox configuration types
//!
//! Resource ceilings, environment scrubbing rules, interpreter invocation
//! and the advisory source scan. Defaults are the strictest ceilings the
//! service has shipped with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used for both the guest and the verification run
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    /// Kernel-enforced resource ceilings
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Environment filtering
    #[serde(default)]
    pub env: EnvPolicyConfig,
    /// Advisory static scan
    #[serde(default)]
    pub scan: ScanConfig,
    /// Directory under which per-job workspaces are created
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            interpreter: InterpreterConfig::default(),
            limits: ResourceLimits::default(),
            env: EnvPolicyConfig::default(),
            scan: ScanConfig::default(),
            workspace_root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    crate::config::paths::workspace_dir()
}

/// Interpreter invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Interpreter program, resolved through `PATH` when not absolute
    #[serde(default = "default_program")]
    pub program: String,
    /// Flags placed before the entry file
    #[serde(default = "default_flags")]
    pub flags: Vec<String>,
    /// File name the guest program is materialized to
    #[serde(default = "default_entry_file")]
    pub entry_file: String,
    /// File name the verification program is materialized to
    #[serde(default = "default_tests_file")]
    pub tests_file: String,
    /// Machine-readable report written by the verification tool
    #[serde(default = "default_report_file")]
    pub report_file: String,
    /// Arguments for the verification run (after the interpreter)
    #[serde(default = "default_verification_args")]
    pub verification_args: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            program: default_program(),
            flags: default_flags(),
            entry_file: default_entry_file(),
            tests_file: default_tests_file(),
            report_file: default_report_file(),
            verification_args: default_verification_args(),
        }
    }
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_flags() -> Vec<String> {
    // no bytecode, unbuffered stdio for live streaming
    vec!["-B".to_string(), "-u".to_string()]
}

fn default_entry_file() -> String {
    "main.py".to_string()
}

fn default_tests_file() -> String {
    "test_user.py".to_string()
}

fn default_report_file() -> String {
    ".report.json".to_string()
}

fn default_verification_args() -> Vec<String> {
    [
        "-B",
        "-m",
        "pytest",
        "-q",
        "test_user.py",
        "--json-report",
        "--json-report-file=.report.json",
        "-p",
        "no:cacheprovider",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Resource ceilings applied with `setrlimit` before the guest gains control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Address space ceiling in bytes
    #[serde(default = "default_memory")]
    pub memory_bytes: u64,
    /// CPU time ceiling in seconds
    #[serde(default = "default_cpu")]
    pub cpu_seconds: u64,
    /// Process count ceiling
    #[serde(default = "default_processes")]
    pub max_processes: u64,
    /// Open file descriptor ceiling
    #[serde(default = "default_open_files")]
    pub max_open_files: u64,
    /// Largest file the guest may write, in bytes
    #[serde(default = "default_file_size")]
    pub max_file_size_bytes: u64,
    /// Allow core dumps
    #[serde(default)]
    pub core_dumps: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            memory_bytes: default_memory(),
            cpu_seconds: default_cpu(),
            max_processes: default_processes(),
            max_open_files: default_open_files(),
            max_file_size_bytes: default_file_size(),
            core_dumps: false,
        }
    }
}

fn default_memory() -> u64 {
    256 << 20
}

fn default_cpu() -> u64 {
    10
}

fn default_processes() -> u64 {
    10
}

fn default_open_files() -> u64 {
    64
}

fn default_file_size() -> u64 {
    10 << 20
}

/// Environment filtering rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvPolicyConfig {
    /// Case-insensitive regular expressions; matching variable names are stripped
    #[serde(default = "default_sensitive_patterns")]
    pub sensitive_patterns: Vec<String>,
    /// Variables always set in the guest environment (after filtering)
    #[serde(default = "default_overrides")]
    pub overrides: BTreeMap<String, String>,
}

impl Default for EnvPolicyConfig {
    fn default() -> Self {
        EnvPolicyConfig {
            sensitive_patterns: default_sensitive_patterns(),
            overrides: default_overrides(),
        }
    }
}

fn default_sensitive_patterns() -> Vec<String> {
    [
        "KEY",
        "SECRET",
        "TOKEN",
        "PASS(WORD|WD)?",
        "CREDENTIAL",
        "PRIVATE",
        "AUTH",
        "SESSION",
        "COOKIE",
        "DATABASE_URL",
        "^AWS_",
        "^GCP_",
        "^GOOGLE_",
        "^AZURE_",
        "^LD_",
        "^PYTHON",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_overrides() -> BTreeMap<String, String> {
    [
        ("PYTHONDONTWRITEBYTECODE", "1"),
        ("PYTHONUNBUFFERED", "1"),
        ("PYTHONNOUSERSITE", "1"),
        ("LANG", "C.UTF-8"),
        ("LC_ALL", "C.UTF-8"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Advisory static scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Run the scan before launching anything
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Substrings that cause a submission to be rejected
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            enabled: true,
            blocked_patterns: default_blocked_patterns(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_blocked_patterns() -> Vec<String> {
    [
        // process control
        "import os",
        "from os",
        "import subprocess",
        "from subprocess",
        "import multiprocessing",
        "import pty",
        "import signal",
        "os.system",
        "os.fork",
        "os.exec",
        // filesystem
        "import shutil",
        "import pathlib",
        "from pathlib",
        "open(",
        // network
        "import socket",
        "from socket",
        "import urllib",
        "import http",
        "import requests",
        // introspection and dynamic code
        "import ctypes",
        "import importlib",
        "__import__",
        "__builtins__",
        "__subclasses__",
        "__globals__",
        "sys.modules",
        "eval(",
        "exec(",
        "compile(",
        "globals(",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
