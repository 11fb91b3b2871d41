//! Guest environment construction
//!
//! The child environment is built from scratch: inherited variables whose
//! names look like credentials (or loader/interpreter hijack hooks) are
//! dropped, then fixed overrides are applied on top.

use regex::{RegexSet, RegexSetBuilder};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::EnvPolicyConfig;
use crate::error::{Error, Result};

/// Compiled environment filter
#[derive(Debug, Clone)]
pub struct EnvFilter {
    sensitive: RegexSet,
    overrides: BTreeMap<String, String>,
}

impl EnvFilter {
    /// Compile the configured patterns (case-insensitive)
    pub fn new(config: &EnvPolicyConfig) -> Result<Self> {
        let sensitive = RegexSetBuilder::new(&config.sensitive_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("Invalid sensitive env pattern: {}", e)))?;

        Ok(EnvFilter {
            sensitive,
            overrides: config.overrides.clone(),
        })
    }

    /// Whether a variable name must never reach the guest
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive.is_match(name)
    }

    /// Filter `vars` and apply overrides
    pub fn filter<I>(&self, vars: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: BTreeMap<String, String> = vars
            .into_iter()
            .filter(|(name, _)| {
                let keep = !self.is_sensitive(name);
                if !keep {
                    tracing::trace!("Stripping {} from guest environment", name);
                }
                keep
            })
            .collect();

        env.extend(self.overrides.clone());
        env
    }

    /// Environment for a guest running inside `workspace`
    ///
    /// HOME and the temp variables point into the workspace so nothing the
    /// guest writes outlives the job.
    pub fn guest_env(&self, workspace: &Path) -> BTreeMap<String, String> {
        let mut env = self.filter(std::env::vars());
        let dir = workspace.display().to_string();
        for var in ["HOME", "TMPDIR", "TEMP", "TMP"] {
            env.insert(var.to_string(), dir.clone());
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_credentials_are_stripped() {
        let filter = EnvFilter::new(&EnvPolicyConfig::default()).unwrap();
        let env = filter.filter(vars(&[
            ("PATH", "/usr/bin"),
            ("OPENAI_API_KEY", "sk-123"),
            ("github_token", "ghp"),
            ("DB_PASSWORD", "hunter2"),
            ("AWS_REGION", "eu-west-1"),
            ("LD_PRELOAD", "/tmp/evil.so"),
            ("PYTHONPATH", "/srv"),
            ("TERM", "xterm"),
        ]));

        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(env.get("TERM").map(String::as_str), Some("xterm"));
        for stripped in [
            "OPENAI_API_KEY",
            "github_token",
            "DB_PASSWORD",
            "AWS_REGION",
            "LD_PRELOAD",
            "PYTHONPATH",
        ] {
            assert!(!env.contains_key(stripped), "{} leaked", stripped);
        }
    }

    #[test]
    fn test_overrides_win_over_inherited() {
        let filter = EnvFilter::new(&EnvPolicyConfig::default()).unwrap();
        let env = filter.filter(vars(&[("LANG", "de_DE.UTF-8")]));
        assert_eq!(env.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert_eq!(env.get("PYTHONDONTWRITEBYTECODE").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_guest_env_points_home_into_workspace() {
        let filter = EnvFilter::new(&EnvPolicyConfig::default()).unwrap();
        let env = filter.guest_env(Path::new("/tmp/codedock/job_x"));
        assert_eq!(env.get("HOME").map(String::as_str), Some("/tmp/codedock/job_x"));
        assert_eq!(env.get("TMPDIR").map(String::as_str), Some("/tmp/codedock/job_x"));
    }

    #[test]
    fn test_invalid_pattern_is_a_config_error() {
        let config = EnvPolicyConfig {
            sensitive_patterns: vec!["(".to_string()],
            overrides: BTreeMap::new(),
        };
        assert!(matches!(EnvFilter::new(&config), Err(Error::Config(_))));
    }
}
