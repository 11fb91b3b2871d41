//! Advisory static scan
//!
//! A cheap deterrent that rejects submissions containing well-known
//! process, filesystem, network or introspection primitives before any
//! process exists. It is trivially bypassable and is not a security
//! boundary; the resource ceilings are.

use std::sync::Arc;

use crate::config::ScanConfig;

/// A blocked pattern found in submitted source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// The pattern that matched
    pub pattern: String,
    /// 1-based line number of the first match
    pub line: usize,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' is not allowed (line {})", self.pattern, self.line)
    }
}

/// Pluggable accept/reject policy over program text
pub trait ProgramScanner: Send + Sync {
    /// Scanner name, for logs
    fn name(&self) -> &str;

    /// Return the first finding, or `None` to accept
    fn scan(&self, source: &str) -> Option<Finding>;
}

/// Substring blocklist scanner
#[derive(Debug, Clone)]
pub struct PatternScanner {
    patterns: Vec<String>,
}

impl PatternScanner {
    pub fn new(patterns: Vec<String>) -> Self {
        PatternScanner {
            patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }
}

impl ProgramScanner for PatternScanner {
    fn name(&self) -> &str {
        "pattern"
    }

    fn scan(&self, source: &str) -> Option<Finding> {
        source.lines().enumerate().find_map(|(idx, line)| {
            self.patterns
                .iter()
                .find(|pattern| line.contains(pattern.as_str()))
                .map(|pattern| Finding {
                    pattern: pattern.clone(),
                    line: idx + 1,
                })
        })
    }
}

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ProgramScanner for AllowAll {
    fn name(&self) -> &str {
        "allow-all"
    }

    fn scan(&self, _source: &str) -> Option<Finding> {
        None
    }
}

/// Build the scanner selected by configuration
pub fn scanner_from_config(config: &ScanConfig) -> Arc<dyn ProgramScanner> {
    if config.enabled {
        Arc::new(PatternScanner::new(config.blocked_patterns.clone()))
    } else {
        Arc::new(AllowAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_scanner() -> Arc<dyn ProgramScanner> {
        scanner_from_config(&ScanConfig::default())
    }

    #[test]
    fn test_plain_program_is_accepted() {
        let source = "import json\nimport time\nprint(json.dumps({'a': 1.0}))\n";
        assert_eq!(default_scanner().scan(source), None);
    }

    #[test]
    fn test_blocked_primitive_reports_line() {
        let source = "x = 1\nimport subprocess\n";
        let finding = default_scanner().scan(source).unwrap();
        assert_eq!(finding.pattern, "import subprocess");
        assert_eq!(finding.line, 2);
        assert!(finding.to_string().contains("line 2"));
    }

    #[test]
    fn test_dunder_import_is_rejected() {
        assert!(default_scanner().scan("__import__('o' + 's')").is_some());
        assert!(default_scanner().scan("data = open('/etc/passwd').read()").is_some());
    }

    #[test]
    fn test_disabled_scan_allows_everything() {
        let config = ScanConfig {
            enabled: false,
            ..ScanConfig::default()
        };
        let scanner = scanner_from_config(&config);
        assert_eq!(scanner.name(), "allow-all");
        assert_eq!(scanner.scan("import os"), None);
    }
}
