//! Control and approval phrases

use crate::config::ConfigError;
use regex::{Regex, RegexBuilder};

/// Whole-message commands that wipe the session from any state
pub const RESTART_PHRASES: &[&str] = &["restart", "reset", "start over", "fresh start"];

/// Default approval patterns (case-insensitive regexes)
pub const DEFAULT_APPROVAL_PHRASES: &[&str] = &[
    r"\blooks good\b",
    r"\blgtm\b",
    r"\bapprove[ds]?\b",
    r"\bthat'?s (good|great|perfect)\b",
    r"\bgo ahead\b",
    r"\bproceed\b",
    r"^\s*(yes|ok|okay|perfect)[.!]*\s*$",
];

pub fn is_restart_command(message: &str) -> bool {
    let normalized = message.trim().to_lowercase();
    RESTART_PHRASES.contains(&normalized.as_str())
}

/// Compiled set of case-insensitive patterns
#[derive(Debug, Clone, Default)]
pub struct PhraseMatcher {
    patterns: Vec<Regex>,
}

impl PhraseMatcher {
    pub fn new<P: AsRef<str>>(patterns: &[P]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ConfigError::InvalidPattern {
                        pattern: pattern.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_match(&self, message: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(message))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
