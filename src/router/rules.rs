//! Regex routing rules
//!
//! Deterministic classifier that needs no model. Rules are checked in order and
//! the first one that applies names the target.

use super::classifier::{
    Classification, ClassificationRequest, Classifier, ClassifyError, RoutingScope,
};
use crate::config::ConfigError;
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One routing rule as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// State name to route to
    pub target: String,
    /// Case-insensitive regexes matched against the raw user message; an empty
    /// list matches every message
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Restrict to these current states (empty = any)
    #[serde(default)]
    pub from: Vec<String>,
    /// Only consulted in the gated tier, i.e. once the current state is complete
    #[serde(default)]
    pub when_complete: bool,
}

impl RoutingRule {
    pub fn new(target: &str, patterns: &[&str]) -> Self {
        Self {
            target: target.to_string(),
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            from: Vec::new(),
            when_complete: false,
        }
    }

    #[must_use]
    pub fn from_states(mut self, states: &[&str]) -> Self {
        self.from = states.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn when_complete(mut self) -> Self {
        self.when_complete = true;
        self
    }
}

/// Ordered rule list, serde-loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRules {
    pub rules: Vec<RoutingRule>,
}

impl RoutingRules {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::RulesFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

struct CompiledRule {
    target: String,
    patterns: Vec<Regex>,
    from: Vec<String>,
    when_complete: bool,
}

impl CompiledRule {
    fn applies(&self, request: &ClassificationRequest<'_>) -> bool {
        if self.when_complete && request.scope != RoutingScope::Gated {
            return false;
        }
        if !self.from.is_empty() && !self.from.iter().any(|s| s == request.current) {
            return false;
        }
        if !request.candidates.contains(&self.target.as_str()) {
            return false;
        }
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(request.message))
    }
}

pub struct RuleClassifier {
    rules: Vec<CompiledRule>,
}

impl RuleClassifier {
    pub fn new(rules: &RoutingRules) -> Result<Self, ConfigError> {
        let rules = rules
            .rules
            .iter()
            .map(|rule| {
                let patterns = rule
                    .patterns
                    .iter()
                    .map(|pattern| {
                        RegexBuilder::new(pattern)
                            .case_insensitive(true)
                            .build()
                            .map_err(|source| ConfigError::InvalidPattern {
                                pattern: pattern.clone(),
                                source,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledRule {
                    target: rule.target.clone(),
                    patterns,
                    from: rule.from.clone(),
                    when_complete: rule.when_complete,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { rules })
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Classification, ClassifyError> {
        let verdict = self
            .rules
            .iter()
            .find(|rule| rule.applies(request))
            .map_or_else(Classification::stay, |rule| {
                Classification::target(rule.target.clone())
            });
        Ok(verdict)
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn request<'a>(
        current: &'static str,
        candidates: Vec<&'static str>,
        scope: RoutingScope,
        message: &'a str,
    ) -> ClassificationRequest<'a> {
        ClassificationRequest {
            current,
            candidates,
            scope,
            message,
            context: message,
        }
    }

    fn classifier() -> RuleClassifier {
        RuleClassifier::new(&RoutingRules {
            rules: vec![
                RoutingRule::new("GREETING_INTENT", &[r"\bmenu\b", r"\bgo back\b"]),
                RoutingRule::new("DATA_GENERATION", &[r"\bgenerate\b"])
                    .from_states(&["SKILLS_GREETING"]),
                RoutingRule::new("SEED_DATA_ITERATION", &[]).when_complete(),
            ],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_pattern_match_is_case_insensitive() {
        let verdict = classifier()
            .classify(&request(
                "GENERAL_QA",
                vec!["GREETING_INTENT", "GENERAL_QA"],
                RoutingScope::Global,
                "Back to the MENU please",
            ))
            .await
            .unwrap();
        assert_eq!(verdict, Classification::target("GREETING_INTENT"));
    }

    #[tokio::test]
    async fn test_target_must_be_offered() {
        let verdict = classifier()
            .classify(&request(
                "GENERAL_QA",
                vec!["GENERAL_QA"],
                RoutingScope::Gated,
                "menu",
            ))
            .await
            .unwrap();
        assert!(verdict.is_stay());
    }

    #[tokio::test]
    async fn test_from_restricts_current_state() {
        let c = classifier();
        let all = vec!["DATA_GENERATION", "GREETING_INTENT"];
        let hit = c
            .classify(&request("SKILLS_GREETING", all.clone(), RoutingScope::Global, "generate it"))
            .await
            .unwrap();
        assert_eq!(hit, Classification::target("DATA_GENERATION"));

        let miss = c
            .classify(&request("GENERAL_QA", all, RoutingScope::Global, "generate it"))
            .await
            .unwrap();
        assert!(miss.is_stay());
    }

    #[tokio::test]
    async fn test_when_complete_rules_only_in_gated_scope() {
        let c = classifier();
        let candidates = vec!["SEED_DATA_ITERATION"];
        let gated = c
            .classify(&request("SEED_DATA_CREATION", candidates.clone(), RoutingScope::Gated, "ok"))
            .await
            .unwrap();
        assert_eq!(gated, Classification::target("SEED_DATA_ITERATION"));

        let global = c
            .classify(&request("SEED_DATA_CREATION", candidates, RoutingScope::Global, "ok"))
            .await
            .unwrap();
        assert!(global.is_stay());
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let rules = RoutingRules {
            rules: vec![RoutingRule::new("GENERAL_QA", &["(unclosed"])],
        };
        assert!(matches!(
            RuleClassifier::new(&rules),
            Err(ConfigError::InvalidPattern { pattern, .. }) if pattern == "(unclosed"
        ));
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rules": [{{"target": "GENERAL_QA", "patterns": ["\\bwhat is\\b"]}}]}}"#
        )
        .unwrap();

        let rules = RoutingRules::load(file.path()).unwrap();
        assert_eq!(rules.rules.len(), 1);
        assert!(rules.rules[0].from.is_empty());
        assert!(!rules.rules[0].when_complete);

        assert!(matches!(
            RoutingRules::load(Path::new("/nonexistent/rules.json")),
            Err(ConfigError::RulesFile { .. })
        ));
        assert!(matches!(
            RoutingRules::from_json("[]"),
            Err(ConfigError::RulesFormat(_))
        ));
    }
}
