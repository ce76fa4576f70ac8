//! Deterministic keyword matcher used when the remote classifier is out of reach
//!
//! Deliberately permissive: one matching term flags a rule. Degrading to
//! more false positives is preferred over reporting nothing.

use tracing::{debug, info};

use crate::patterns::{normalize, FALLBACK_RULES};

#[derive(Debug, Clone)]
struct KeywordRule {
    name: String,
    terms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FallbackMatcher {
    rules: Vec<KeywordRule>,
}

impl Default for FallbackMatcher {
    fn default() -> Self {
        Self::with_rules(
            FALLBACK_RULES
                .iter()
                .map(|(name, terms)| (name.to_string(), terms.iter().map(|t| t.to_string()).collect())),
        )
    }
}

impl FallbackMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a matcher over a custom rule table.
    /// Terms go through the same normalization as the document text.
    pub fn with_rules<I>(rules: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let rules = rules
            .into_iter()
            .map(|(name, terms)| KeywordRule {
                name,
                terms: terms
                    .iter()
                    .map(|t| normalize(t).trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
            })
            .collect();
        Self { rules }
    }

    /// Names of every rule in the table
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name.as_str())
    }

    /// Rule names flagged as violated, in table order.
    pub fn violations(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let normalized = normalize(text);
        let violated: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let hits = rule
                    .terms
                    .iter()
                    .filter(|term| normalized.contains(term.as_str()))
                    .count();
                if hits > 0 {
                    debug!(rule = %rule.name, hits, "Fallback rule matched");
                    Some(rule.name.clone())
                } else {
                    None
                }
            })
            .collect();

        if violated.is_empty() {
            info!("Fallback matcher found no violations");
        } else {
            info!(violations = ?violated, "Fallback matcher flagged rules");
        }
        violated
    }
}
