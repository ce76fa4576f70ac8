//! Severity-weighted risk scoring

use std::collections::HashMap;

use shared_types::{ComplianceRule, RuleOutcome, Severity};
use tracing::{debug, warn};

/// Weight of a failed rule by severity. `None` for unrecognized severities.
pub fn severity_weight(severity: &Severity) -> Option<f64> {
    match severity {
        Severity::High => Some(3.0),
        Severity::Medium => Some(2.0),
        Severity::Low => Some(1.0),
        Severity::Unrecognized(_) => None,
    }
}

/// Weight applied when a catalog rule carries an unrecognized severity
pub const UNRECOGNIZED_WEIGHT: f64 = 1.0;

/// Sum of severity weights over failed outcomes.
///
/// Severity is taken from the catalog, not from the outcome. Outcomes naming
/// a rule that is not in the catalog contribute nothing.
pub fn risk_score(outcomes: &[RuleOutcome], catalog: &[ComplianceRule]) -> f64 {
    let by_name: HashMap<&str, &ComplianceRule> =
        catalog.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut score = 0.0;
    for outcome in outcomes.iter().filter(|o| o.is_fail()) {
        let Some(rule) = by_name.get(outcome.rule_name.as_str()) else {
            warn!(rule = %outcome.rule_name, "Failed rule not in catalog, not scored");
            continue;
        };
        let weight = severity_weight(&rule.severity).unwrap_or_else(|| {
            warn!(
                rule = %rule.name,
                severity = %rule.severity,
                "Unrecognized severity, scoring as low"
            );
            UNRECOGNIZED_WEIGHT
        });
        score += weight;
    }

    debug!(score, outcomes = outcomes.len(), "Risk score computed");
    score
}
