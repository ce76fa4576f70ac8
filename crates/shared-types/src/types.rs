//! Compliance rules and per-rule outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rule severity as stored in the catalog.
///
/// Stored rows are free text, so anything outside `low`/`medium`/`high`
/// survives a round trip as [`Severity::Unrecognized`] instead of failing
/// to decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Low,
    Medium,
    High,
    Unrecognized(String),
}

impl Severity {
    /// Case-insensitive parse; unknown values are kept verbatim.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            _ => Severity::Unrecognized(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Unrecognized(raw) => raw,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Severity::Unrecognized(_))
    }

    /// Action item priority derived from this severity.
    /// Unrecognised severities are treated as low.
    pub fn priority(&self) -> Priority {
        match self {
            Severity::High => Priority::High,
            Severity::Medium => Priority::Medium,
            Severity::Low | Severity::Unrecognized(_) => Priority::Low,
        }
    }
}

impl From<String> for Severity {
    fn from(raw: String) -> Self {
        Severity::parse(&raw)
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.as_str().to_string()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation priority, title-cased on the wire ("High", "Medium", "Low")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(ValidationError::UnknownValue {
                field: "priority",
                value: s.to_string(),
            }),
        }
    }
}

/// A compliance rule from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub id: String,
    /// Unique, human-readable; outcomes reference rules by this name
    pub name: String,
    pub description: String,
    /// Regular expression or keyword, depending on the rule
    pub pattern: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

impl ComplianceRule {
    /// Build a catalog entry from an administrative request.
    pub fn from_new(new: NewRule) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            description: new.description,
            pattern: new.pattern,
            severity: new.severity,
            created_at: Utc::now(),
        }
    }
}

/// Request to add a rule to the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pattern: String,
    pub severity: Severity,
}

impl NewRule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if !self.severity.is_recognized() {
            return Err(ValidationError::UnknownValue {
                field: "severity",
                value: self.severity.to_string(),
            });
        }
        Ok(())
    }
}

/// Pass/fail judgment for one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Pass,
    Fail,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pass => "pass",
            OutcomeStatus::Fail => "fail",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one rule against one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_name: String,
    pub status: OutcomeStatus,
    pub severity: Severity,
    pub explanation: String,
}

impl RuleOutcome {
    pub fn pass(rule: &ComplianceRule) -> Self {
        Self {
            rule_name: rule.name.clone(),
            status: OutcomeStatus::Pass,
            severity: rule.severity.clone(),
            explanation: format!("The document complies with the '{}' rule.", rule.name),
        }
    }

    pub fn fail(rule: &ComplianceRule) -> Self {
        Self {
            rule_name: rule.name.clone(),
            status: OutcomeStatus::Fail,
            severity: rule.severity.clone(),
            explanation: format!(
                "The document violates the '{}' rule: does not meet the required pattern '{}'.",
                rule.name, rule.pattern
            ),
        }
    }

    pub fn is_fail(&self) -> bool {
        self.status == OutcomeStatus::Fail
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rule(name: &str, severity: Severity) -> ComplianceRule {
        ComplianceRule::from_new(NewRule {
            name: name.to_string(),
            description: "test".to_string(),
            pattern: "(?i)nda".to_string(),
            severity,
        })
    }

    #[test]
    fn test_severity_parse_is_case_insensitive() {
        assert_eq!(Severity::parse("HIGH"), Severity::High);
        assert_eq!(Severity::parse(" medium "), Severity::Medium);
        assert_eq!(Severity::parse("low"), Severity::Low);
        assert_eq!(
            Severity::parse("critical"),
            Severity::Unrecognized("critical".to_string())
        );
    }

    #[test]
    fn test_severity_roundtrips_unknown_values() {
        let json = serde_json::to_string(&Severity::Unrecognized("urgent".into())).unwrap();
        assert_eq!(json, "\"urgent\"");
        let back: Severity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Severity::Unrecognized("urgent".into()));
    }

    #[test]
    fn test_priority_from_severity() {
        assert_eq!(Severity::High.priority(), Priority::High);
        assert_eq!(Severity::Medium.priority(), Priority::Medium);
        assert_eq!(Severity::Low.priority(), Priority::Low);
        assert_eq!(Severity::parse("bogus").priority(), Priority::Low);
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"High\"");
    }

    #[test]
    fn test_new_rule_validation() {
        let mut new = NewRule {
            name: "  ".into(),
            description: String::new(),
            pattern: String::new(),
            severity: Severity::High,
        };
        assert_eq!(new.validate(), Err(ValidationError::MissingField("name")));

        new.name = "NDA Check".into();
        assert!(new.validate().is_ok());

        new.severity = Severity::parse("severe");
        assert!(matches!(
            new.validate(),
            Err(ValidationError::UnknownValue { field: "severity", .. })
        ));
    }

    #[test]
    fn test_outcome_constructors() {
        let r = rule("NDA Check", Severity::High);
        let fail = RuleOutcome::fail(&r);
        assert!(fail.is_fail());
        assert_eq!(fail.severity, Severity::High);
        assert!(fail.explanation.contains("(?i)nda"));

        let pass = RuleOutcome::pass(&r);
        assert!(!pass.is_fail());
        assert_eq!(
            pass.explanation,
            "The document complies with the 'NDA Check' rule."
        );
    }

    #[test]
    fn test_outcome_wire_shape() {
        let r = rule("NDA Check", Severity::High);
        let value = serde_json::to_value(RuleOutcome::fail(&r)).unwrap();
        assert_eq!(value["rule_name"], "NDA Check");
        assert_eq!(value["status"], "fail");
        assert_eq!(value["severity"], "high");
    }
}
