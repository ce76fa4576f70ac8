pub mod records;
pub mod types;

pub use records::{
    ActionItem, ActionStatus, Document, DocumentRuleResult, NewDocument, ParsedData, ResultStatus,
};
pub use types::{
    ComplianceRule, NewRule, OutcomeStatus, Priority, RuleOutcome, Severity, ValidationError,
};
