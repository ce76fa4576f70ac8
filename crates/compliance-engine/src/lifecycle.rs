//! Remediation action items derived from failed rule outcomes
//!
//! Each (document, rule) pair moves through [`RemediationState`]:
//! `NoAction -> Pending` when a failed outcome is materialized, and
//! `Pending -> Completed` when an operator closes the item. Completion touches
//! three records in order (action item, rule result, document) and stops at
//! the first failure. Earlier writes are not rolled back.

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use shared_types::{
    ActionItem, ActionStatus, Document, DocumentRuleResult, ResultStatus, RuleOutcome,
};
use tracing::{info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::store::RecordStore;

/// Remediation state of one (document, rule) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationState {
    NoAction,
    Pending,
    Completed,
}

impl RemediationState {
    /// Legal successors. Completed is terminal.
    pub fn next_states(&self) -> &'static [RemediationState] {
        match self {
            RemediationState::NoAction => &[RemediationState::Pending],
            RemediationState::Pending => &[RemediationState::Completed],
            RemediationState::Completed => &[],
        }
    }

    pub fn can_transition_to(&self, to: RemediationState) -> bool {
        self.next_states().contains(&to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationState::NoAction => "no_action",
            RemediationState::Pending => "pending",
            RemediationState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RemediationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ActionStatus> for RemediationState {
    fn from(status: ActionStatus) -> Self {
        match status {
            ActionStatus::Pending => RemediationState::Pending,
            ActionStatus::Completed => RemediationState::Completed,
        }
    }
}

/// Records touched by a completion
#[derive(Debug, Clone, Serialize)]
pub struct CompletedAction {
    pub action: ActionItem,
    pub result: DocumentRuleResult,
    pub document: Document,
}

/// Explanation merged into a rule result's details once it is resolved
pub const RESOLVED_EXPLANATION: &str = "No issues";

pub struct ActionItemLifecycle {
    store: Arc<dyn RecordStore>,
}

impl ActionItemLifecycle {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Create one action item and one rule result per failed outcome.
    ///
    /// Outcomes are processed in order. An outcome naming a rule that is not
    /// in the catalog, or a pair that already has both records, is skipped
    /// with a warning. A pair with an action item but no rule result gets the
    /// missing result, so a pass aborted between the two writes can be re-run.
    /// A failed write aborts the pass.
    #[instrument(skip(self, outcomes), fields(outcomes = outcomes.len()))]
    pub async fn materialize(
        &self,
        document_id: &str,
        outcomes: &[RuleOutcome],
    ) -> EngineResult<Vec<ActionItem>> {
        let mut created = Vec::new();

        for outcome in outcomes.iter().filter(|o| o.is_fail()) {
            let Some(rule) = self.store.find_rule_by_name(&outcome.rule_name).await? else {
                warn!(rule = %outcome.rule_name, "Failed rule not in catalog, no action item");
                continue;
            };

            let existing_item = self.store.find_action_item(document_id, &rule.id).await?;
            let has_result = self
                .store
                .find_rule_result(document_id, &rule.id)
                .await?
                .is_some();

            if let Some(item) = existing_item {
                if has_result {
                    warn!(rule = %rule.name, "Action item already exists for this document and rule");
                } else {
                    // An earlier pass stored the item but not its result
                    self.insert_result(document_id, &rule.id, outcome).await?;
                    info!(action_id = %item.id, rule = %rule.name, "Missing rule result restored");
                }
                continue;
            }

            let now = Utc::now();
            let due_date = now.checked_add_months(Months::new(1)).ok_or_else(|| {
                EngineError::InvalidInput(format!("due date out of range for {now}"))
            })?;

            let item = ActionItem {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                rule_id: rule.id.clone(),
                description: format!(
                    "Address {} non-compliance: {}",
                    outcome.rule_name, outcome.explanation
                ),
                assigned_to: None,
                status: ActionStatus::Pending,
                priority: outcome.severity.priority(),
                due_date,
                created_at: now,
                updated_at: now,
            };
            self.store.insert_action_item(&item).await?;

            if !has_result {
                self.insert_result(document_id, &rule.id, outcome).await?;
            }

            info!(action_id = %item.id, rule = %rule.name, priority = %item.priority, "Action item created");
            created.push(item);
        }

        Ok(created)
    }

    async fn insert_result(
        &self,
        document_id: &str,
        rule_id: &str,
        outcome: &RuleOutcome,
    ) -> EngineResult<()> {
        let result = DocumentRuleResult {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            rule_id: rule_id.to_string(),
            status: ResultStatus::Fail,
            details: serde_json::to_value(outcome)?,
            created_at: Utc::now(),
        };
        self.store.insert_rule_result(&result).await?;
        Ok(())
    }

    /// Close a pending action item and propagate the resolution.
    ///
    /// The pending check and the status write are one store operation, so of
    /// two concurrent completions exactly one succeeds.
    #[instrument(skip(self))]
    pub async fn complete(&self, action_id: &str) -> EngineResult<CompletedAction> {
        let now = Utc::now();
        let Some(action) = self.store.complete_action_item(action_id, now).await? else {
            let current = self.store.get_action_item(action_id).await?;
            let state = RemediationState::from(current.status);
            return Err(EngineError::NotPending {
                id: action_id.to_string(),
                state,
            });
        };

        let (result, document) = self
            .resolve_completed(&action, now)
            .await
            .inspect_err(|e| {
                warn!(action_id, error = %e, "Action item completed but remediation not fully recorded");
            })?;

        info!(action_id, document_id = %document.id, "Action item completed");
        Ok(CompletedAction {
            action,
            result,
            document,
        })
    }

    // Steps 2 and 3 of completion: resolve the rule result, then flag the document.
    async fn resolve_completed(
        &self,
        action: &ActionItem,
        now: DateTime<Utc>,
    ) -> EngineResult<(DocumentRuleResult, Document)> {
        let mut result = self
            .store
            .find_rule_result(&action.document_id, &action.rule_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "document rule result",
                id: format!("{}/{}", action.document_id, action.rule_id),
            })?;
        result.status = ResultStatus::Resolved;
        mark_resolved(&mut result.details);
        self.store.update_rule_result(&result).await?;

        let mut document = self.store.get_document(&action.document_id).await?;
        document.parsed_data.remediated = true;
        document.updated_at = now;
        self.store
            .update_document_parsed_data(&document.id, &document.parsed_data, now)
            .await?;

        Ok((result, document))
    }

    pub async fn assign(&self, action_id: &str, assignee: &str) -> EngineResult<ActionItem> {
        let assignee = assignee.trim();
        if assignee.is_empty() {
            return Err(EngineError::InvalidInput("assignee is empty".to_string()));
        }

        let action = self
            .store
            .assign_action_item(action_id, assignee, Utc::now())
            .await?;

        info!(action_id, assignee, "Action item assigned");
        Ok(action)
    }
}

/// Merge the resolution marker into the details object, replacing non-objects.
fn mark_resolved(details: &mut serde_json::Value) {
    let marker = serde_json::Value::String(RESOLVED_EXPLANATION.to_string());
    match details {
        serde_json::Value::Object(map) => {
            map.insert("explanation".to_string(), marker);
        }
        other => {
            *other = serde_json::json!({ "explanation": marker });
        }
    }
}
