//! Compliance rule evaluation and risk scoring
//!
//! [`ComplianceEngine`] ties the pieces together: rate gates, the remote
//! classifier with its keyword fallback, batch classification, risk scoring
//! and the action item lifecycle, all over a [`store::RecordStore`].

pub mod batch;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fallback;
pub mod lifecycle;
pub mod patterns;
pub mod rate_gate;
pub mod remote;
pub mod scoring;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared_types::{
    ActionItem, ActionStatus, ComplianceRule, Document, NewDocument, NewRule, OutcomeStatus,
    ParsedData, RuleOutcome,
};
use tracing::{info, instrument, warn};

pub use batch::{BatchClassification, BatchClassifier, GENERAL_COMPLIANCE};
pub use classifier::RuleClassifier;
pub use config::{BudgetConfig, ClassifierConfig, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use fallback::FallbackMatcher;
pub use lifecycle::{ActionItemLifecycle, CompletedAction, RemediationState};
pub use rate_gate::{Budget, Clock, ManualClock, RateGate, RateGates, SystemClock};
pub use remote::{ChatClient, RemoteError, RemoteReply, RetryPolicy};
pub use store::{MemoryStore, RecordStore, StoreError, StoreOp};

/// Everything produced by ingesting one document
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document: Document,
    pub outcomes: Vec<RuleOutcome>,
    pub risk_score: f64,
    pub action_items: Vec<ActionItem>,
}

/// Per-document dashboard row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub file_type: String,
    pub original_url: String,
    pub risk_score: f64,
    /// `pass` iff every stored outcome passed
    pub compliance_status: OutcomeStatus,
    pub violated_rules: Vec<String>,
    pub remediated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(document: &Document) -> Self {
        let compliance_status = if document.parsed_data.all_passed() {
            OutcomeStatus::Pass
        } else {
            OutcomeStatus::Fail
        };
        Self {
            id: document.id.clone(),
            title: document.title.clone(),
            file_type: document.file_type.clone(),
            original_url: document.original_url.clone(),
            risk_score: document.risk_score,
            compliance_status,
            violated_rules: document
                .parsed_data
                .failed()
                .map(|o| o.rule_name.clone())
                .collect(),
            remediated: document.parsed_data.remediated,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

/// Pending action item with its document's title
#[derive(Debug, Clone, Serialize)]
pub struct PendingAction {
    #[serde(flatten)]
    pub action: ActionItem,
    pub document_title: String,
}

/// ComplianceEngine entry point
pub struct ComplianceEngine {
    store: Arc<dyn RecordStore>,
    gates: Arc<RateGates>,
    classifier: RuleClassifier,
    batch: BatchClassifier,
    lifecycle: ActionItemLifecycle,
}

impl ComplianceEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn RecordStore>) -> EngineResult<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        let client = Arc::new(ChatClient::new(&config.classifier)?);
        let gates = Arc::new(RateGates::new(&config.budgets, clock));

        Ok(Self {
            classifier: RuleClassifier::new(
                client.clone(),
                gates.clone(),
                FallbackMatcher::new(),
                config.classifier.clone(),
            ),
            batch: BatchClassifier::new(
                client,
                gates.clone(),
                config.classifier,
                config.batch_concurrency,
            ),
            lifecycle: ActionItemLifecycle::new(store.clone()),
            gates,
            store,
        })
    }

    fn charge(&self, budget: Budget) -> EngineResult<()> {
        if self.gates.allow(budget) {
            Ok(())
        } else {
            warn!(%budget, "Budget exhausted");
            Err(EngineError::BudgetExhausted(budget))
        }
    }

    // ---- rule catalog ----

    #[instrument(skip(self, rule), fields(rule = %rule.name))]
    pub async fn add_rule(&self, rule: NewRule) -> EngineResult<ComplianceRule> {
        rule.validate()?;
        self.charge(Budget::RuleAddition)?;

        let rule = ComplianceRule::from_new(rule);
        if self.store.find_rule_by_name(&rule.name).await?.is_some() {
            return Err(EngineError::DuplicateRule(rule.name));
        }
        self.store.insert_rule(&rule).await.map_err(|e| match e {
            StoreError::Conflict(_) => EngineError::DuplicateRule(rule.name.clone()),
            other => other.into(),
        })?;

        info!(rule_id = %rule.id, severity = %rule.severity, "Rule added");
        Ok(rule)
    }

    pub async fn list_rules(&self) -> EngineResult<Vec<ComplianceRule>> {
        self.charge(Budget::RuleRead)?;
        Ok(self.store.list_rules().await?)
    }

    pub async fn rules_by_names(&self, names: &[String]) -> EngineResult<Vec<ComplianceRule>> {
        if names.is_empty() {
            return Err(EngineError::InvalidInput("no rule names given".to_string()));
        }
        self.charge(Budget::RuleReadByNames)?;
        Ok(self.store.find_rules_by_names(names).await?)
    }

    // ---- classification and scoring ----

    /// One outcome per catalog rule, in catalog order.
    pub async fn classify(
        &self,
        text: &str,
        catalog: &[ComplianceRule],
    ) -> EngineResult<Vec<RuleOutcome>> {
        self.classifier.classify(text, catalog).await
    }

    /// Deep evaluation of one stored document against one rule.
    pub async fn evaluate_rule(&self, document_id: &str, rule_name: &str) -> EngineResult<RuleOutcome> {
        let document = self.store.get_document(document_id).await?;
        let rule = self
            .store
            .find_rule_by_name(rule_name)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "rule",
                id: rule_name.to_string(),
            })?;
        self.classifier.evaluate_rule(&document.ocr_text, &rule).await
    }

    /// Batch classification against the stored catalog.
    pub async fn classify_batch(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> EngineResult<BatchClassification> {
        let catalog = self.store.list_rules().await?;
        self.batch.classify(texts, batch_size, &catalog).await
    }

    pub fn score(&self, outcomes: &[RuleOutcome], catalog: &[ComplianceRule]) -> EngineResult<f64> {
        self.charge(Budget::RiskScore)?;
        Ok(scoring::risk_score(outcomes, catalog))
    }

    // ---- documents ----

    /// Classify, score and persist a document, then open action items for
    /// every failed rule.
    #[instrument(skip(self, new), fields(title = %new.title))]
    pub async fn ingest(&self, new: NewDocument) -> EngineResult<IngestReport> {
        let catalog = self.list_rules().await?;
        let outcomes = if catalog.is_empty() {
            warn!("Rule catalog is empty, document stored without outcomes");
            Vec::new()
        } else {
            self.classify(&new.ocr_text, &catalog).await?
        };
        let risk_score = self.score(&outcomes, &catalog)?;

        let now = Utc::now();
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title,
            file_type: new.file_type,
            original_url: new.original_url,
            ocr_text: new.ocr_text,
            parsed_data: ParsedData::new(outcomes.clone()),
            risk_score,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_document(&document).await?;

        let action_items = self
            .materialize_actions(&document.id, &outcomes)
            .await
            .inspect_err(|e| {
                warn!(
                    document_id = %document.id,
                    error = %e,
                    "Document stored but action items incomplete, re-run materialize_actions"
                );
            })?;
        info!(
            document_id = %document.id,
            risk_score,
            actions = action_items.len(),
            "Document ingested"
        );

        Ok(IngestReport {
            document,
            outcomes,
            risk_score,
            action_items,
        })
    }

    pub async fn document_summaries(&self) -> EngineResult<Vec<DocumentSummary>> {
        let documents = self.store.list_documents().await?;
        Ok(documents.iter().map(DocumentSummary::from).collect())
    }

    // ---- action items ----

    pub async fn materialize_actions(
        &self,
        document_id: &str,
        outcomes: &[RuleOutcome],
    ) -> EngineResult<Vec<ActionItem>> {
        self.lifecycle.materialize(document_id, outcomes).await
    }

    pub async fn complete_action(&self, action_id: &str) -> EngineResult<CompletedAction> {
        self.lifecycle.complete(action_id).await
    }

    pub async fn assign_action(&self, action_id: &str, assignee: &str) -> EngineResult<ActionItem> {
        self.lifecycle.assign(action_id, assignee).await
    }

    pub async fn pending_actions(&self) -> EngineResult<Vec<ActionItem>> {
        Ok(self.store.list_action_items(ActionStatus::Pending).await?)
    }

    pub async fn pending_actions_with_titles(&self) -> EngineResult<Vec<PendingAction>> {
        let mut joined = Vec::new();
        for action in self.pending_actions().await? {
            match self.store.get_document(&action.document_id).await {
                Ok(document) => joined.push(PendingAction {
                    action,
                    document_title: document.title,
                }),
                Err(StoreError::NotFound { .. }) => {
                    warn!(action_id = %action.id, document_id = %action.document_id, "Action item document missing, skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shared_types::{Priority, Severity};

    /// Engine with a credential but no classifier budget, so classification
    /// always takes the keyword fallback.
    fn offline_engine(store: Arc<MemoryStore>) -> ComplianceEngine {
        let mut config = EngineConfig::default();
        config.classifier.api_key = Some("test-key".to_string());
        config.classifier.base_url = "http://127.0.0.1:9".to_string();
        config.budgets.classifier_calls = 0;
        ComplianceEngine::new(config, store).unwrap()
    }

    fn nda_rule() -> NewRule {
        NewRule {
            name: "NDA Check".to_string(),
            description: "Document must be covered by an NDA".to_string(),
            pattern: "(?i)nda".to_string(),
            severity: Severity::High,
        }
    }

    #[tokio::test]
    async fn test_nda_document_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let engine = offline_engine(store.clone());
        engine.add_rule(nda_rule()).await.unwrap();

        let report = engine
            .ingest(NewDocument::from_url(
                "https://files.example.com/docs/contract.pdf",
                "This non-disclosure agreement binds both parties.",
            ))
            .await
            .unwrap();

        assert_eq!(report.risk_score, 3.0);
        assert_eq!(report.action_items.len(), 1);
        assert_eq!(report.action_items[0].priority, Priority::High);
        assert_eq!(report.action_items[0].status, ActionStatus::Pending);
        assert_eq!(report.document.title, "contract");

        let summaries = engine.document_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].compliance_status, OutcomeStatus::Fail);
        assert_eq!(summaries[0].violated_rules, vec!["NDA Check"]);

        let pending = engine.pending_actions_with_titles().await.unwrap();
        assert_eq!(pending[0].document_title, "contract");

        engine.complete_action(&report.action_items[0].id).await.unwrap();
        assert!(engine.pending_actions().await.unwrap().is_empty());
        let summaries = engine.document_summaries().await.unwrap();
        assert!(summaries[0].remediated);
    }

    #[tokio::test]
    async fn test_duplicate_rule_is_rejected() {
        let engine = offline_engine(Arc::new(MemoryStore::new()));
        engine.add_rule(nda_rule()).await.unwrap();
        let err = engine.add_rule(nda_rule()).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateRule(name) if name == "NDA Check"));
    }

    #[tokio::test]
    async fn test_invalid_rule_is_rejected() {
        let engine = offline_engine(Arc::new(MemoryStore::new()));
        let mut rule = nda_rule();
        rule.severity = Severity::Unrecognized("urgent".to_string());
        assert!(matches!(
            engine.add_rule(rule).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_rule_budget_denial_is_reported() {
        let mut config = EngineConfig::default();
        config.budgets.rule_operations = 1;
        let engine = ComplianceEngine::new(config, Arc::new(MemoryStore::new())).unwrap();

        engine.list_rules().await.unwrap();
        assert!(matches!(
            engine.list_rules().await,
            Err(EngineError::BudgetExhausted(Budget::RuleRead))
        ));
        // Separate key on the same gate
        assert!(engine.score(&[], &[]).is_ok());
        assert!(matches!(
            engine.score(&[], &[]),
            Err(EngineError::BudgetExhausted(Budget::RiskScore))
        ));
    }

    #[tokio::test]
    async fn test_ingest_charges_rule_read_budget() {
        let mut config = EngineConfig::default();
        config.classifier.api_key = Some("test-key".to_string());
        config.budgets.classifier_calls = 0;
        config.budgets.rule_operations = 1;
        let store = Arc::new(MemoryStore::new());
        let engine = ComplianceEngine::new(config, store.clone()).unwrap();

        engine
            .ingest(NewDocument::from_url("a.txt", "text"))
            .await
            .unwrap();
        assert!(matches!(
            engine.ingest(NewDocument::from_url("b.txt", "text")).await,
            Err(EngineError::BudgetExhausted(Budget::RuleRead))
        ));
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_failure_after_store_can_be_redriven() {
        let store = Arc::new(MemoryStore::new());
        let engine = offline_engine(store.clone());
        engine.add_rule(nda_rule()).await.unwrap();

        store.inject_fault(StoreOp::InsertRuleResult).await;
        let err = engine
            .ingest(NewDocument::from_url("nda.txt", "non-disclosure agreement"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));

        store.clear_faults().await;
        let documents = store.list_documents().await.unwrap();
        assert_eq!(documents.len(), 1);
        let document = &documents[0];
        engine
            .materialize_actions(&document.id, &document.parsed_data.outcomes)
            .await
            .unwrap();

        let pending = engine.pending_actions().await.unwrap();
        assert_eq!(pending.len(), 1);
        let done = engine.complete_action(&pending[0].id).await.unwrap();
        assert!(done.document.parsed_data.remediated);
    }

    #[tokio::test]
    async fn test_ingest_with_empty_catalog() {
        let engine = offline_engine(Arc::new(MemoryStore::new()));
        let report = engine
            .ingest(NewDocument::from_url("memo.txt", "non-disclosure"))
            .await
            .unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(report.risk_score, 0.0);
        assert!(report.action_items.is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_rule_unknown_rule() {
        let engine = offline_engine(Arc::new(MemoryStore::new()));
        engine.add_rule(nda_rule()).await.unwrap();
        let report = engine
            .ingest(NewDocument::from_url("a.pdf", "text"))
            .await
            .unwrap();

        let err = engine
            .evaluate_rule(&report.document.id, "Missing Rule")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "rule", .. }));
    }

    #[tokio::test]
    async fn test_rules_by_names() {
        let engine = offline_engine(Arc::new(MemoryStore::new()));
        engine.add_rule(nda_rule()).await.unwrap();
        let found = engine
            .rules_by_names(&["NDA Check".to_string(), "Other".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(matches!(
            engine.rules_by_names(&[]).await,
            Err(EngineError::InvalidInput(_))
        ));
    }
}
