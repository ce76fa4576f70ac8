//! Persistence interface for rules, documents, rule results and action items
//!
//! The engine only talks to [`RecordStore`]. [`MemoryStore`] backs tests and
//! embedded use; the API server provides a SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{
    ActionItem, ActionStatus, ComplianceRule, Document, DocumentRuleResult, ParsedData,
};
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    // Rules
    async fn insert_rule(&self, rule: &ComplianceRule) -> StoreResult<()>;
    async fn list_rules(&self) -> StoreResult<Vec<ComplianceRule>>;
    async fn find_rule_by_name(&self, name: &str) -> StoreResult<Option<ComplianceRule>>;
    async fn find_rules_by_names(&self, names: &[String]) -> StoreResult<Vec<ComplianceRule>>;
    /// Removes the rule and every rule result and action item that references it
    async fn delete_rule(&self, id: &str) -> StoreResult<()>;

    // Documents
    async fn insert_document(&self, document: &Document) -> StoreResult<()>;
    async fn get_document(&self, id: &str) -> StoreResult<Document>;
    async fn list_documents(&self) -> StoreResult<Vec<Document>>;
    async fn update_document_parsed_data(
        &self,
        id: &str,
        parsed_data: &ParsedData,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    /// Removes the document and its rule results and action items
    async fn delete_document(&self, id: &str) -> StoreResult<()>;

    // Rule results
    async fn insert_rule_result(&self, result: &DocumentRuleResult) -> StoreResult<()>;
    async fn find_rule_result(
        &self,
        document_id: &str,
        rule_id: &str,
    ) -> StoreResult<Option<DocumentRuleResult>>;
    async fn update_rule_result(&self, result: &DocumentRuleResult) -> StoreResult<()>;

    // Action items
    async fn insert_action_item(&self, item: &ActionItem) -> StoreResult<()>;
    async fn get_action_item(&self, id: &str) -> StoreResult<ActionItem>;
    async fn find_action_item(
        &self,
        document_id: &str,
        rule_id: &str,
    ) -> StoreResult<Option<ActionItem>>;
    async fn list_action_items(&self, status: ActionStatus) -> StoreResult<Vec<ActionItem>>;
    /// Set the assignee only; the status column is left as stored.
    async fn assign_action_item(
        &self,
        id: &str,
        assignee: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<ActionItem>;
    /// Atomically move a pending item to completed.
    ///
    /// Returns `None` when the item exists but is no longer pending.
    async fn complete_action_item(
        &self,
        id: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Option<ActionItem>>;
}

/// Store operations that can be made to fail in [`MemoryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertActionItem,
    InsertRuleResult,
    UpdateActionItem,
    UpdateRuleResult,
    UpdateDocument,
}

#[derive(Debug, Default)]
struct Tables {
    rules: Vec<ComplianceRule>,
    documents: Vec<Document>,
    results: Vec<DocumentRuleResult>,
    actions: Vec<ActionItem>,
}

/// In-process store with optional fault injection
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: RwLock<HashSet<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `op` fail with a backend error.
    pub async fn inject_fault(&self, op: StoreOp) {
        self.faults.write().await.insert(op);
    }

    pub async fn clear_faults(&self) {
        self.faults.write().await.clear();
    }

    async fn check(&self, op: StoreOp) -> StoreResult<()> {
        if self.faults.read().await.contains(&op) {
            return Err(StoreError::Backend(format!("injected failure on {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_rule(&self, rule: &ComplianceRule) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.rules.iter().any(|r| r.name == rule.name) {
            return Err(StoreError::Conflict(format!("rule name {}", rule.name)));
        }
        tables.rules.push(rule.clone());
        Ok(())
    }

    async fn list_rules(&self) -> StoreResult<Vec<ComplianceRule>> {
        Ok(self.tables.read().await.rules.clone())
    }

    async fn find_rule_by_name(&self, name: &str) -> StoreResult<Option<ComplianceRule>> {
        let tables = self.tables.read().await;
        Ok(tables.rules.iter().find(|r| r.name == name).cloned())
    }

    async fn find_rules_by_names(&self, names: &[String]) -> StoreResult<Vec<ComplianceRule>> {
        let tables = self.tables.read().await;
        Ok(tables
            .rules
            .iter()
            .filter(|r| names.contains(&r.name))
            .cloned()
            .collect())
    }

    async fn delete_rule(&self, id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let before = tables.rules.len();
        tables.rules.retain(|r| r.id != id);
        if tables.rules.len() == before {
            return Err(StoreError::not_found("rule", id));
        }
        tables.results.retain(|r| r.rule_id != id);
        tables.actions.retain(|a| a.rule_id != id);
        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.documents.iter().any(|d| d.id == document.id) {
            return Err(StoreError::Conflict(format!("document {}", document.id)));
        }
        tables.documents.push(document.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Document> {
        let tables = self.tables.read().await;
        tables
            .documents
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("document", id))
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        Ok(self.tables.read().await.documents.clone())
    }

    async fn update_document_parsed_data(
        &self,
        id: &str,
        parsed_data: &ParsedData,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.check(StoreOp::UpdateDocument).await?;
        let mut tables = self.tables.write().await;
        let document = tables
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::not_found("document", id))?;
        document.parsed_data = parsed_data.clone();
        document.updated_at = updated_at;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let before = tables.documents.len();
        tables.documents.retain(|d| d.id != id);
        if tables.documents.len() == before {
            return Err(StoreError::not_found("document", id));
        }
        tables.results.retain(|r| r.document_id != id);
        tables.actions.retain(|a| a.document_id != id);
        Ok(())
    }

    async fn insert_rule_result(&self, result: &DocumentRuleResult) -> StoreResult<()> {
        self.check(StoreOp::InsertRuleResult).await?;
        self.tables.write().await.results.push(result.clone());
        Ok(())
    }

    async fn find_rule_result(
        &self,
        document_id: &str,
        rule_id: &str,
    ) -> StoreResult<Option<DocumentRuleResult>> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .iter()
            .find(|r| r.document_id == document_id && r.rule_id == rule_id)
            .cloned())
    }

    async fn update_rule_result(&self, result: &DocumentRuleResult) -> StoreResult<()> {
        self.check(StoreOp::UpdateRuleResult).await?;
        let mut tables = self.tables.write().await;
        let existing = tables
            .results
            .iter_mut()
            .find(|r| r.id == result.id)
            .ok_or_else(|| StoreError::not_found("document rule result", &result.id))?;
        *existing = result.clone();
        Ok(())
    }

    async fn insert_action_item(&self, item: &ActionItem) -> StoreResult<()> {
        self.check(StoreOp::InsertActionItem).await?;
        self.tables.write().await.actions.push(item.clone());
        Ok(())
    }

    async fn get_action_item(&self, id: &str) -> StoreResult<ActionItem> {
        let tables = self.tables.read().await;
        tables
            .actions
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("action item", id))
    }

    async fn find_action_item(
        &self,
        document_id: &str,
        rule_id: &str,
    ) -> StoreResult<Option<ActionItem>> {
        let tables = self.tables.read().await;
        Ok(tables
            .actions
            .iter()
            .find(|a| a.document_id == document_id && a.rule_id == rule_id)
            .cloned())
    }

    async fn list_action_items(&self, status: ActionStatus) -> StoreResult<Vec<ActionItem>> {
        let tables = self.tables.read().await;
        Ok(tables
            .actions
            .iter()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn assign_action_item(
        &self,
        id: &str,
        assignee: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<ActionItem> {
        self.check(StoreOp::UpdateActionItem).await?;
        let mut tables = self.tables.write().await;
        let item = tables
            .actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::not_found("action item", id))?;
        item.assigned_to = Some(assignee.to_string());
        item.updated_at = updated_at;
        Ok(item.clone())
    }

    async fn complete_action_item(
        &self,
        id: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Option<ActionItem>> {
        self.check(StoreOp::UpdateActionItem).await?;
        let mut tables = self.tables.write().await;
        let item = tables
            .actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::not_found("action item", id))?;
        if item.status != ActionStatus::Pending {
            return Ok(None);
        }
        item.status = ActionStatus::Completed;
        item.updated_at = updated_at;
        Ok(Some(item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{NewRule, Priority, ResultStatus, Severity};

    fn rule(name: &str) -> ComplianceRule {
        ComplianceRule::from_new(NewRule {
            name: name.to_string(),
            description: String::new(),
            pattern: String::new(),
            severity: Severity::High,
        })
    }

    fn document(id: &str) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            title: "lease".to_string(),
            file_type: "pdf".to_string(),
            original_url: String::new(),
            ocr_text: String::new(),
            parsed_data: ParsedData::default(),
            risk_score: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    fn action(document_id: &str, rule_id: &str) -> ActionItem {
        let now = Utc::now();
        ActionItem {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            rule_id: rule_id.to_string(),
            description: String::new(),
            assigned_to: None,
            status: ActionStatus::Pending,
            priority: Priority::High,
            due_date: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_rule_name_conflicts() {
        let store = MemoryStore::new();
        store.insert_rule(&rule("NDA Check")).await.unwrap();
        let err = store.insert_rule(&rule("NDA Check")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_rules_by_names() {
        let store = MemoryStore::new();
        store.insert_rule(&rule("A")).await.unwrap();
        store.insert_rule(&rule("B")).await.unwrap();
        let found = store
            .find_rules_by_names(&["B".to_string(), "Z".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "B");
    }

    #[tokio::test]
    async fn test_delete_document_cascades() {
        let store = MemoryStore::new();
        let r = rule("A");
        store.insert_rule(&r).await.unwrap();
        store.insert_document(&document("d1")).await.unwrap();
        store.insert_action_item(&action("d1", &r.id)).await.unwrap();
        store
            .insert_rule_result(&DocumentRuleResult {
                id: "res".to_string(),
                document_id: "d1".to_string(),
                rule_id: r.id.clone(),
                status: ResultStatus::Fail,
                details: serde_json::json!({}),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        store.delete_document("d1").await.unwrap();
        assert!(store.find_action_item("d1", &r.id).await.unwrap().is_none());
        assert!(store.find_rule_result("d1", &r.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let store = MemoryStore::new();
        store.inject_fault(StoreOp::InsertActionItem).await;
        let err = store.insert_action_item(&action("d", "r")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        store.clear_faults().await;
        store.insert_action_item(&action("d", "r")).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_document("nope").await.unwrap_err();
        assert_eq!(err, StoreError::not_found("document", "nope"));
    }

    #[tokio::test]
    async fn test_complete_action_item_only_from_pending() {
        let store = MemoryStore::new();
        let item = action("d", "r");
        store.insert_action_item(&item).await.unwrap();

        let done = store.complete_action_item(&item.id, Utc::now()).await.unwrap();
        assert_eq!(done.map(|a| a.status), Some(ActionStatus::Completed));
        assert!(store
            .complete_action_item(&item.id, Utc::now())
            .await
            .unwrap()
            .is_none());

        let err = store.complete_action_item("nope", Utc::now()).await.unwrap_err();
        assert_eq!(err, StoreError::not_found("action item", "nope"));
    }

    #[tokio::test]
    async fn test_assign_keeps_status() {
        let store = MemoryStore::new();
        let item = action("d", "r");
        store.insert_action_item(&item).await.unwrap();
        store.complete_action_item(&item.id, Utc::now()).await.unwrap();

        let assigned = store
            .assign_action_item(&item.id, "legal@example.com", Utc::now())
            .await
            .unwrap();
        assert_eq!(assigned.status, ActionStatus::Completed);
        assert_eq!(assigned.assigned_to.as_deref(), Some("legal@example.com"));
    }
}
