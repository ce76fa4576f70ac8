//! SQLite implementation of the engine's record store

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compliance_engine::store::{RecordStore, StoreError, StoreResult};
use shared_types::{
    ActionItem, ActionStatus, ComplianceRule, Document, DocumentRuleResult, ParsedData, Priority,
    ResultStatus, Severity,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the schema if it does not exist yet.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        tracing::info!("Connecting to database: {}", database_url);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
        tracing::info!("Running database migrations...");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS compliance_rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                pattern TEXT NOT NULL DEFAULT '',
                severity TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                file_type TEXT NOT NULL DEFAULT '',
                original_url TEXT NOT NULL DEFAULT '',
                ocr_text TEXT NOT NULL DEFAULT '',
                parsed_data TEXT NOT NULL DEFAULT '[]',
                risk_score REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS document_rule_results (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                rule_id TEXT NOT NULL REFERENCES compliance_rules(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS action_items (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                rule_id TEXT NOT NULL REFERENCES compliance_rules(id) ON DELETE CASCADE,
                description TEXT NOT NULL,
                assigned_to TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL,
                due_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_results_pair ON document_rule_results(document_id, rule_id)",
            "CREATE INDEX IF NOT EXISTS idx_actions_pair ON action_items(document_id, rule_id)",
            "CREATE INDEX IF NOT EXISTS idx_actions_status ON action_items(status)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(pool).await?;
        }

        tracing::info!("Migrations complete");
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn corrupt(field: &str, value: &str) -> StoreError {
    StoreError::Backend(format!("unreadable {field} in stored row: {value}"))
}

// ---- row types ----

#[derive(Debug, FromRow)]
struct DbRule {
    id: String,
    name: String,
    description: String,
    pattern: String,
    severity: String,
    created_at: DateTime<Utc>,
}

impl From<DbRule> for ComplianceRule {
    fn from(row: DbRule) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            pattern: row.pattern,
            severity: Severity::parse(&row.severity),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct DbDocument {
    id: String,
    title: String,
    file_type: String,
    original_url: String,
    ocr_text: String,
    parsed_data: String,
    risk_score: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DbDocument> for Document {
    type Error = StoreError;

    fn try_from(row: DbDocument) -> Result<Self, Self::Error> {
        let parsed_data: ParsedData = serde_json::from_str(&row.parsed_data)
            .map_err(|e| corrupt("parsed_data", &e.to_string()))?;
        Ok(Self {
            id: row.id,
            title: row.title,
            file_type: row.file_type,
            original_url: row.original_url,
            ocr_text: row.ocr_text,
            parsed_data,
            risk_score: row.risk_score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DbRuleResult {
    id: String,
    document_id: String,
    rule_id: String,
    status: String,
    details: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<DbRuleResult> for DocumentRuleResult {
    type Error = StoreError;

    fn try_from(row: DbRuleResult) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "fail" => ResultStatus::Fail,
            "resolved" => ResultStatus::Resolved,
            other => return Err(corrupt("result status", other)),
        };
        let details =
            serde_json::from_str(&row.details).map_err(|e| corrupt("details", &e.to_string()))?;
        Ok(Self {
            id: row.id,
            document_id: row.document_id,
            rule_id: row.rule_id,
            status,
            details,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DbActionItem {
    id: String,
    document_id: String,
    rule_id: String,
    description: String,
    assigned_to: Option<String>,
    status: String,
    priority: String,
    due_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DbActionItem> for ActionItem {
    type Error = StoreError;

    fn try_from(row: DbActionItem) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "pending" => ActionStatus::Pending,
            "completed" => ActionStatus::Completed,
            other => return Err(corrupt("action status", other)),
        };
        let priority =
            Priority::from_str(&row.priority).map_err(|_| corrupt("priority", &row.priority))?;
        Ok(Self {
            id: row.id,
            document_id: row.document_id,
            rule_id: row.rule_id,
            description: row.description,
            assigned_to: row.assigned_to,
            status,
            priority,
            due_date: row.due_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RULE_COLUMNS: &str = "id, name, description, pattern, severity, created_at";
const DOCUMENT_COLUMNS: &str =
    "id, title, file_type, original_url, ocr_text, parsed_data, risk_score, created_at, updated_at";
const RESULT_COLUMNS: &str = "id, document_id, rule_id, status, details, created_at";
const ACTION_COLUMNS: &str = "id, document_id, rule_id, description, assigned_to, status, priority, due_date, created_at, updated_at";

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_rule(&self, rule: &ComplianceRule) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO compliance_rules (id, name, description, pattern, severity, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.pattern)
        .bind(rule.severity.as_str())
        .bind(rule.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("rule name {}", rule.name))
            }
            _ => backend(e),
        })?;
        Ok(())
    }

    async fn list_rules(&self) -> StoreResult<Vec<ComplianceRule>> {
        let rows: Vec<DbRule> = sqlx::query_as(&format!(
            "SELECT {RULE_COLUMNS} FROM compliance_rules ORDER BY created_at, name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(ComplianceRule::from).collect())
    }

    async fn find_rule_by_name(&self, name: &str) -> StoreResult<Option<ComplianceRule>> {
        let row: Option<DbRule> = sqlx::query_as(&format!(
            "SELECT {RULE_COLUMNS} FROM compliance_rules WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(ComplianceRule::from))
    }

    async fn find_rules_by_names(&self, names: &[String]) -> StoreResult<Vec<ComplianceRule>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM compliance_rules WHERE name IN ({placeholders}) ORDER BY created_at, name"
        );
        let mut query = sqlx::query_as::<_, DbRule>(&sql);
        for name in names {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        Ok(rows.into_iter().map(ComplianceRule::from).collect())
    }

    async fn delete_rule(&self, id: &str) -> StoreResult<()> {
        let done = sqlx::query("DELETE FROM compliance_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("rule", id));
        }
        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        let parsed_data = serde_json::to_string(&document.parsed_data)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, file_type, original_url, ocr_text, parsed_data, risk_score, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.file_type)
        .bind(&document.original_url)
        .bind(&document.ocr_text)
        .bind(parsed_data)
        .bind(document.risk_score)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Document> {
        let row: Option<DbDocument> = sqlx::query_as(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.ok_or_else(|| StoreError::not_found("document", id))?
            .try_into()
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let rows: Vec<DbDocument> = sqlx::query_as(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match Document::try_from(row) {
                Ok(document) => documents.push(document),
                Err(e) => tracing::warn!(document_id = %id, error = %e, "Skipping unreadable document"),
            }
        }
        Ok(documents)
    }

    async fn update_document_parsed_data(
        &self,
        id: &str,
        parsed_data: &ParsedData,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let parsed_data =
            serde_json::to_string(parsed_data).map_err(|e| StoreError::Backend(e.to_string()))?;
        let done = sqlx::query("UPDATE documents SET parsed_data = ?, updated_at = ? WHERE id = ?")
            .bind(parsed_data)
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("document", id));
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> StoreResult<()> {
        let done = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("document", id));
        }
        Ok(())
    }

    async fn insert_rule_result(&self, result: &DocumentRuleResult) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO document_rule_results (id, document_id, rule_id, status, details, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&result.id)
        .bind(&result.document_id)
        .bind(&result.rule_id)
        .bind(result.status.as_str())
        .bind(result.details.to_string())
        .bind(result.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn find_rule_result(
        &self,
        document_id: &str,
        rule_id: &str,
    ) -> StoreResult<Option<DocumentRuleResult>> {
        let row: Option<DbRuleResult> = sqlx::query_as(&format!(
            "SELECT {RESULT_COLUMNS} FROM document_rule_results WHERE document_id = ? AND rule_id = ? LIMIT 1"
        ))
        .bind(document_id)
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(DocumentRuleResult::try_from).transpose()
    }

    async fn update_rule_result(&self, result: &DocumentRuleResult) -> StoreResult<()> {
        let done = sqlx::query("UPDATE document_rule_results SET status = ?, details = ? WHERE id = ?")
            .bind(result.status.as_str())
            .bind(result.details.to_string())
            .bind(&result.id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("document rule result", &result.id));
        }
        Ok(())
    }

    async fn insert_action_item(&self, item: &ActionItem) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO action_items (id, document_id, rule_id, description, assigned_to, status, priority, due_date, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.document_id)
        .bind(&item.rule_id)
        .bind(&item.description)
        .bind(&item.assigned_to)
        .bind(item.status.as_str())
        .bind(item.priority.as_str())
        .bind(item.due_date)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_action_item(&self, id: &str) -> StoreResult<ActionItem> {
        let row: Option<DbActionItem> = sqlx::query_as(&format!(
            "SELECT {ACTION_COLUMNS} FROM action_items WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.ok_or_else(|| StoreError::not_found("action item", id))?
            .try_into()
    }

    async fn find_action_item(
        &self,
        document_id: &str,
        rule_id: &str,
    ) -> StoreResult<Option<ActionItem>> {
        let row: Option<DbActionItem> = sqlx::query_as(&format!(
            "SELECT {ACTION_COLUMNS} FROM action_items WHERE document_id = ? AND rule_id = ? LIMIT 1"
        ))
        .bind(document_id)
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(ActionItem::try_from).transpose()
    }

    async fn list_action_items(&self, status: ActionStatus) -> StoreResult<Vec<ActionItem>> {
        let rows: Vec<DbActionItem> = sqlx::query_as(&format!(
            "SELECT {ACTION_COLUMNS} FROM action_items WHERE status = ? ORDER BY due_date, created_at"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(ActionItem::try_from).collect()
    }

    async fn assign_action_item(
        &self,
        id: &str,
        assignee: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<ActionItem> {
        let done = sqlx::query("UPDATE action_items SET assigned_to = ?, updated_at = ? WHERE id = ?")
            .bind(assignee)
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("action item", id));
        }
        self.get_action_item(id).await
    }

    async fn complete_action_item(
        &self,
        id: &str,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Option<ActionItem>> {
        let done = sqlx::query(
            "UPDATE action_items SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ActionStatus::Completed.as_str())
        .bind(updated_at)
        .bind(id)
        .bind(ActionStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        // Zero rows: either missing (NotFound) or no longer pending
        let item = self.get_action_item(id).await?;
        Ok((done.rows_affected() == 1).then_some(item))
    }
}
