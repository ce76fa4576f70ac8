//! HTTP handlers for the compliance API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use compliance_engine::{
    BatchClassification, CompletedAction, DocumentSummary, IngestReport, PendingAction,
};
use serde::{Deserialize, Serialize};
use shared_types::{ActionItem, ComplianceRule, NewDocument, NewRule, RuleOutcome};

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "compliance-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---- rules ----

/// Handler: POST /rules
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewRule>,
) -> ApiResult<(StatusCode, Json<ComplianceRule>)> {
    let rule = state.engine.add_rule(req).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// Handler: GET /rules
pub async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ComplianceRule>>> {
    Ok(Json(state.engine.list_rules().await?))
}

#[derive(Debug, Deserialize)]
pub struct RuleNamesRequest {
    pub names: Vec<String>,
}

/// Handler: POST /rules/by-names
pub async fn rules_by_names(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RuleNamesRequest>,
) -> ApiResult<Json<Vec<ComplianceRule>>> {
    Ok(Json(state.engine.rules_by_names(&req.names).await?))
}

// ---- documents ----

/// Document submitted after upload and text extraction.
/// Without a title, title and file type come from the URL.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub original_url: String,
    pub ocr_text: String,
}

impl IngestRequest {
    fn into_document(self) -> ApiResult<NewDocument> {
        let mut document = NewDocument::from_url(&self.original_url, self.ocr_text);
        if let Some(title) = self.title.filter(|t| !t.trim().is_empty()) {
            document.title = title;
        }
        if let Some(file_type) = self.file_type.filter(|t| !t.trim().is_empty()) {
            document.file_type = file_type;
        }
        if document.title.trim().is_empty() {
            return Err(ApiError::InvalidRequest(
                "title or original_url is required".to_string(),
            ));
        }
        Ok(document)
    }
}

/// Handler: POST /documents
pub async fn ingest_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestReport>)> {
    let report = state.engine.ingest(req.into_document()?).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// Handler: GET /dashboard
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<DocumentSummary>>> {
    Ok(Json(state.engine.document_summaries().await?))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub texts: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    5
}

/// Handler: POST /classify/batch
pub async fn classify_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<Json<BatchClassification>> {
    Ok(Json(
        state.engine.classify_batch(&req.texts, req.batch_size).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub rule_name: String,
}

/// Handler: POST /documents/:id/rules/evaluate
pub async fn evaluate_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult<Json<RuleOutcome>> {
    Ok(Json(state.engine.evaluate_rule(&id, &req.rule_name).await?))
}

// ---- action items ----

#[derive(Serialize)]
pub struct ActionItemsResponse {
    pub count: usize,
    pub items: Vec<PendingAction>,
}

/// Handler: GET /action-items
pub async fn pending_action_items(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ActionItemsResponse>> {
    let items = state.engine.pending_actions_with_titles().await?;
    Ok(Json(ActionItemsResponse {
        count: items.len(),
        items,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub email: String,
}

/// Handler: POST /action-update/:id
pub async fn assign_action_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<ActionItem>> {
    let email = req.email.trim();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(ApiError::InvalidRequest(format!("Invalid email: {email}")));
    }

    Ok(Json(state.engine.assign_action(&id, email).await?))
}

/// Handler: PUT /action-items/:id/complete
pub async fn complete_action_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CompletedAction>> {
    Ok(Json(state.engine.complete_action(&id).await?))
}
