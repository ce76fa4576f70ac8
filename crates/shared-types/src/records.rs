//! Durable records: documents, rule results and action items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Priority, RuleOutcome};

/// Stored outcome payload of a document.
///
/// Serialized as `{"outcomes": [...], "status": bool}`. Older rows that hold
/// a bare outcome array are accepted on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ParsedDataRepr")]
pub struct ParsedData {
    pub outcomes: Vec<RuleOutcome>,
    /// Flips to true once remediation has happened for the document
    #[serde(rename = "status")]
    pub remediated: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParsedDataRepr {
    Current {
        outcomes: Vec<RuleOutcome>,
        #[serde(default)]
        status: bool,
    },
    Legacy(Vec<RuleOutcome>),
}

impl From<ParsedDataRepr> for ParsedData {
    fn from(repr: ParsedDataRepr) -> Self {
        match repr {
            ParsedDataRepr::Current { outcomes, status } => Self {
                outcomes,
                remediated: status,
            },
            ParsedDataRepr::Legacy(outcomes) => Self {
                outcomes,
                remediated: false,
            },
        }
    }
}

impl ParsedData {
    pub fn new(outcomes: Vec<RuleOutcome>) -> Self {
        Self {
            outcomes,
            remediated: false,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|o| o.is_fail())
    }

    pub fn all_passed(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// An ingested legal document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub file_type: String,
    pub original_url: String,
    pub ocr_text: String,
    pub parsed_data: ParsedData,
    pub risk_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document handed to the engine by the upload/OCR pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub ocr_text: String,
}

impl NewDocument {
    /// Derive title and file type from the stored object's URL.
    pub fn from_url(original_url: &str, ocr_text: impl Into<String>) -> Self {
        let file_name = original_url
            .rsplit('/')
            .next()
            .unwrap_or(original_url)
            .to_string();
        let (title, file_type) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_ascii_lowercase()),
            _ => (file_name.clone(), String::new()),
        };

        Self {
            title,
            file_type,
            original_url: original_url.to_string(),
            ocr_text: ocr_text.into(),
        }
    }
}

/// Status of a stored rule failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Fail,
    Resolved,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Fail => "fail",
            ResultStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a rule that failed for a document at classification time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRuleResult {
    pub id: String,
    pub document_id: String,
    pub rule_id: String,
    pub status: ResultStatus,
    /// Opaque outcome payload
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Action item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Completed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation task tied to one failed rule of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: String,
    pub document_id: String,
    pub rule_id: String,
    pub description: String,
    pub assigned_to: Option<String>,
    pub status: ActionStatus,
    pub priority: Priority,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
