//! Chunked batch classification
//!
//! Documents are split into contiguous chunks and each chunk goes to the
//! remote service as one request. Ids on the wire are local to a chunk
//! (`doc_0..doc_{n-1}`); results are keyed by the document's position in the
//! whole input (`doc_<index>`).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use shared_types::ComplianceRule;
use tracing::{info, instrument, warn};

use crate::classifier::validate_against_catalog;
use crate::config::ClassifierConfig;
use crate::error::{EngineError, EngineResult};
use crate::rate_gate::{Budget, RateGates};
use crate::remote::{ChatClient, ChatMessage, ChatRequest, RemoteReply};

/// Label given to a document that received no usable rule suggestion
pub const GENERAL_COMPLIANCE: &str = "General Compliance";

/// Merged batch output
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchClassification {
    /// Global document id to rule names. Never holds an empty list.
    pub results: BTreeMap<String, Vec<String>>,
    /// Ids of documents whose chunk failed outright
    pub skipped: Vec<String>,
}

#[derive(Serialize)]
struct WireDocument<'a> {
    id: String,
    ocr_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchReply {
    results: HashMap<String, Vec<String>>,
}

pub fn global_id(index: usize) -> String {
    format!("doc_{index}")
}

pub struct BatchClassifier {
    client: Arc<ChatClient>,
    gates: Arc<RateGates>,
    config: ClassifierConfig,
    concurrency: usize,
}

impl BatchClassifier {
    pub fn new(
        client: Arc<ChatClient>,
        gates: Arc<RateGates>,
        config: ClassifierConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            gates,
            config,
            concurrency: concurrency.max(1),
        }
    }

    /// Classify `texts` in chunks of `batch_size`.
    ///
    /// The batch budget is charged once per call, not per chunk.
    #[instrument(skip(self, texts, catalog), fields(documents = texts.len()))]
    pub async fn classify(
        &self,
        texts: &[String],
        batch_size: usize,
        catalog: &[ComplianceRule],
    ) -> EngineResult<BatchClassification> {
        if texts.is_empty() {
            return Err(EngineError::InvalidInput("no documents to classify".to_string()));
        }
        if batch_size == 0 {
            return Err(EngineError::InvalidInput("batch size must be at least 1".to_string()));
        }
        let credential = self.client.require_credential()?;
        if !self.gates.allow(Budget::BatchClassification) {
            return Err(EngineError::BudgetExhausted(Budget::BatchClassification));
        }

        let rule_names = catalog
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let merged = Mutex::new(BatchClassification::default());

        stream::iter(texts.chunks(batch_size).enumerate())
            .for_each_concurrent(self.concurrency, |(chunk_index, chunk)| {
                let offset = chunk_index * batch_size;
                let rule_names = &rule_names;
                let merged = &merged;
                async move {
                    let outcome = self.classify_chunk(credential, chunk, rule_names).await;
                    let mut merged = merged.lock().unwrap_or_else(PoisonError::into_inner);
                    match outcome {
                        Ok(reply) => merge_chunk(&mut merged, reply, chunk.len(), offset, catalog),
                        Err(reason) => {
                            warn!(chunk = chunk_index, %reason, "Batch chunk failed, skipping its documents");
                            merged
                                .skipped
                                .extend((offset..offset + chunk.len()).map(global_id));
                        }
                    }
                }
            })
            .await;

        let mut merged = merged.into_inner().unwrap_or_else(PoisonError::into_inner);
        merged.skipped.sort_by_key(|id| id_index(id));
        info!(
            classified = merged.results.len(),
            skipped = merged.skipped.len(),
            "Batch classification finished"
        );
        Ok(merged)
    }

    async fn classify_chunk(
        &self,
        credential: &str,
        chunk: &[String],
        rule_names: &str,
    ) -> Result<BatchReply, String> {
        let documents: Vec<WireDocument> = chunk
            .iter()
            .enumerate()
            .map(|(i, text)| WireDocument {
                id: global_id(i),
                ocr_text: text,
            })
            .collect();
        let documents = serde_json::to_string(&documents).map_err(|e| e.to_string())?;

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user(batch_prompt(rule_names, &documents))],
            temperature: self.config.temperature,
            max_tokens: Some(self.config.batch_max_tokens),
            json_mode: true,
            timeout: self.config.batch_timeout,
        };

        match self.client.send::<BatchReply>(credential, &request).await {
            RemoteReply::Success(reply) => Ok(reply),
            RemoteReply::SchemaMismatch(reason) => Err(reason),
            RemoteReply::Transient(err) => Err(err.to_string()),
        }
    }
}

/// Fold one chunk's reply into the merged result.
fn merge_chunk(
    merged: &mut BatchClassification,
    mut reply: BatchReply,
    chunk_len: usize,
    offset: usize,
    catalog: &[ComplianceRule],
) {
    for local in 0..chunk_len {
        let names = reply
            .results
            .remove(&global_id(local))
            .map(|names| validate_against_catalog(names, catalog))
            .unwrap_or_default();
        let names = if names.is_empty() {
            vec![GENERAL_COMPLIANCE.to_string()]
        } else {
            names
        };
        merged.results.insert(global_id(offset + local), names);
    }

    for unknown in reply.results.keys() {
        warn!(id = %unknown, "Batch reply names an unknown document id, ignored");
    }
}

fn id_index(id: &str) -> usize {
    id.strip_prefix("doc_")
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

fn batch_prompt(rule_names: &str, documents: &str) -> String {
    format!(
        "For each document, analyze the text and suggest the most relevant legal compliance rules from this list:\n\
         {rule_names}\n\n\
         Documents (JSON array of objects with \"id\" and \"ocr_text\"):\n\
         {documents}\n\n\
         Instructions:\n\
         1. Review each document text.\n\
         2. Match the content to rules based on their names.\n\
         3. Return a JSON object with a \"results\" map where keys are document ids and values are arrays of applicable rule names.\n\
         4. Rule names must match exactly as provided.\n\n\
         Response Format:\n\
         {{\"results\": {{\"doc_0\": [\"Rule1\", \"Rule2\"], \"doc_1\": [\"Rule3\"]}}}}"
    )
}
