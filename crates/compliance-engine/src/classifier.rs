//! Remote rule classification with a local fallback
//!
//! [`RuleClassifier::violated_rules`] asks the remote service which catalog
//! rules a document violates. Any gate denial, exhausted retry sequence or
//! unusable reply is answered by the [`FallbackMatcher`] instead. Only a
//! missing credential is surfaced as an error.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use shared_types::{ComplianceRule, OutcomeStatus, RuleOutcome};
use tracing::{debug, info, instrument, warn};

use crate::config::ClassifierConfig;
use crate::error::{EngineError, EngineResult};
use crate::fallback::FallbackMatcher;
use crate::patterns::local_signal;
use crate::rate_gate::{Budget, RateGates};
use crate::remote::{ChatClient, ChatMessage, ChatRequest, RemoteReply};

#[derive(Debug, Deserialize)]
struct ViolatedRules {
    violated_rules: Vec<String>,
}

/// Deep-mode answer. Every field is optional; a missing or odd status is a fail.
#[derive(Debug, Deserialize)]
struct DeepVerdict {
    #[serde(default)]
    status: Option<serde_json::Value>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    confidence_score: Option<f64>,
}

impl DeepVerdict {
    fn status(&self) -> OutcomeStatus {
        match &self.status {
            Some(serde_json::Value::String(s)) if s == "pass" => OutcomeStatus::Pass,
            _ => OutcomeStatus::Fail,
        }
    }
}

const DEEP_SYSTEM_PROMPT: &str =
    "You are an advanced compliance rule analyzer with expertise in legal document validation.";

pub struct RuleClassifier {
    client: Arc<ChatClient>,
    gates: Arc<RateGates>,
    fallback: FallbackMatcher,
    config: ClassifierConfig,
}

impl RuleClassifier {
    pub fn new(
        client: Arc<ChatClient>,
        gates: Arc<RateGates>,
        fallback: FallbackMatcher,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            client,
            gates,
            fallback,
            config,
        }
    }

    /// Names of catalog rules the text violates, in catalog order.
    #[instrument(skip_all, fields(text_len = text.len(), catalog = catalog.len()))]
    pub async fn violated_rules(
        &self,
        text: &str,
        catalog: &[ComplianceRule],
    ) -> EngineResult<Vec<String>> {
        if catalog.is_empty() {
            return Err(EngineError::InvalidInput("rule catalog is empty".to_string()));
        }
        let credential = self.client.require_credential()?;

        if text.trim().is_empty() {
            debug!("Empty document text, nothing to classify");
            return Ok(Vec::new());
        }

        if !self.gates.allow(Budget::ClassifierCall) {
            info!(budget = %Budget::ClassifierCall, "Classifier budget exhausted, using fallback");
            return Ok(self.fallback_names(text, catalog));
        }

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user(catalog_prompt(text, catalog))],
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
            json_mode: true,
            timeout: self.config.timeout,
        };

        match self.client.send::<ViolatedRules>(credential, &request).await {
            RemoteReply::Success(reply) => Ok(validate_against_catalog(reply.violated_rules, catalog)),
            RemoteReply::SchemaMismatch(reason) => {
                warn!(%reason, "Classifier reply unusable, using fallback");
                Ok(self.fallback_names(text, catalog))
            }
            RemoteReply::Transient(err) => {
                warn!(error = %err, "Classifier unavailable, using fallback");
                Ok(self.fallback_names(text, catalog))
            }
        }
    }

    /// One outcome per catalog rule, in catalog order.
    pub async fn classify(
        &self,
        text: &str,
        catalog: &[ComplianceRule],
    ) -> EngineResult<Vec<RuleOutcome>> {
        let violated: HashSet<String> = self.violated_rules(text, catalog).await?.into_iter().collect();
        Ok(catalog
            .iter()
            .map(|rule| {
                if violated.contains(&rule.name) {
                    RuleOutcome::fail(rule)
                } else {
                    RuleOutcome::pass(rule)
                }
            })
            .collect())
    }

    /// Single-rule deep evaluation.
    ///
    /// A local pattern signal is computed first and passed to the remote
    /// service as context. If the remote call is denied or fails, the local
    /// signal decides: pass if it matched, fail otherwise.
    #[instrument(skip(self, text, rule), fields(rule = %rule.name))]
    pub async fn evaluate_rule(&self, text: &str, rule: &ComplianceRule) -> EngineResult<RuleOutcome> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidInput("document text is empty".to_string()));
        }
        if rule.name.trim().is_empty() {
            return Err(EngineError::InvalidInput("rule name is empty".to_string()));
        }
        let credential = self.client.require_credential()?;

        let signal = local_signal(&rule.name, &rule.pattern, text);
        let local = if signal.matched() {
            RuleOutcome::pass(rule)
        } else {
            RuleOutcome::fail(rule)
        };

        if !self.gates.allow(Budget::RuleCheck) {
            info!(budget = %Budget::RuleCheck, "Rule check budget exhausted, using local signal");
            return Ok(local);
        }

        let request = ChatRequest {
            model: self.config.deep_model.clone(),
            messages: vec![
                ChatMessage::system(DEEP_SYSTEM_PROMPT),
                ChatMessage::user(deep_prompt(text, rule, signal.matched())),
            ],
            temperature: self.config.deep_temperature,
            max_tokens: None,
            json_mode: true,
            timeout: self.config.deep_timeout,
        };

        match self.client.send::<DeepVerdict>(credential, &request).await {
            RemoteReply::Success(verdict) => {
                let status = verdict.status();
                debug!(%status, confidence = ?verdict.confidence_score, "Deep evaluation verdict");
                let mut outcome = match status {
                    OutcomeStatus::Pass => RuleOutcome::pass(rule),
                    OutcomeStatus::Fail => RuleOutcome::fail(rule),
                };
                if let Some(explanation) = verdict.explanation.filter(|e| !e.trim().is_empty()) {
                    outcome.explanation = explanation;
                }
                Ok(outcome)
            }
            RemoteReply::SchemaMismatch(reason) => {
                warn!(%reason, "Deep evaluation reply unusable, using local signal");
                Ok(local)
            }
            RemoteReply::Transient(err) => {
                warn!(error = %err, "Deep evaluation unavailable, using local signal");
                Ok(local)
            }
        }
    }

    fn fallback_names(&self, text: &str, catalog: &[ComplianceRule]) -> Vec<String> {
        validate_against_catalog(self.fallback.violations(text), catalog)
    }
}

/// Keep only names present in the catalog, deduplicated, in catalog order.
pub fn validate_against_catalog(names: Vec<String>, catalog: &[ComplianceRule]) -> Vec<String> {
    let known: HashSet<&str> = catalog.iter().map(|r| r.name.as_str()).collect();
    let mut suggested = HashSet::new();
    for name in names {
        let name = name.trim().to_string();
        if known.contains(name.as_str()) {
            suggested.insert(name);
        } else {
            warn!(rule = %name, "Suggested rule not in catalog, dropped");
        }
    }

    catalog
        .iter()
        .filter(|r| suggested.contains(&r.name))
        .map(|r| r.name.clone())
        .collect()
}

fn catalog_prompt(text: &str, catalog: &[ComplianceRule]) -> String {
    let rules = catalog
        .iter()
        .map(|r| format!("{}: {} (Pattern: {})", r.name, r.description, r.pattern))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze the following document text and determine which legal compliance rules from this list are violated:\n\
         {rules}\n\n\
         Document Text:\n\
         {text}\n\n\
         Instructions:\n\
         1. Review the document text against each rule's description and pattern.\n\
         2. Identify rules where the document fails to meet the requirements.\n\
         3. Return a JSON object with a \"violated_rules\" array containing only the names of violated rules.\n\
         4. If no rules are violated, return an empty array.\n\
         5. Rule names must match exactly as provided.\n\n\
         Response Format:\n\
         {{\"violated_rules\": [\"Rule1\", \"Rule2\"]}}"
    )
}

fn deep_prompt(text: &str, rule: &ComplianceRule, initial_check: bool) -> String {
    format!(
        "Analyze the document for compliance with the rule '{name}':\n\n\
         Rule Name: {name}\n\
         Rule Pattern: {pattern}\n\
         Initial Compliance Check: {initial_check}\n\n\
         Document Text:\n\
         {text}\n\n\
         Respond with a JSON object: \
         {{\"status\": \"pass\" or \"fail\", \"explanation\": string, \"confidence_score\": number between 0 and 1}}",
        name = rule.name,
        pattern = rule.pattern,
    )
}
