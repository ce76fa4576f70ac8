//! OpenAI-compatible chat completions client used by the classifiers
//!
//! The client owns transport concerns only: per-request timeouts, bounded
//! retry with linear backoff, and decoding the model's JSON answer. Callers
//! decide what to do with anything other than [`RemoteReply::Success`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::ClassifierConfig;
use crate::error::{EngineError, EngineResult};

/// Bounded retry with a linear backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("remote rate limit hit")]
    RateLimited,

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed reply: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_) | RemoteError::RateLimited => true,
            RemoteError::Status { status, .. } => *status >= 500,
            RemoteError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}

/// Decoded outcome of one remote exchange
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply<T> {
    Success(T),
    /// The call went through but the answer did not have the expected shape
    SchemaMismatch(String),
    /// Transport-level failure left after retries
    Transient(RemoteError),
}

impl<T> RemoteReply<T> {
    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            RemoteReply::Success(value) => Ok(value),
            RemoteReply::SchemaMismatch(reason) => Err(RemoteError::Malformed(reason)),
            RemoteReply::Transient(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the service to constrain output to a JSON object
    pub json_mode: bool,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client with retry
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(config: &ClassifierConfig) -> EngineResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(RemoteError::from)?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            retry: config.retry,
        })
    }

    /// The bearer credential, or [`EngineError::MissingCredential`].
    pub fn require_credential(&self) -> EngineResult<&str> {
        self.api_key.as_deref().ok_or(EngineError::MissingCredential)
    }

    /// Send a request and decode the first choice's content as `T`.
    ///
    /// Transport errors, 429 and 5xx are retried up to the policy's attempt
    /// limit. A reply that arrives but does not decode is not retried.
    #[instrument(skip(self, credential, request), fields(model = %request.model))]
    pub async fn send<T: DeserializeOwned>(
        &self,
        credential: &str,
        request: &ChatRequest,
    ) -> RemoteReply<T> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.exchange(credential, request).await {
                Ok(body) => return decode_content(&body),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Classifier call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Classifier call failed");
                    return RemoteReply::Transient(err);
                }
            }
        }
    }

    async fn exchange(&self, credential: &str, request: &ChatRequest) -> Result<String, RemoteError> {
        let payload = WireRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(credential)
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RemoteError::RateLimited);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(bytes = body.len(), "Classifier reply received");
        Ok(body)
    }
}

fn decode_content<T: DeserializeOwned>(body: &str) -> RemoteReply<T> {
    let envelope: WireResponse = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => return RemoteReply::SchemaMismatch(format!("reply envelope: {e}")),
    };

    let Some(content) = envelope
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
    else {
        return RemoteReply::SchemaMismatch("reply has no choices".to_string());
    };

    match serde_json::from_str(strip_fences(&content)) {
        Ok(value) => RemoteReply::Success(value),
        Err(e) => RemoteReply::SchemaMismatch(format!("reply content: {e}")),
    }
}

/// Models sometimes wrap JSON in a markdown code fence.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        violated_rules: Vec<String>,
    }

    fn envelope(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_step: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(2), Duration::from_secs(20));
    }

    #[test]
    fn test_retryable_classes() {
        assert!(RemoteError::Transport("reset".into()).is_retryable());
        assert!(RemoteError::RateLimited.is_retryable());
        assert!(RemoteError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!RemoteError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!RemoteError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("  {} "), "{}");
    }

    #[test]
    fn test_decode_content_success() {
        let reply: RemoteReply<Answer> =
            decode_content(&envelope(r#"{"violated_rules": ["NDA Check"]}"#));
        assert_eq!(
            reply,
            RemoteReply::Success(Answer {
                violated_rules: vec!["NDA Check".to_string()]
            })
        );
    }

    #[test]
    fn test_decode_content_mismatches() {
        let reply: RemoteReply<Answer> = decode_content("not json");
        assert!(matches!(reply, RemoteReply::SchemaMismatch(_)));

        let reply: RemoteReply<Answer> = decode_content(r#"{"choices": []}"#);
        assert!(matches!(reply, RemoteReply::SchemaMismatch(_)));

        let reply: RemoteReply<Answer> = decode_content(&envelope(r#"{"rules": 3}"#));
        assert!(matches!(reply, RemoteReply::SchemaMismatch(_)));
    }

    #[test]
    fn test_missing_credential() {
        let client = ChatClient::new(&ClassifierConfig::default()).unwrap();
        assert!(matches!(
            client.require_credential(),
            Err(EngineError::MissingCredential)
        ));
    }
}
