//! Engine configuration

use std::time::Duration;

use crate::remote::RetryPolicy;

/// Remote classifier settings
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// OpenAI-compatible API root, e.g. `https://api.groq.com/openai/v1`
    pub base_url: String,

    /// Bearer credential. `None` is a configuration failure at call time.
    pub api_key: Option<String>,

    /// Model for catalog-wide and batch classification
    pub model: String,

    /// Model for single-rule deep evaluation
    pub deep_model: String,

    pub temperature: f32,
    pub deep_temperature: f32,
    pub max_tokens: u32,
    pub batch_max_tokens: u32,

    pub timeout: Duration,
    pub batch_timeout: Duration,
    pub deep_timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: None,
            model: "llama-3.3-70b-versatile".to_string(),
            deep_model: "mixtral-8x7b-32768".to_string(),
            temperature: 0.7,
            deep_temperature: 0.8,
            max_tokens: 250,
            batch_max_tokens: 500,
            timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(60),
            deep_timeout: Duration::from_secs(45),
            retry: RetryPolicy::default(),
        }
    }
}

/// Admission limits per window for each gate instance
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Remote classifier calls per window
    pub classifier_calls: u32,

    /// Rule-table reads, mutations, rule checks and scoring per window
    pub rule_operations: u32,

    pub window: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            classifier_calls: 50,
            rule_operations: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Configuration for [`crate::ComplianceEngine`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub budgets: BudgetConfig,

    /// Batch chunks in flight at once
    pub batch_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            budgets: BudgetConfig::default(),
            batch_concurrency: 4,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by `from_env` and tests)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let number = |key: &str, default: u32| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(default)
        };

        let classifier = ClassifierConfig {
            base_url: lookup("CLASSIFIER_BASE_URL").unwrap_or(defaults.classifier.base_url),
            api_key: lookup("GROQ_API_KEY")
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            model: lookup("CLASSIFIER_MODEL").unwrap_or(defaults.classifier.model),
            deep_model: lookup("CLASSIFIER_DEEP_MODEL").unwrap_or(defaults.classifier.deep_model),
            timeout: secs("CLASSIFIER_TIMEOUT_SECS", defaults.classifier.timeout),
            batch_timeout: secs(
                "CLASSIFIER_BATCH_TIMEOUT_SECS",
                defaults.classifier.batch_timeout,
            ),
            deep_timeout: secs(
                "CLASSIFIER_DEEP_TIMEOUT_SECS",
                defaults.classifier.deep_timeout,
            ),
            retry: RetryPolicy {
                max_attempts: number(
                    "CLASSIFIER_MAX_ATTEMPTS",
                    defaults.classifier.retry.max_attempts,
                )
                .max(1),
                backoff_step: secs(
                    "CLASSIFIER_BACKOFF_STEP_SECS",
                    defaults.classifier.retry.backoff_step,
                ),
            },
            ..defaults.classifier
        };

        let budgets = BudgetConfig {
            classifier_calls: number("CLASSIFIER_CALLS_PER_MINUTE", defaults.budgets.classifier_calls),
            rule_operations: number("RULE_OPS_PER_MINUTE", defaults.budgets.rule_operations),
            window: defaults.budgets.window,
        };

        Self {
            classifier,
            budgets,
            batch_concurrency: lookup("BATCH_CONCURRENCY")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_concurrency),
        }
    }
}
