//! Application state for the compliance API

use std::sync::Arc;

use anyhow::Result;
use compliance_engine::{ComplianceEngine, EngineConfig, RecordStore};

use crate::store::SqliteStore;

pub struct AppState {
    pub engine: ComplianceEngine,
}

impl AppState {
    /// Open the database and build the engine from environment configuration.
    pub async fn new(database_url: &str) -> Result<Self> {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::connect(database_url).await?);
        let config = EngineConfig::from_env();

        if config.classifier.api_key.is_none() {
            tracing::warn!("GROQ_API_KEY is not set; classification requests will fail");
        }
        tracing::info!(
            model = %config.classifier.model,
            classifier_calls = config.budgets.classifier_calls,
            rule_operations = config.budgets.rule_operations,
            "Compliance engine configured"
        );

        Ok(Self::with_engine(ComplianceEngine::new(config, store)?))
    }

    pub fn with_engine(engine: ComplianceEngine) -> Self {
        Self { engine }
    }
}
