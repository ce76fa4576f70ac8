//! Error taxonomy for the compliance engine

use shared_types::ValidationError;
use thiserror::Error;

use crate::lifecycle::RemediationState;
use crate::rate_gate::Budget;
use crate::remote::RemoteError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A rate gate denied the call. Recoverable by backing off.
    #[error("Rate limit exceeded for {0}")]
    BudgetExhausted(Budget),

    /// The remote classifier credential is not configured. Never falls back.
    #[error("Classifier credential is not configured")]
    MissingCredential,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Remote classifier failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Action item {id} is not pending (state: {state})")]
    NotPending { id: String, state: RemediationState },

    #[error("Rule already exists: {0}")]
    DuplicateRule(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    /// True for failures the caller can clear by waiting and retrying.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::BudgetExhausted(_) => true,
            EngineError::Remote(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
