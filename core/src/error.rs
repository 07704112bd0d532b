// sagaflow/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SagaError {
  #[error("Step not found: {step_name}")]
  StepNotFound { step_name: String },

  #[error("Handler missing for non-optional step: {step_name}")]
  HandlerMissing { step_name: String },

  #[error("Error in user-provided handler or external operation. Source: {source}")]
  HandlerError {
    #[source]
    source: AnyhowError,
  },

  #[error("Configuration error for step '{step_name}': {message}")]
  ConfigurationError { step_name: String, message: String },

  #[error("Internal sagaflow error: {0}")]
  Internal(String),
}

// Any external failure surfaced through `?` becomes a handler error.
impl From<AnyhowError> for SagaError {
  fn from(err: AnyhowError) -> Self {
    SagaError::HandlerError { source: err }
  }
}

pub type SagaResult<T, E = SagaError> = std::result::Result<T, E>;
