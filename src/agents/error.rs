//! Error types for the evaluation pipeline.
//!
//! Every variant is fatal to the run that raised it; there is no partial
//! result and no fallback score.

use thiserror::Error;

use crate::error::LlmError;
use crate::llm::RegistryError;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Caller or configuration mistake (empty candidate set, empty test kit, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The model provider failed (transport, auth, rate limit).
    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),

    /// A model answered, but not in the requested structured shape.
    #[error("Generation error: {0}")]
    Generation(String),

    /// The first failing unit of a parallel examination.
    #[error("Examination of '{model_alias}' failed on question \"{question}\": {source}")]
    Examination {
        model_alias: String,
        question: String,
        #[source]
        source: Box<AgentError>,
    },

    /// A worker disappeared without reporting its result.
    #[error("Worker channel failure: {0}")]
    Channel(String),
}

impl AgentError {
    pub fn examination(
        model_alias: impl Into<String>,
        question: impl Into<String>,
        source: AgentError,
    ) -> Self {
        AgentError::Examination {
            model_alias: model_alias.into(),
            question: question.into(),
            source: Box::new(source),
        }
    }

    /// Short machine-readable kind, logged on failure and shown by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::InvalidInput(_) => "invalid_input",
            AgentError::Provider(_) => "provider",
            AgentError::Generation(_) => "generation",
            AgentError::Examination { .. } => "examination",
            AgentError::Channel(_) => "channel",
        }
    }
}

impl From<RegistryError> for AgentError {
    fn from(err: RegistryError) -> Self {
        AgentError::InvalidInput(err.to_string())
    }
}

/// Result type alias for pipeline operations.
pub type AgentResult<T> = Result<T, AgentError>;
