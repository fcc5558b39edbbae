//! cognito-score: rank candidate LLMs on a generated exam.
//!
//! An author model writes a test kit, every candidate answers every question
//! in parallel, and a judge model scores and ranks the candidates from the
//! full transcript.
//!
//! ```ignore
//! use std::sync::Arc;
//! use cognito_score::{EvaluationConfig, ModelRegistry, PipelineOrchestrator};
//! use cognito_score::llm::{CandidatesPayload, OpenRouterProvider};
//!
//! let provider = Arc::new(OpenRouterProvider::new(api_key)?);
//! let payload = CandidatesPayload::from_json(r#"{"models": {"a": "vendor/a", "b": "vendor/b"}}"#)?;
//! let candidates = ModelRegistry::from_payload(provider.clone(), &payload)?;
//!
//! let config = EvaluationConfig::from_env()?;
//! let result = PipelineOrchestrator::from_provider(&config, provider)
//!     .evaluate(&candidates)
//!     .await?;
//! println!("{}", result.evaluation_result);
//! ```

pub mod agents;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod utils;

pub use agents::{
    AgentError, AgentResult, EvaluationResult, ExamResponse, FinalResult, NameScoreAndRank,
    PipelineOrchestrator, Question, TestKit,
};
pub use config::{ConfigError, EvaluationConfig};
pub use error::LlmError;
pub use llm::{LlmProvider, ModelHandle, ModelRegistry, RegistryError};
