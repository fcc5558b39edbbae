//! Pipeline stages and the data they exchange.
//!
//! - [`TestKitGenerator`] has an author model write the exam
//! - [`ExaminationRunner`] poses every question to every candidate in parallel
//! - [`EvaluationAggregator`] has a judge model score and rank the transcript
//! - [`PipelineOrchestrator`] runs the three in order

pub mod error;
pub mod evaluation_aggregator;
pub mod examination_runner;
pub mod orchestrator;
pub mod persona;
pub mod test_kit_generator;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AgentError, AgentResult};
pub use evaluation_aggregator::{EvaluationAggregator, EvaluationAggregatorConfig};
pub use examination_runner::{ExaminationRunner, ExaminationRunnerConfig};
pub use orchestrator::PipelineOrchestrator;
pub use persona::{Persona, EVALUATOR, EXAMINER, TEST_DEVELOPER};
pub use test_kit_generator::{TestKitGenerator, TestKitGeneratorConfig};
pub use types::{
    EvaluationResult, ExamResponse, FinalResult, NameScoreAndRank, Question, TestKit,
};
