//! End-to-end evaluation pipeline.
//!
//! Runs test kit generation, examination and evaluation strictly in that
//! order with a full barrier between stages. Any stage failure aborts the run.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::EvaluationConfig;
use crate::llm::{LlmProvider, ModelHandle, ModelRegistry};

use super::error::{AgentError, AgentResult};
use super::evaluation_aggregator::EvaluationAggregator;
use super::examination_runner::ExaminationRunner;
use super::test_kit_generator::TestKitGenerator;
use super::types::{FinalResult, TestKit};

/// Composes the three pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    generator: TestKitGenerator,
    runner: ExaminationRunner,
    aggregator: EvaluationAggregator,
    default_question_count: usize,
}

impl PipelineOrchestrator {
    /// Builds the pipeline from explicit author and judge handles.
    pub fn new(config: &EvaluationConfig, author: ModelHandle, judge: ModelHandle) -> Self {
        let invoker = config.invoker();
        Self {
            generator: TestKitGenerator::new(
                author,
                invoker.clone(),
                config.test_kit_generator_config(),
            ),
            runner: ExaminationRunner::new(invoker.clone(), config.examination_runner_config()),
            aggregator: EvaluationAggregator::new(
                judge,
                invoker,
                config.evaluation_aggregator_config(),
            ),
            default_question_count: config.question_count,
        }
    }

    /// Builds the pipeline with author and judge served by `provider`.
    pub fn from_provider(config: &EvaluationConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let author = ModelHandle::new(Arc::clone(&provider), config.author_model.as_str());
        let judge = ModelHandle::new(provider, config.judge_model.as_str());
        Self::new(config, author, judge)
    }

    /// Question count used by [`evaluate`](Self::evaluate).
    pub fn default_question_count(&self) -> usize {
        self.default_question_count
    }

    /// Runs only the test kit stage.
    pub async fn generate_test_kit(&self, question_count: usize) -> AgentResult<TestKit> {
        self.generator.generate(question_count).await
    }

    /// [`evaluate_all`](Self::evaluate_all) with the configured question count.
    pub async fn evaluate(&self, candidates: &ModelRegistry) -> AgentResult<FinalResult> {
        self.evaluate_all(candidates, self.default_question_count)
            .await
    }

    /// Generates a test kit, examines every candidate on it and ranks them.
    ///
    /// The judge is called only after every examination unit has completed.
    #[instrument(
        skip(self, candidates),
        fields(run_id = %Uuid::new_v4(), candidate_count = candidates.len())
    )]
    pub async fn evaluate_all(
        &self,
        candidates: &ModelRegistry,
        question_count: usize,
    ) -> AgentResult<FinalResult> {
        let result = self.run_stages(candidates, question_count).await;
        if let Err(err) = &result {
            error!(kind = err.kind(), error = %err, "Evaluation run failed");
        }
        result
    }

    async fn run_stages(
        &self,
        candidates: &ModelRegistry,
        question_count: usize,
    ) -> AgentResult<FinalResult> {
        if candidates.is_empty() {
            return Err(AgentError::InvalidInput(
                "candidate set must not be empty".to_string(),
            ));
        }

        let start = Instant::now();
        info!(question_count = question_count, "Starting evaluation run");

        let stage = Instant::now();
        let kit = self.generator.generate(question_count).await?;
        info!(
            stage = "test_kit",
            questions = kit.len(),
            duration_ms = stage.elapsed().as_millis() as u64,
            "Stage completed"
        );

        let stage = Instant::now();
        let responses = self.runner.run(candidates, &kit).await?;
        info!(
            stage = "examination",
            responses = responses.len(),
            duration_ms = stage.elapsed().as_millis() as u64,
            "Stage completed"
        );

        let stage = Instant::now();
        let evaluation = self
            .aggregator
            .evaluate_against(&responses, Some(&kit))
            .await?;
        info!(
            stage = "evaluation",
            entries = evaluation.entries.len(),
            duration_ms = stage.elapsed().as_millis() as u64,
            "Stage completed"
        );

        info!(
            winner = evaluation.winner().map(|w| w.name.as_str()).unwrap_or("<none>"),
            duration_ms = start.elapsed().as_millis() as u64,
            "Evaluation run completed"
        );
        Ok(FinalResult::new(evaluation, responses))
    }
}
