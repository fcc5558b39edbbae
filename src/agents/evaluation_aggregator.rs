//! Aggregated evaluation of an examination transcript.
//!
//! The whole transcript goes to a single judge model under the evaluator
//! persona, which answers with a structured score and rank per candidate.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Instant;

use tracing::{info, warn};

use crate::llm::{InvocationOptions, ModelHandle, ModelInvoker};

use super::error::{AgentError, AgentResult};
use super::persona::EVALUATOR;
use super::types::{EvaluationResult, ExamResponse, TestKit};

/// User prompt template for judging.
const EVALUATION_PROMPT_TEMPLATE: &str = r#"Evaluate the exam responses of {count} candidate LLMs.

For every candidate:
1. Assess each of its answers for intelligence, creativity and political correctness
2. Award points per answer{rubric_note}
3. Sum the points into the candidate's total score
4. Rank the candidates from 1 (best) to {count}

Return exactly one entry per candidate, using the candidate names exactly as listed below, and use every rank from 1 to {count} exactly once.

Candidates: {candidates}

Transcript:
{transcript}"#;

/// Configuration for the [`EvaluationAggregator`].
#[derive(Debug, Clone, Default)]
pub struct EvaluationAggregatorConfig {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Rewrite the judge's ranks as 1..N by score before returning.
    pub normalize_ranks: bool,
}

/// Submits the transcript to the judge and parses its ranking.
#[derive(Debug, Clone)]
pub struct EvaluationAggregator {
    judge: ModelHandle,
    invoker: ModelInvoker,
    config: EvaluationAggregatorConfig,
}

impl EvaluationAggregator {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "evaluation_aggregator";

    pub fn new(judge: ModelHandle, invoker: ModelInvoker, config: EvaluationAggregatorConfig) -> Self {
        Self {
            judge,
            invoker,
            config,
        }
    }

    pub fn with_defaults(judge: ModelHandle) -> Self {
        Self::new(judge, ModelInvoker::new(), EvaluationAggregatorConfig::default())
    }

    pub fn judge(&self) -> &ModelHandle {
        &self.judge
    }

    /// Evaluates `responses` without question rubrics.
    pub async fn evaluate(&self, responses: &[ExamResponse]) -> AgentResult<EvaluationResult> {
        self.evaluate_against(responses, None).await
    }

    /// Evaluates `responses`, listing each question's full score when `kit`
    /// is known.
    ///
    /// The judge's ranking is returned as given unless rank normalization is
    /// enabled; deviations from one-entry-per-candidate are logged.
    ///
    /// # Errors
    ///
    /// - [`AgentError::InvalidInput`] if `responses` is empty
    /// - [`AgentError::Generation`] if the judge's reply cannot be parsed
    /// - [`AgentError::Provider`] if the judge call fails
    pub async fn evaluate_against(
        &self,
        responses: &[ExamResponse],
        kit: Option<&TestKit>,
    ) -> AgentResult<EvaluationResult> {
        if responses.is_empty() {
            return Err(AgentError::InvalidInput(
                "no exam responses to evaluate".to_string(),
            ));
        }

        let by_alias = group_by_alias(responses);
        let start = Instant::now();
        info!(
            agent = Self::AGENT_NAME,
            model = %self.judge.model(),
            candidates = by_alias.len(),
            responses = responses.len(),
            "Evaluating transcript"
        );

        let mut options = InvocationOptions::default();
        if let Some(temperature) = self.config.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }

        let prompt = build_prompt(&by_alias, kit);
        let mut result: EvaluationResult = self
            .invoker
            .invoke_structured(&prompt, &self.judge, &EVALUATOR, options)
            .await?;

        let issues = result.contract_issues(by_alias.keys().copied());
        if !issues.is_empty() {
            warn!(
                agent = Self::AGENT_NAME,
                issues = ?issues,
                "Judge ranking does not match the candidate set"
            );
        }
        if self.config.normalize_ranks {
            result.normalize_ranks();
        }

        info!(
            agent = Self::AGENT_NAME,
            entries = result.entries.len(),
            winner = result.winner().map(|w| w.name.as_str()).unwrap_or("<none>"),
            duration_ms = start.elapsed().as_millis() as u64,
            "Evaluation completed"
        );
        Ok(result)
    }
}

fn group_by_alias(responses: &[ExamResponse]) -> BTreeMap<&str, Vec<&ExamResponse>> {
    let mut grouped: BTreeMap<&str, Vec<&ExamResponse>> = BTreeMap::new();
    for response in responses {
        grouped
            .entry(response.model_alias.as_str())
            .or_default()
            .push(response);
    }
    grouped
}

/// Renders the judging prompt: the candidate list and each candidate's answers.
fn build_prompt(by_alias: &BTreeMap<&str, Vec<&ExamResponse>>, kit: Option<&TestKit>) -> String {
    let mut transcript = String::new();
    for (alias, responses) in by_alias {
        let _ = writeln!(transcript, "### Candidate: {}", alias);
        for response in responses {
            let _ = writeln!(transcript, "{}", response);
            if let Some(full_score) = kit.and_then(|k| k.full_score_of(&response.question)) {
                let _ = writeln!(transcript, "Full score: {}", full_score);
            }
            transcript.push('\n');
        }
    }

    let rubric_note = if kit.is_some() {
        ", never more than the question's full score"
    } else {
        ""
    };
    let candidates = by_alias.keys().copied().collect::<Vec<_>>().join(", ");

    EVALUATION_PROMPT_TEMPLATE
        .replace("{count}", &by_alias.len().to_string())
        .replace("{rubric_note}", rubric_note)
        .replace("{candidates}", &candidates)
        .replace("{transcript}", transcript.trim_end())
}
