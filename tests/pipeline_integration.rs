//! End-to-end pipeline tests through the public API with a canned provider.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cognito_score::llm::{
    CandidatesPayload, GenerationRequest, GenerationResponse, LlmProvider, ModelHandle,
    ModelRegistry,
};
use cognito_score::{
    AgentError, EvaluationConfig, FinalResult, LlmError, PipelineOrchestrator,
};

const AUTHOR: &str = "author/model";
const JUDGE: &str = "judge/model";

/// Answers the author with a fixed kit and the judge with a ranking that
/// names every candidate alias listed in its prompt.
struct CannedProvider {
    questions: usize,
    failing_model: Option<String>,
    log: Mutex<Vec<String>>,
}

impl CannedProvider {
    fn new(questions: usize) -> Self {
        Self {
            questions,
            failing_model: None,
            log: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, model: &str) -> Self {
        self.failing_model = Some(model.to_string());
        self
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().expect("lock").clone()
    }

    fn kit(&self) -> String {
        let questions: Vec<String> = (1..=self.questions)
            .map(|i| format!(r#"{{"text": "Question {i}?", "fullScore": 10}}"#))
            .collect();
        format!(r#"{{"questions": [{}]}}"#, questions.join(","))
    }

    fn verdict(prompt: &str) -> String {
        let aliases: Vec<&str> = prompt
            .lines()
            .find_map(|l| l.strip_prefix("Candidates: "))
            .map(|l| l.split(", ").collect())
            .unwrap_or_default();
        let entries: Vec<String> = aliases
            .iter()
            .enumerate()
            .map(|(i, alias)| {
                format!(
                    r#"{{"name": "{alias}", "score": {}, "rank": {}}}"#,
                    20 - i,
                    i + 1
                )
            })
            .collect();
        format!("```json\n{{\"entries\": [{}]}}\n```", entries.join(","))
    }
}

#[async_trait]
impl LlmProvider for CannedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let prompt = request.user_prompt().unwrap_or_default().to_string();
        self.log.lock().expect("lock").push(request.model.clone());
        tokio::task::yield_now().await;

        if self.failing_model.as_deref() == Some(request.model.as_str()) {
            return Err(LlmError::RateLimited("quota exhausted".to_string()));
        }

        let content = match request.model.as_str() {
            AUTHOR => self.kit(),
            JUDGE => Self::verdict(&prompt),
            model => format!("{model} says: {prompt}"),
        };
        Ok(GenerationResponse::from_text(request.model, content))
    }
}

fn config(questions: usize) -> EvaluationConfig {
    EvaluationConfig::default()
        .with_author_model(AUTHOR)
        .with_judge_model(JUDGE)
        .with_question_count(questions)
        .with_max_concurrency(3)
}

async fn evaluate(
    provider: Arc<CannedProvider>,
    models: &str,
    questions: usize,
) -> Result<FinalResult, AgentError> {
    let payload = CandidatesPayload::from_json(models).expect("payload parses");
    let candidates = ModelRegistry::from_payload(provider.clone(), &payload).expect("registry");
    PipelineOrchestrator::from_provider(&config(questions), provider)
        .evaluate(&candidates)
        .await
}

#[tokio::test]
async fn test_full_pipeline_produces_final_result() {
    let provider = Arc::new(CannedProvider::new(3));
    let result = evaluate(
        provider.clone(),
        r#"{"models": {"alpha": "vendor/alpha", "beta": "vendor/beta", "gamma": "vendor/gamma"}}"#,
        3,
    )
    .await
    .expect("pipeline succeeds");

    assert_eq!(result.exam_responses.len(), 9);
    assert_eq!(result.evaluation_result.entries.len(), 3);
    assert_eq!(
        result.evaluation_result.winner().map(|w| w.name.as_str()),
        Some("alpha")
    );

    let pairs: BTreeSet<(&str, &str)> = result
        .exam_responses
        .iter()
        .map(|r| (r.model_alias.as_str(), r.question.as_str()))
        .collect();
    assert_eq!(pairs.len(), 9);

    let log = provider.log();
    assert_eq!(log.first().map(String::as_str), Some(AUTHOR));
    assert_eq!(log.last().map(String::as_str), Some(JUDGE));
    assert_eq!(log.len(), 1 + 9 + 1);
}

#[tokio::test]
async fn test_final_result_serializes_in_camel_case() {
    let provider = Arc::new(CannedProvider::new(1));
    let result = evaluate(provider, r#"{"models": {"solo": "vendor/solo"}}"#, 1)
        .await
        .expect("pipeline succeeds");

    let json = serde_json::to_value(&result).expect("serializes");
    assert_eq!(json["evaluationResult"]["entries"][0]["name"], "solo");
    assert_eq!(json["examResponses"][0]["modelAlias"], "solo");
    assert_eq!(
        json["examResponses"][0]["response"],
        "vendor/solo says: Question 1?"
    );
}

#[tokio::test]
async fn test_candidate_failure_aborts_without_judging() {
    let provider = Arc::new(CannedProvider::new(2).failing("vendor/beta"));
    let err = evaluate(
        provider.clone(),
        r#"{"models": {"alpha": "vendor/alpha", "beta": "vendor/beta"}}"#,
        2,
    )
    .await
    .expect_err("beta fails");

    match err {
        AgentError::Examination { model_alias, .. } => assert_eq!(model_alias, "beta"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!provider.log().iter().any(|m| m == JUDGE));
}

#[tokio::test]
async fn test_handles_can_share_one_provider() {
    let provider = Arc::new(CannedProvider::new(2));
    let candidates = ModelRegistry::new()
        .with_model("x", ModelHandle::new(provider.clone(), "vendor/x"))
        .expect("valid alias");

    let result = PipelineOrchestrator::from_provider(&config(2), provider.clone())
        .evaluate_all(&candidates, 2)
        .await
        .expect("pipeline succeeds");

    assert_eq!(result.responses_of("x").count(), 2);
}
