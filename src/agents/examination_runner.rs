//! Parallel examination of candidate models.
//!
//! Every (candidate, question) pair is an independent unit of work. Units are
//! executed by a bounded pool of tokio workers scoped to a single
//! [`ExaminationRunner::run`] call:
//!
//! - the pool has `min(pairs, max_concurrency)` workers pulling from a
//!   pre-filled queue
//! - each unit reports into its own pre-sized slot, written exactly once
//! - the first failing unit stops dispatch, cancels in-flight units through a
//!   broadcast shutdown signal, and fails the whole run
//! - workers are joined within a grace period and aborted past it

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::llm::{InvocationOptions, ModelHandle, ModelInvoker, ModelRegistry};

use super::error::{AgentError, AgentResult};
use super::persona::EXAMINER;
use super::types::{ExamResponse, TestKit};

/// Configuration for the [`ExaminationRunner`].
#[derive(Debug, Clone)]
pub struct ExaminationRunnerConfig {
    /// Upper bound on concurrently running units.
    pub max_concurrency: usize,
    /// How long to wait for workers to wind down before aborting them.
    pub shutdown_grace: Duration,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for ExaminationRunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            shutdown_grace: Duration::from_secs(60),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ExaminationRunnerConfig {
    /// Sets the concurrency cap (minimum 1).
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn options(&self) -> InvocationOptions {
        InvocationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// One scheduled (candidate, question) pair.
struct ExamUnit {
    slot: usize,
    alias: String,
    question: String,
    handle: ModelHandle,
}

type UnitReport = (usize, AgentResult<ExamResponse>);

/// Poses every question of a test kit to every candidate.
#[derive(Debug, Clone)]
pub struct ExaminationRunner {
    invoker: ModelInvoker,
    config: ExaminationRunnerConfig,
}

impl ExaminationRunner {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "examination_runner";

    pub fn new(invoker: ModelInvoker, config: ExaminationRunnerConfig) -> Self {
        Self { invoker, config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ModelInvoker::new(), ExaminationRunnerConfig::default())
    }

    pub fn config(&self) -> &ExaminationRunnerConfig {
        &self.config
    }

    /// Runs the full candidates × questions examination.
    ///
    /// On success the result holds exactly one [`ExamResponse`] per pair,
    /// ordered by candidate alias and then question order. On failure no
    /// partial result is returned.
    ///
    /// # Errors
    ///
    /// - [`AgentError::InvalidInput`] if there are no candidates or no
    ///   questions; no model is called in that case
    /// - [`AgentError::Examination`] wrapping the first failing unit
    /// - [`AgentError::Channel`] if a worker vanished without reporting
    pub async fn run(
        &self,
        candidates: &ModelRegistry,
        kit: &TestKit,
    ) -> AgentResult<Vec<ExamResponse>> {
        if candidates.is_empty() {
            return Err(AgentError::InvalidInput(
                "candidate set must not be empty".to_string(),
            ));
        }
        if kit.is_empty() {
            return Err(AgentError::InvalidInput(
                "test kit must contain at least one question".to_string(),
            ));
        }

        let units = Self::schedule(candidates, kit);
        let total = units.len();
        let num_workers = total.min(self.config.max_concurrency.max(1));
        let start = Instant::now();

        info!(
            agent = Self::AGENT_NAME,
            candidates = candidates.len(),
            questions = kit.len(),
            units = total,
            workers = num_workers,
            "Starting examination"
        );

        let queue = Arc::new(Mutex::new(units));
        let (result_tx, mut result_rx) = mpsc::channel::<UnitReport>(total);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let mut handles = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let worker = ExamWorker {
                id,
                queue: Arc::clone(&queue),
                invoker: self.invoker.clone(),
                options: self.config.options(),
                results: result_tx.clone(),
                shutdown: shutdown_tx.subscribe(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        drop(result_tx);

        let mut slots: Vec<Option<ExamResponse>> = vec![None; total];
        let mut failure = None;
        while let Some((slot, report)) = result_rx.recv().await {
            match report {
                Ok(response) => slots[slot] = Some(response),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if failure.is_some() {
            // Stop dispatch and cancel whatever is still in flight.
            if let Ok(mut pending) = queue.lock() {
                pending.clear();
            }
            let _ = shutdown_tx.send(());
        }
        drop(result_rx);
        self.teardown(handles).await;

        if let Some(err) = failure {
            error!(
                agent = Self::AGENT_NAME,
                kind = err.kind(),
                error = %err,
                duration_ms = start.elapsed().as_millis() as u64,
                "Examination failed"
            );
            return Err(err);
        }

        let responses: Vec<ExamResponse> = slots.into_iter().flatten().collect();
        if responses.len() != total {
            return Err(AgentError::Channel(format!(
                "{} of {} examination units never reported",
                total - responses.len(),
                total
            )));
        }

        info!(
            agent = Self::AGENT_NAME,
            responses = responses.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Examination completed"
        );
        Ok(responses)
    }

    fn schedule(candidates: &ModelRegistry, kit: &TestKit) -> VecDeque<ExamUnit> {
        let mut units = VecDeque::with_capacity(candidates.len() * kit.len());
        for (alias, handle) in candidates.iter() {
            for question in &kit.questions {
                let slot = units.len();
                units.push_back(ExamUnit {
                    slot,
                    alias: alias.to_string(),
                    question: question.text.clone(),
                    handle: handle.clone(),
                });
            }
        }
        units
    }

    /// Joins all workers within the grace period, aborting stragglers.
    async fn teardown(&self, mut handles: Vec<JoinHandle<()>>) {
        let grace = self.config.shutdown_grace;
        let joined = tokio::time::timeout(
            grace,
            futures::future::join_all(handles.iter_mut()),
        )
        .await;

        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(agent = Self::AGENT_NAME, error = %e, "Examination worker panicked");
                        }
                    }
                }
            }
            Err(_) => {
                warn!(
                    agent = Self::AGENT_NAME,
                    grace_ms = grace.as_millis() as u64,
                    "Workers did not stop within the grace period, aborting"
                );
                for handle in &handles {
                    handle.abort();
                }
            }
        }
    }
}

/// A single pool worker.
struct ExamWorker {
    id: usize,
    queue: Arc<Mutex<VecDeque<ExamUnit>>>,
    invoker: ModelInvoker,
    options: InvocationOptions,
    results: mpsc::Sender<UnitReport>,
    shutdown: broadcast::Receiver<()>,
}

impl ExamWorker {
    async fn run(self) {
        let ExamWorker {
            id,
            queue,
            invoker,
            options,
            results,
            mut shutdown,
        } = self;
        debug!(worker_id = id, "Examination worker started");

        while let Some(unit) = next_unit(&queue) {
            let report = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!(worker_id = id, model_alias = %unit.alias, "Unit cancelled");
                    break;
                }
                result = examine(id, &invoker, options, &unit) => result,
            };

            let failed = report.is_err();
            if results.send((unit.slot, report)).await.is_err() || failed {
                break;
            }
        }

        debug!(worker_id = id, "Examination worker stopped");
    }
}

fn next_unit(queue: &Mutex<VecDeque<ExamUnit>>) -> Option<ExamUnit> {
    queue.lock().ok()?.pop_front()
}

async fn examine(
    worker_id: usize,
    invoker: &ModelInvoker,
    options: InvocationOptions,
    unit: &ExamUnit,
) -> AgentResult<ExamResponse> {
    let started = Instant::now();
    match invoker
        .invoke_text(&unit.question, &unit.handle, &EXAMINER, options)
        .await
    {
        Ok(response) => {
            debug!(
                worker_id = worker_id,
                model_alias = %unit.alias,
                duration_ms = started.elapsed().as_millis() as u64,
                "Unit completed"
            );
            Ok(ExamResponse::new(&unit.question, response, &unit.alias))
        }
        Err(err) => {
            warn!(
                worker_id = worker_id,
                model_alias = %unit.alias,
                error = %err,
                "Unit failed"
            );
            Err(AgentError::examination(&unit.alias, &unit.question, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedProvider;
    use crate::agents::types::Question;
    use std::collections::BTreeSet;

    fn registry(provider: &Arc<ScriptedProvider>, aliases: &[&str]) -> ModelRegistry {
        aliases.iter().fold(ModelRegistry::new(), |registry, alias| {
            registry
                .with_model(*alias, ModelHandle::new(provider.clone(), *alias))
                .expect("alias is valid")
        })
    }

    fn kit(texts: &[&str]) -> TestKit {
        TestKit::new(texts.iter().map(|t| Question::new(*t, 10)).collect())
    }

    fn runner(max_concurrency: usize) -> ExaminationRunner {
        ExaminationRunner::new(
            ModelInvoker::new(),
            ExaminationRunnerConfig::default()
                .with_max_concurrency(max_concurrency)
                .with_shutdown_grace(Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn test_runs_full_cross_product() {
        let provider = Arc::new(ScriptedProvider::new());
        let candidates = registry(&provider, &["modelA", "modelB"]);

        let responses = runner(10)
            .run(&candidates, &kit(&["Q1", "Q2"]))
            .await
            .expect("examination succeeds");

        assert_eq!(responses.len(), 4);
        assert_eq!(provider.calls().len(), 4);

        let pairs: BTreeSet<(String, String)> = responses
            .iter()
            .map(|r| (r.model_alias.clone(), r.question.clone()))
            .collect();
        let expected: BTreeSet<(String, String)> = ["modelA", "modelB"]
            .iter()
            .flat_map(|a| ["Q1", "Q2"].iter().map(move |q| (a.to_string(), q.to_string())))
            .collect();
        assert_eq!(pairs, expected);

        let answer = responses
            .iter()
            .find(|r| r.model_alias == "modelB" && r.question == "Q2")
            .expect("pair present");
        assert_eq!(answer.response, "modelB answers: Q2");
    }

    #[tokio::test]
    async fn test_uses_examiner_persona() {
        let provider = Arc::new(ScriptedProvider::new());
        runner(1)
            .run(&registry(&provider, &["m"]), &kit(&["Q"]))
            .await
            .expect("succeeds");

        let calls = provider.calls();
        assert!(calls[0].request.messages[0].content.contains("Examiner"));
        assert_eq!(calls[0].request.user_prompt(), Some("Q"));
    }

    #[tokio::test]
    async fn test_empty_inputs_make_no_calls() {
        let provider = Arc::new(ScriptedProvider::new());

        let err = runner(10)
            .run(&ModelRegistry::new(), &kit(&["Q1"]))
            .await
            .expect_err("no candidates");
        assert!(matches!(err, AgentError::InvalidInput(_)));

        let err = runner(10)
            .run(&registry(&provider, &["a"]), &kit(&[]))
            .await
            .expect_err("no questions");
        assert!(matches!(err, AgentError::InvalidInput(_)));

        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_failure_fails_the_run() {
        let provider = Arc::new(ScriptedProvider::new().failing_on("b", "Q2"));
        let candidates = registry(&provider, &["a", "b", "c"]);

        let err = runner(10)
            .run(&candidates, &kit(&["Q1", "Q2", "Q3"]))
            .await
            .expect_err("one unit fails");

        match err {
            AgentError::Examination {
                model_alias,
                question,
                source,
            } => {
                assert_eq!(model_alias, "b");
                assert_eq!(question, "Q2");
                assert!(matches!(*source, AgentError::Provider(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_cancels_hanging_units() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .hanging_on("a", "Q1")
                .failing_on("b", "Q2"),
        );
        let candidates = registry(&provider, &["a", "b"]);

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            runner(10).run(&candidates, &kit(&["Q1", "Q2"])),
        )
        .await
        .expect("run returns without waiting for the hanging unit");

        assert!(matches!(outcome, Err(AgentError::Examination { .. })));
    }

    #[tokio::test]
    async fn test_failure_stops_dispatch() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_delay(Duration::from_millis(50))
                .failing_on("a", "Q1"),
        );
        let candidates = registry(&provider, &["a", "b"]);

        let err = runner(1)
            .run(&candidates, &kit(&["Q1", "Q2", "Q3"]))
            .await
            .expect_err("first unit fails");

        assert!(matches!(err, AgentError::Examination { .. }));
        assert!(provider.calls().len() <= 2);
        assert_eq!(provider.completed(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_millis(20)));
        let candidates = registry(&provider, &["a", "b", "c"]);

        let responses = runner(2)
            .run(&candidates, &kit(&["Q1", "Q2", "Q3", "Q4"]))
            .await
            .expect("succeeds");

        assert_eq!(responses.len(), 12);
        assert_eq!(provider.calls().len(), 12);
        assert!(provider.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_responses_follow_schedule_order() {
        let provider = Arc::new(ScriptedProvider::new());
        let candidates = registry(&provider, &["b", "a"]);

        let responses = runner(4)
            .run(&candidates, &kit(&["Q1", "Q2"]))
            .await
            .expect("succeeds");

        let order: Vec<_> = responses
            .iter()
            .map(|r| format!("{}/{}", r.model_alias, r.question))
            .collect();
        assert_eq!(order, vec!["a/Q1", "a/Q2", "b/Q1", "b/Q2"]);
    }
}
