//! Scripted LLM provider for pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider};

/// A request as seen by the provider, with its global arrival order.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub seq: usize,
    /// Calls that had successfully completed when this one arrived.
    pub completed_before: usize,
    pub request: GenerationRequest,
}

/// Provider whose replies are scripted per model id.
///
/// Models without a script echo the prompt back as
/// `"<model> answers: <prompt>"`.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    replies: HashMap<String, Vec<String>>,
    failures: Vec<(String, String)>,
    hangs: Vec<(String, String)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    cursor: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always reply `reply` to `model`.
    pub fn with_reply(self, model: &str, reply: impl Into<String>) -> Self {
        self.with_reply_sequence(model, [reply.into()])
    }

    /// Reply with each entry in turn; the last one repeats.
    pub fn with_reply_sequence<I, S>(mut self, model: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies.insert(
            model.to_string(),
            replies.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Fail calls to `model` whose prompt contains `fragment`.
    pub fn failing_on(mut self, model: &str, fragment: &str) -> Self {
        self.failures.push((model.to_string(), fragment.to_string()));
        self
    }

    /// Never complete calls to `model` whose prompt contains `fragment`.
    pub fn hanging_on(mut self, model: &str, fragment: &str) -> Self {
        self.hangs.push((model.to_string(), fragment.to_string()));
        self
    }

    /// Sleep before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("lock not poisoned").clone()
    }

    pub fn calls_to(&self, model: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.request.model == model)
            .collect()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn matches(rules: &[(String, String)], model: &str, prompt: &str) -> bool {
        rules
            .iter()
            .any(|(m, fragment)| m == model && prompt.contains(fragment.as_str()))
    }

    fn next_reply(&self, model: &str, prompt: &str) -> String {
        let Some(script) = self.replies.get(model) else {
            return format!("{} answers: {}", model, prompt);
        };
        let mut cursor = self.cursor.lock().expect("lock not poisoned");
        let position = cursor.entry(model.to_string()).or_insert(0);
        let reply = script
            .get(*position)
            .or_else(|| script.last())
            .cloned()
            .unwrap_or_default();
        *position += 1;
        reply
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = request.model.clone();
        let prompt = request.user_prompt().unwrap_or_default().to_string();

        {
            let mut calls = self.calls.lock().expect("lock not poisoned");
            let seq = calls.len();
            calls.push(RecordedCall {
                seq,
                completed_before: self.completed.load(Ordering::SeqCst),
                request,
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if Self::matches(&self.hangs, &model, &prompt) {
            std::future::pending::<()>().await;
        }

        if Self::matches(&self.failures, &model, &prompt) {
            return Err(LlmError::ApiError {
                code: 500,
                message: format!("injected failure for {}", model),
            });
        }

        let reply = self.next_reply(&model, &prompt);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(GenerationResponse::from_text(model, reply))
    }
}
