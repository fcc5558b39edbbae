//! Persona-conditioned model invocation.
//!
//! [`ModelInvoker`] is the single path by which the pipeline talks to models:
//! it renders a [`Persona`] into the system message, sends the prompt through
//! the handle's provider, and for structured calls extracts and deserializes
//! JSON from the reply.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::agents::error::{AgentError, AgentResult};
use crate::agents::persona::Persona;
use crate::error::LlmError;
use crate::utils::json_extraction::{
    extract_json_candidates, preview, try_extract_json_from_response, JsonExtractionResult,
};

use super::{GenerationRequest, Message, ModelHandle};

/// A type a model can be asked to produce as JSON.
pub trait StructuredOutput: DeserializeOwned {
    /// Name used in prompts and error messages.
    const TYPE_NAME: &'static str;
    /// Example JSON shape appended to the prompt.
    const SHAPE_HINT: &'static str;
}

/// Per-call sampling options.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InvocationOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl InvocationOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Keeps explicit values and fills the rest from `defaults`.
    pub fn or(self, defaults: InvocationOptions) -> Self {
        Self {
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
        }
    }
}

/// Sends persona-conditioned prompts to model handles.
#[derive(Debug, Clone)]
pub struct ModelInvoker {
    defaults: InvocationOptions,
    structured_attempts: u32,
}

impl Default for ModelInvoker {
    fn default() -> Self {
        Self {
            defaults: InvocationOptions::default(),
            structured_attempts: 1,
        }
    }
}

impl ModelInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options applied to every call unless the call overrides them.
    pub fn with_defaults(mut self, defaults: InvocationOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Total attempts for a structured call whose reply cannot be parsed (minimum 1).
    ///
    /// Provider errors are never retried here.
    pub fn with_structured_attempts(mut self, attempts: u32) -> Self {
        self.structured_attempts = attempts.max(1);
        self
    }

    pub fn structured_attempts(&self) -> u32 {
        self.structured_attempts
    }

    /// Invokes `handle` with `prompt` under `persona` and returns the reply text.
    pub async fn invoke_text(
        &self,
        prompt: &str,
        handle: &ModelHandle,
        persona: &Persona,
        options: InvocationOptions,
    ) -> AgentResult<String> {
        let options = options.or(self.defaults);
        let mut request = GenerationRequest::new(
            handle.model(),
            vec![Message::system(persona.system_prompt()), Message::user(prompt)],
        );
        if let Some(temperature) = options.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        debug!(model = %handle.model(), role = persona.role, "Invoking model");

        let response = handle.provider().generate(request).await?;
        match response.first_content() {
            Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
            _ => Err(AgentError::Provider(LlmError::EmptyResponse {
                model: handle.model().to_string(),
            })),
        }
    }

    /// Invokes `handle` and parses the reply as `T`.
    ///
    /// Fails with [`AgentError::Generation`] when the reply holds no JSON, holds
    /// truncated JSON, or holds JSON of the wrong shape.
    pub async fn invoke_structured<T: StructuredOutput>(
        &self,
        prompt: &str,
        handle: &ModelHandle,
        persona: &Persona,
        options: InvocationOptions,
    ) -> AgentResult<T> {
        let structured_prompt = format!(
            "{prompt}\n\nRespond with ONLY a JSON object of type {name} in this exact format:\n{hint}\n\nDo not include any text outside the JSON object.",
            prompt = prompt.trim(),
            name = T::TYPE_NAME,
            hint = T::SHAPE_HINT,
        );

        let mut last_error = None;
        for attempt in 1..=self.structured_attempts {
            let content = self
                .invoke_text(&structured_prompt, handle, persona, options)
                .await?;

            match parse_structured::<T>(&content) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        model = %handle.model(),
                        target = T::TYPE_NAME,
                        attempt = attempt,
                        max_attempts = self.structured_attempts,
                        error = %err,
                        "Structured output could not be parsed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AgentError::Generation(format!("No attempt made to produce {}", T::TYPE_NAME))
        }))
    }
}

/// Extracts JSON from a model reply and deserializes it as `T`.
///
/// Candidates are tried from most to least likely; the first one of the
/// right shape wins. When none fit, the error names the most likely one.
pub fn parse_structured<T: StructuredOutput>(content: &str) -> AgentResult<T> {
    let mut first_error = None;
    for json in extract_json_candidates(content) {
        match serde_json::from_str::<T>(&json) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(AgentError::Generation(format!(
            "Reply is not a valid {}: {}",
            T::TYPE_NAME,
            e
        )));
    }

    match try_extract_json_from_response(content) {
        JsonExtractionResult::Success(_) => Err(AgentError::Generation(format!(
            "No {} JSON found in reply",
            T::TYPE_NAME
        ))),
        JsonExtractionResult::Truncated {
            partial_json,
            unclosed_braces,
            unclosed_brackets,
        } => Err(AgentError::Generation(format!(
            "{} JSON appears truncated: {} unclosed braces, {} unclosed brackets. Partial: {}...",
            T::TYPE_NAME,
            unclosed_braces,
            unclosed_brackets,
            preview(&partial_json, 200)
        ))),
        JsonExtractionResult::NotFound => Err(AgentError::Generation(format!(
            "No {} JSON found in reply. Content starts with: '{}'",
            T::TYPE_NAME,
            preview(content.trim(), 100)
        ))),
    }
}
