//! Evaluation run configuration.
//!
//! Defaults can be overridden programmatically with the `with_*` builders or
//! from `COGNITO_*` environment variables.

use std::time::Duration;

use thiserror::Error;

use crate::agents::evaluation_aggregator::EvaluationAggregatorConfig;
use crate::agents::examination_runner::ExaminationRunnerConfig;
use crate::agents::test_kit_generator::TestKitGeneratorConfig;
use crate::llm::{InvocationOptions, ModelInvoker};

/// Default model used both to author the exam and to judge it.
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Settings for one evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    /// Number of questions in the generated test kit.
    pub question_count: usize,
    /// Model that writes the test kit.
    pub author_model: String,
    /// Model that judges the transcript.
    pub judge_model: String,
    pub author_temperature: f64,
    pub judge_temperature: Option<f64>,
    /// Maximum examination units running at once.
    pub max_concurrency: usize,
    /// Bounded wait for the examination pool to wind down after a failure.
    pub shutdown_grace: Duration,
    /// Token limit applied to every invocation.
    pub max_tokens: Option<u32>,
    /// Attempts per structured call; values above 1 re-prompt on unparsable replies.
    pub structured_attempts: u32,
    /// Rewrite the judge's ranks as 1..N by score.
    pub normalize_ranks: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            question_count: 3,
            author_model: DEFAULT_MODEL.to_string(),
            judge_model: DEFAULT_MODEL.to_string(),
            author_temperature: 0.5,
            judge_temperature: None,
            max_concurrency: 10,
            shutdown_grace: Duration::from_secs(60),
            max_tokens: None,
            structured_attempts: 1,
            normalize_ranks: false,
        }
    }
}

impl EvaluationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("COGNITO_QUESTION_COUNT") {
            config.question_count = parse_env_value(&val, "COGNITO_QUESTION_COUNT")?;
        }

        if let Some(val) = lookup("COGNITO_AUTHOR_MODEL") {
            config.author_model = val;
        }

        if let Some(val) = lookup("COGNITO_JUDGE_MODEL") {
            config.judge_model = val;
        }

        if let Some(val) = lookup("COGNITO_AUTHOR_TEMPERATURE") {
            config.author_temperature = parse_env_value(&val, "COGNITO_AUTHOR_TEMPERATURE")?;
        }

        if let Some(val) = lookup("COGNITO_JUDGE_TEMPERATURE") {
            config.judge_temperature = Some(parse_env_value(&val, "COGNITO_JUDGE_TEMPERATURE")?);
        }

        if let Some(val) = lookup("COGNITO_MAX_CONCURRENCY") {
            config.max_concurrency = parse_env_value(&val, "COGNITO_MAX_CONCURRENCY")?;
        }

        if let Some(val) = lookup("COGNITO_SHUTDOWN_GRACE_SECS") {
            let secs: u64 = parse_env_value(&val, "COGNITO_SHUTDOWN_GRACE_SECS")?;
            config.shutdown_grace = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("COGNITO_MAX_TOKENS") {
            config.max_tokens = Some(parse_env_value(&val, "COGNITO_MAX_TOKENS")?);
        }

        if let Some(val) = lookup("COGNITO_STRUCTURED_ATTEMPTS") {
            config.structured_attempts = parse_env_value(&val, "COGNITO_STRUCTURED_ATTEMPTS")?;
        }

        if let Some(val) = lookup("COGNITO_NORMALIZE_RANKS") {
            config.normalize_ranks = parse_env_bool(&val, "COGNITO_NORMALIZE_RANKS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.question_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "question_count must be greater than 0".to_string(),
            ));
        }

        if self.author_model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "author_model cannot be empty".to_string(),
            ));
        }

        if self.judge_model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "judge_model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.author_temperature) {
            return Err(ConfigError::ValidationFailed(
                "author_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if let Some(t) = self.judge_temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationFailed(
                    "judge_temperature must be between 0.0 and 2.0".to_string(),
                ));
            }
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_tokens == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.structured_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "structured_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_question_count(mut self, count: usize) -> Self {
        self.question_count = count;
        self
    }

    pub fn with_author_model(mut self, model: impl Into<String>) -> Self {
        self.author_model = model.into();
        self
    }

    pub fn with_judge_model(mut self, model: impl Into<String>) -> Self {
        self.judge_model = model.into();
        self
    }

    pub fn with_author_temperature(mut self, temperature: f64) -> Self {
        self.author_temperature = temperature;
        self
    }

    pub fn with_judge_temperature(mut self, temperature: f64) -> Self {
        self.judge_temperature = Some(temperature);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_structured_attempts(mut self, attempts: u32) -> Self {
        self.structured_attempts = attempts;
        self
    }

    pub fn with_normalize_ranks(mut self, normalize: bool) -> Self {
        self.normalize_ranks = normalize;
        self
    }

    /// Invoker shared by all stages of a run.
    pub fn invoker(&self) -> ModelInvoker {
        let mut defaults = InvocationOptions::default();
        if let Some(max_tokens) = self.max_tokens {
            defaults = defaults.with_max_tokens(max_tokens);
        }
        ModelInvoker::new()
            .with_defaults(defaults)
            .with_structured_attempts(self.structured_attempts)
    }

    pub fn test_kit_generator_config(&self) -> TestKitGeneratorConfig {
        TestKitGeneratorConfig {
            temperature: self.author_temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn examination_runner_config(&self) -> ExaminationRunnerConfig {
        ExaminationRunnerConfig {
            max_concurrency: self.max_concurrency,
            shutdown_grace: self.shutdown_grace,
            temperature: None,
            max_tokens: self.max_tokens,
        }
    }

    pub fn evaluation_aggregator_config(&self) -> EvaluationAggregatorConfig {
        EvaluationAggregatorConfig {
            temperature: self.judge_temperature,
            max_tokens: self.max_tokens,
            normalize_ranks: self.normalize_ranks,
        }
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
