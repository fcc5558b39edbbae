//! Named model endpoints available to an evaluation run.
//!
//! A [`ModelRegistry`] maps candidate aliases (the names the judge sees) to
//! [`ModelHandle`]s (a provider plus the model id to request from it). The
//! registry is resolved before the pipeline starts; the pipeline never creates
//! handles on its own.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::LlmProvider;

/// Errors raised while building a registry from caller input.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No models provided")]
    Empty,

    #[error("Duplicate model alias '{0}'")]
    DuplicateAlias(String),

    #[error("Invalid model alias '{0}': aliases must be non-empty and contain no commas or control characters")]
    InvalidAlias(String),

    #[error("Model alias '{alias}' has no model id")]
    MissingModelId { alias: String },

    #[error("Invalid candidate spec '{0}': expected ALIAS=MODEL_ID")]
    InvalidSpec(String),

    #[error("Failed to parse candidate payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Failed to read candidate file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An opaque reference to one chat model endpoint.
#[derive(Clone)]
pub struct ModelHandle {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl ModelHandle {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Model identifier sent with every request through this handle.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Candidate payload as accepted from callers: `{"models": {"alias": "model-id"}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatesPayload {
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

impl CandidatesPayload {
    /// Parses a raw JSON payload and rejects an empty model map.
    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        let payload: CandidatesPayload = serde_json::from_str(raw)?;
        if payload.models.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(payload)
    }

    /// Reads and parses a payload file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Builds a payload from `ALIAS=MODEL_ID` pairs (e.g. CLI arguments).
    pub fn from_specs<I, S>(specs: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut models = BTreeMap::new();
        for spec in specs {
            let spec = spec.as_ref();
            let (alias, model) = spec
                .split_once('=')
                .ok_or_else(|| RegistryError::InvalidSpec(spec.to_string()))?;
            let alias = alias.trim();
            if models
                .insert(alias.to_string(), model.trim().to_string())
                .is_some()
            {
                return Err(RegistryError::DuplicateAlias(alias.to_string()));
            }
        }
        if models.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { models })
    }

    /// Combines two payloads; an alias present in both is an error.
    pub fn merge(mut self, other: CandidatesPayload) -> Result<Self, RegistryError> {
        for (alias, model) in other.models {
            if self.models.contains_key(&alias) {
                return Err(RegistryError::DuplicateAlias(alias));
            }
            self.models.insert(alias, model);
        }
        Ok(self)
    }
}

/// Mapping from candidate alias to model handle. Iteration order is by alias.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, ModelHandle>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds every alias of `payload` to `provider`.
    pub fn from_payload(
        provider: Arc<dyn LlmProvider>,
        payload: &CandidatesPayload,
    ) -> Result<Self, RegistryError> {
        if payload.models.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut registry = Self::new();
        for (alias, model) in &payload.models {
            registry.register(alias, ModelHandle::new(Arc::clone(&provider), model))?;
        }
        Ok(registry)
    }

    /// Adds an entry. Aliases are unique within one registry.
    ///
    /// The judge sees aliases as one comma-separated line, so an alias may not
    /// contain a comma or a control character.
    pub fn register(
        &mut self,
        alias: impl Into<String>,
        handle: ModelHandle,
    ) -> Result<(), RegistryError> {
        let alias = alias.into();
        if alias.trim().is_empty() || alias.chars().any(|c| c == ',' || c.is_control()) {
            return Err(RegistryError::InvalidAlias(alias));
        }
        if handle.model().trim().is_empty() {
            return Err(RegistryError::MissingModelId { alias });
        }
        if self.entries.contains_key(&alias) {
            return Err(RegistryError::DuplicateAlias(alias));
        }
        self.entries.insert(alias, handle);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_model(
        mut self,
        alias: impl Into<String>,
        handle: ModelHandle,
    ) -> Result<Self, RegistryError> {
        self.register(alias, handle)?;
        Ok(self)
    }

    pub fn get(&self, alias: &str) -> Option<&ModelHandle> {
        self.entries.get(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelHandle)> {
        self.entries.iter().map(|(alias, handle)| (alias.as_str(), handle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
