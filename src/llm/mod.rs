//! LLM integration.
//!
//! [`LlmProvider`] is the seam to model vendors; [`LiteLlmClient`] and
//! [`OpenRouterProvider`] implement it over OpenAI-compatible chat APIs.
//! Candidates are addressed through [`ModelHandle`]s collected in a
//! [`ModelRegistry`], and every pipeline call goes through [`ModelInvoker`].

pub mod invoker;
pub mod litellm;
pub mod providers;
pub mod registry;

pub use invoker::{parse_structured, InvocationOptions, ModelInvoker, StructuredOutput};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
pub use providers::OpenRouterProvider;
pub use registry::{CandidatesPayload, ModelHandle, ModelRegistry, RegistryError};
