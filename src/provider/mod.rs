//! Boundary to the external LLM assistant job system.
//!
//! The chat core only sees the [`AssistantJobs`] trait: submit work, poll run
//! status, list the latest message, or consume an incremental event stream.
//! [`openai::OpenAiAssistantClient`] is the production implementation.

pub mod openai;
mod sse;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use types::{
    AssistantConfig, ContentPart, ListedMessage, MessageRole, RawReply, RunHandle, RunStatus,
    RunStreamEvent, SeedMessage, TextPayload,
};

/// Provider boundary error type.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success response from the provider API.
    #[error("provider api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider-supplied message, when present.
        message: String,
    },
    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// The event stream ended abnormally or carried a malformed frame.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Convenience result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Ordered stream of run events.
pub type RunEventStream = Pin<Box<dyn Stream<Item = ProviderResult<RunStreamEvent>> + Send>>;

/// External assistant job capability.
#[async_trait]
pub trait AssistantJobs: Send + Sync {
    /// Fetch provider-side assistant settings by id.
    ///
    /// # Errors
    /// Returns an error if the provider call fails.
    async fn fetch_assistant(&self, assistant_id: &str) -> ProviderResult<AssistantConfig>;

    /// Create a conversation seeded with `messages` and start a run on it.
    /// The returned handle carries the provider-minted conversation id.
    ///
    /// # Errors
    /// Returns an error if submission fails.
    async fn create_conversation_run(
        &self,
        assistant_id: &str,
        messages: Vec<SeedMessage>,
        structured: bool,
    ) -> ProviderResult<RunHandle>;

    /// Append a user message to an existing conversation.
    ///
    /// # Errors
    /// Returns an error if submission fails.
    async fn append_message(&self, conversation_id: &str, content: &str) -> ProviderResult<()>;

    /// Start a run on an existing conversation.
    ///
    /// # Errors
    /// Returns an error if submission fails.
    async fn create_run(
        &self,
        conversation_id: &str,
        assistant_id: &str,
        structured: bool,
    ) -> ProviderResult<RunHandle>;

    /// Fetch the current status of a run.
    ///
    /// # Errors
    /// Returns an error if the provider call fails.
    async fn fetch_run(&self, conversation_id: &str, run_id: &str) -> ProviderResult<RunStatus>;

    /// Fetch the newest message of a conversation, if any.
    ///
    /// # Errors
    /// Returns an error if the provider call fails.
    async fn latest_message(
        &self,
        conversation_id: &str,
    ) -> ProviderResult<Option<ListedMessage>>;

    /// Create a conversation seeded with `messages` and stream run events.
    ///
    /// # Errors
    /// Returns an error if submission fails; stream items carry their own
    /// errors afterwards.
    async fn stream_conversation_run(
        &self,
        assistant_id: &str,
        messages: Vec<SeedMessage>,
        structured: bool,
    ) -> ProviderResult<RunEventStream>;

    /// Start a run on an existing conversation and stream its events.
    ///
    /// # Errors
    /// Returns an error if submission fails; stream items carry their own
    /// errors afterwards.
    async fn stream_run(
        &self,
        conversation_id: &str,
        assistant_id: &str,
        structured: bool,
    ) -> ProviderResult<RunEventStream>;
}
