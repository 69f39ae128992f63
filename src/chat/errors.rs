//! Error types for the chat subsystem.

use thiserror::Error;

use crate::provider::{ProviderError, RunStatus};
use crate::storage::StorageError;

/// Chat subsystem error type.
///
/// Every aborted turn surfaces exactly one of these; the transport layer maps
/// them all to a single generic user-facing failure notice.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No assistant registered under the requested name.
    #[error("no assistant registered under name '{0}'")]
    UnknownAssistant(String),
    /// Assistant configuration could not be fetched from the provider.
    #[error("assistant configuration unavailable for '{assistant_id}': {source}")]
    AssistantConfigUnavailable {
        /// The assistant whose configuration was requested.
        assistant_id: String,
        /// Underlying provider failure.
        #[source]
        source: ProviderError,
    },
    /// The run reached a terminal failure state.
    #[error("run failed with status {status} (conversation {conversation_id:?})")]
    RunFailed {
        /// Terminal status reported by the provider.
        status: RunStatus,
        /// Conversation the run belonged to, when known.
        conversation_id: Option<String>,
    },
    /// The polling loop exhausted its attempt budget.
    #[error("run did not complete in time (conversation {conversation_id:?})")]
    RunTimedOut {
        /// Conversation the run belonged to, when known.
        conversation_id: Option<String>,
    },
    /// The caller aborted the wait.
    #[error("run cancelled (conversation {conversation_id:?})")]
    RunCancelled {
        /// Conversation the run belonged to, when known.
        conversation_id: Option<String>,
    },
    /// Assistant output did not have a renderable shape.
    #[error("malformed reply: {0}")]
    MalformedReply(String),
    /// A structured reply was not parseable as JSON.
    #[error("structured reply is not valid JSON: {source}")]
    StructuredParse {
        /// Underlying JSON parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),
    /// Provider transport or submission failure.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
