//! Conversation orchestration for the relay agent.
//!
//! A turn flows: resolve context (user upsert ∥ assistant-id lookup) →
//! resolve assistant configuration → submit the run and drive it to
//! completion → normalize the reply → persist the exchange → return the
//! reply. The outbound chunker plans delivery at the transport boundary.

pub mod config;
pub mod delivery;
pub mod directory;
pub mod errors;
pub mod executor;
pub mod normalizer;
pub mod recorder;
pub mod resolver;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

pub use config::{ChatConfig, DeliveryConfig, PersistencePolicy, PollConfig};
pub use delivery::{plan_delivery, DeliveryPlan};
pub use directory::AssistantDirectory;
pub use errors::{ChatError, ChatResult};
pub use executor::{RunExecutor, RunOutcome, RunRequest};
pub use normalizer::normalize;
pub use recorder::{ExchangeRecorder, PersistenceTicket};
pub use resolver::{ConversationResolver, TurnContext};

use crate::provider::{AssistantJobs, SeedMessage};
use crate::storage::{AssistantDirectoryStore, MessageStore, NewExchange, UserStore};

/// Shape of the reply requested for a turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// Free-text conversational reply, reusing conversation history.
    #[default]
    Text,
    /// Strict-JSON reply in a fresh conversation.
    Structured,
}

/// How the run is driven to completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Poll run status with bounded retries and backoff.
    #[default]
    Poll,
    /// Consume the provider's incremental event stream.
    Stream,
}

/// One inbound turn.
#[derive(Debug)]
pub struct TurnRequest {
    /// Opaque identity from the chat surface.
    pub platform_id: String,
    /// Display name used when the user is first seen.
    pub username: String,
    /// The user's message.
    pub message: String,
    /// Assistant to use; falls back to the configured default.
    pub assistant_name: Option<String>,
    /// Requested reply shape.
    pub mode: ReplyMode,
    /// How to drive the run.
    pub run_mode: RunMode,
    /// Optional cancellation signal for the polling wait.
    pub cancel: Option<Arc<Notify>>,
}

impl TurnRequest {
    /// Build a plain text-mode poll-driven turn.
    #[must_use]
    pub fn text(platform_id: impl Into<String>, username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            username: username.into(),
            message: message.into(),
            assistant_name: None,
            mode: ReplyMode::Text,
            run_mode: RunMode::Poll,
            cancel: None,
        }
    }
}

/// Result of a completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The normalized reply.
    pub reply: String,
    /// Correlation id shared by the persisted message pair.
    pub exchange_id: Uuid,
    /// Conversation the turn happened in.
    pub conversation_id: String,
    /// Observable persistence outcome.
    pub persistence: PersistenceTicket,
}

/// The conversation/run orchestrator.
pub struct ChatService {
    config: ChatConfig,
    directory: AssistantDirectory,
    resolver: ConversationResolver,
    executor: RunExecutor,
    recorder: ExchangeRecorder,
}

impl ChatService {
    /// Wire a chat service from its stores and provider.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: ChatConfig,
        provider: Arc<dyn AssistantJobs>,
        users: Arc<dyn UserStore>,
        messages: Arc<dyn MessageStore>,
        assistants: Arc<dyn AssistantDirectoryStore>,
    ) -> ChatResult<Self> {
        config.validate()?;
        let directory = AssistantDirectory::new(assistants, Arc::clone(&provider));
        let resolver = ConversationResolver::new(users, Arc::clone(&messages));
        let executor = RunExecutor::new(provider, config.poll.clone());
        let recorder = ExchangeRecorder::new(messages, config.persistence);

        Ok(Self {
            config,
            directory,
            resolver,
            executor,
            recorder,
        })
    }

    /// Delivery thresholds in effect, for transport-side planning.
    #[must_use]
    pub const fn delivery_config(&self) -> &DeliveryConfig {
        &self.config.delivery
    }

    /// Run one full turn and return the reply.
    ///
    /// # Errors
    /// Any submission, polling, streaming or normalization failure aborts the
    /// turn before persistence. Persistence failures follow the configured
    /// [`PersistencePolicy`].
    pub async fn generate_reply(&self, request: TurnRequest) -> ChatResult<TurnOutcome> {
        let assistant_name = request
            .assistant_name
            .as_deref()
            .unwrap_or(&self.config.default_assistant.0);
        info!(
            platform_id = %request.platform_id,
            assistant = assistant_name,
            mode = ?request.mode,
            "turn started"
        );

        // User upsert and assistant-id lookup are independent; run them
        // concurrently.
        let (context, assistant_id) = tokio::try_join!(
            self.resolver
                .resolve_context(&request.platform_id, &request.username, request.mode),
            self.directory.resolve_assistant_id(assistant_name),
        )?;

        let assistant_config = self.directory.resolve_config(&assistant_id).await?;

        let structured = request.mode == ReplyMode::Structured;
        let mut seed_messages = Vec::new();
        if structured {
            let mut preamble = assistant_config
                .instructions
                .unwrap_or_else(|| "You are an assistant.".to_string());
            preamble.push_str(" Provide the response in strict JSON format.");
            seed_messages.push(SeedMessage::user(preamble));
        }
        seed_messages.push(SeedMessage::user(request.message.clone()));

        let run_request = RunRequest {
            assistant_id,
            conversation_id: context.conversation_id,
            seed_messages,
            user_message: request.message.clone(),
            structured,
            cancel: request.cancel,
        };

        let outcome = match request.run_mode {
            RunMode::Poll => self.executor.execute(run_request).await?,
            RunMode::Stream => self.executor.execute_streaming(run_request).await?,
        };

        let reply = normalize(&outcome.raw, request.mode)?;
        debug!(
            conversation_id = %outcome.conversation_id,
            reply_chars = reply.chars().count(),
            "reply normalized"
        );

        let exchange_id = Uuid::new_v4();
        let persistence = self
            .recorder
            .record(NewExchange {
                user_id: context.user.id,
                exchange_id,
                user_message: request.message,
                bot_reply: reply.clone(),
                conversation_id: Some(outcome.conversation_id.clone()),
            })
            .await?;

        info!(
            platform_id = %request.platform_id,
            %exchange_id,
            conversation_id = %outcome.conversation_id,
            "turn completed"
        );

        Ok(TurnOutcome {
            reply,
            exchange_id,
            conversation_id: outcome.conversation_id,
            persistence,
        })
    }

    /// Soft-delete the user's history and clear the conversation pointer so
    /// the next text-mode turn starts fresh. Returns whether the user existed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn reset_context(&self, platform_id: &str) -> ChatResult<bool> {
        let Some(user) = self.resolver.find_user(platform_id).await? else {
            return Ok(false);
        };
        let touched = self.resolver.clear_history(user.id).await?;
        info!(platform_id, touched, "conversation context reset");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::chat::testing::{FakeDirectoryStore, FakeMessageStore, FakeProvider, FakeUserStore};
    use crate::provider::RunStatus;

    struct Harness {
        provider: Arc<FakeProvider>,
        messages: Arc<FakeMessageStore>,
        service: ChatService,
    }

    fn harness(config: ChatConfig, latest_conversation: Option<&str>) -> Harness {
        let provider = Arc::new(FakeProvider::default());
        provider.push_statuses(&[RunStatus::Completed]);
        let messages = match latest_conversation {
            Some(conv) => Arc::new(FakeMessageStore::with_latest(conv)),
            None => Arc::new(FakeMessageStore::default()),
        };
        let service = ChatService::new(
            config,
            Arc::clone(&provider) as Arc<dyn AssistantJobs>,
            Arc::new(FakeUserStore::default()),
            Arc::clone(&messages) as Arc<dyn MessageStore>,
            Arc::new(FakeDirectoryStore::with_entry("default", "asst_1")),
        )
        .unwrap();
        Harness {
            provider,
            messages,
            service,
        }
    }

    fn fast_config() -> ChatConfig {
        ChatConfig {
            poll: PollConfig {
                max_attempts: 5,
                initial_delay_ms: 1,
                backoff_multiplier: 1.5,
                max_delay_ms: 2,
                fetch_retries: 1,
                fetch_retry_delay_ms: 1,
            },
            persistence: PersistencePolicy::Await,
            ..ChatConfig::default()
        }
    }

    #[tokio::test]
    async fn test_text_turn_reuses_conversation_and_persists_pair() {
        let harness = harness(fast_config(), Some("conv_old"));

        let outcome = harness
            .service
            .generate_reply(TurnRequest::text("p-1", "mina", "hello"))
            .await
            .unwrap();

        assert_eq!(outcome.reply, "hello from assistant");
        assert_eq!(outcome.conversation_id, "conv_old");
        // Continued conversation: append + run, no conversation creation.
        assert_eq!(harness.provider.conversation_runs.load(Ordering::SeqCst), 0);

        let recorded = harness.messages.recorded.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].user_message, "hello");
        assert_eq!(recorded[0].bot_reply, "hello from assistant");
        assert_eq!(recorded[0].conversation_id.as_deref(), Some("conv_old"));
    }

    #[tokio::test]
    async fn test_structured_turn_always_creates_conversation() {
        // Even with an existing conversation on record.
        let harness = harness(fast_config(), Some("conv_old"));

        let request = TurnRequest {
            mode: ReplyMode::Structured,
            ..TurnRequest::text("p-1", "mina", "parse this")
        };
        let outcome = harness.service.generate_reply(request).await.unwrap();

        assert_eq!(outcome.conversation_id, "conv_new");
        assert_eq!(harness.provider.conversation_runs.load(Ordering::SeqCst), 1);

        let submissions = harness.provider.created_conversations.lock().unwrap().clone();
        assert_eq!(submissions.len(), 1);
        let (seeds, structured) = &submissions[0];
        assert!(*structured);
        // Instruction preamble plus the user's message.
        assert_eq!(seeds.len(), 2);
        assert!(seeds[0].content.contains("strict JSON"));
        assert_eq!(seeds[1].content, "parse this");
    }

    #[tokio::test]
    async fn test_failed_run_persists_nothing() {
        let harness = harness(fast_config(), None);
        harness.provider.clear_statuses();
        harness.provider.push_statuses(&[RunStatus::Failed]);

        let err = harness
            .service
            .generate_reply(TurnRequest::text("p-1", "mina", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::RunFailed { .. }));
        assert!(harness.messages.recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_background_policy_returns_reply_despite_persistence_failure() {
        let config = ChatConfig {
            persistence: PersistencePolicy::Background,
            ..fast_config()
        };
        let harness = harness(config, None);
        harness.messages.fail_next_record();

        let outcome = harness
            .service
            .generate_reply(TurnRequest::text("p-1", "mina", "hello"))
            .await
            .unwrap();

        assert_eq!(outcome.reply, "hello from assistant");
        assert!(outcome.persistence.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_reset_context_clears_history() {
        let harness = harness(fast_config(), Some("conv_old"));

        // Unknown user is a reported no-op.
        assert!(!harness.service.reset_context("stranger").await.unwrap());

        harness
            .service
            .generate_reply(TurnRequest::text("p-1", "mina", "hello"))
            .await
            .unwrap();
        assert!(harness.service.reset_context("p-1").await.unwrap());
        assert!(harness.messages.latest.lock().unwrap().is_none());
    }
}
