//! Run execution: submit a unit of work to the assistant job system and
//! drive it to a terminal state.
//!
//! Two completion modes exist. Polling fetches the run status in a bounded
//! loop with exponential backoff; streaming consumes the provider's event
//! stream and assembles the reply incrementally. Both end in the same
//! `(conversation_id, raw_content)` output and neither persists anything on
//! failure.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::chat::config::PollConfig;
use crate::chat::errors::{ChatError, ChatResult};
use crate::provider::{
    AssistantJobs, MessageRole, ProviderError, RawReply, RunEventStream, RunStatus,
    RunStreamEvent, SeedMessage,
};

/// One unit of work for the executor.
pub struct RunRequest {
    /// Provider-side assistant id.
    pub assistant_id: String,
    /// Conversation to continue, or `None` to create a fresh one.
    pub conversation_id: Option<String>,
    /// Full seeded message list for a fresh conversation (already including
    /// the user's new message).
    pub seed_messages: Vec<SeedMessage>,
    /// The user's new message, appended when continuing a conversation.
    pub user_message: String,
    /// Whether the provider should be asked for a JSON-object response.
    pub structured: bool,
    /// Optional cancellation signal; aborts the polling wait.
    pub cancel: Option<Arc<Notify>>,
}

/// Result of a completed run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// Conversation the run happened in (provider-minted for fresh ones).
    pub conversation_id: String,
    /// Raw assistant output, not yet normalized.
    pub raw: RawReply,
}

/// Drives assistant runs to completion.
pub struct RunExecutor {
    provider: Arc<dyn AssistantJobs>,
    poll: PollConfig,
}

impl RunExecutor {
    /// Create an executor over a provider with the given polling settings.
    #[must_use]
    pub fn new(provider: Arc<dyn AssistantJobs>, poll: PollConfig) -> Self {
        Self { provider, poll }
    }

    /// Submit the request and poll until the run completes.
    ///
    /// # Errors
    /// Returns `RunFailed` on a terminal failure status, `RunTimedOut` when
    /// the attempt budget is exhausted, `RunCancelled` if the cancel signal
    /// fires, and `MalformedReply` if no assistant message can be listed
    /// afterwards. Submission failures surface as `Provider` errors.
    pub async fn execute(&self, request: RunRequest) -> ChatResult<RunOutcome> {
        let RunRequest {
            assistant_id,
            conversation_id,
            seed_messages,
            user_message,
            structured,
            cancel,
        } = request;

        let handle = match conversation_id {
            Some(conversation) => {
                self.provider
                    .append_message(&conversation, &user_message)
                    .await?;
                self.provider
                    .create_run(&conversation, &assistant_id, structured)
                    .await?
            }
            None => {
                self.provider
                    .create_conversation_run(&assistant_id, seed_messages, structured)
                    .await?
            }
        };

        debug!(
            run_id = %handle.run_id,
            conversation_id = %handle.conversation_id,
            "run submitted"
        );

        self.wait_for_completion(&handle.conversation_id, &handle.run_id, cancel.as_deref())
            .await?;

        let message = self.provider.latest_message(&handle.conversation_id).await?;
        let raw = match message {
            Some(listed) if listed.role == MessageRole::Assistant => listed.content,
            _ => {
                return Err(ChatError::MalformedReply(
                    "assistant reply not found in conversation".to_string(),
                ));
            }
        };

        Ok(RunOutcome {
            conversation_id: handle.conversation_id,
            raw,
        })
    }

    /// Submit the request in streaming mode and assemble the reply from the
    /// event stream. The caller owns overall teardown; this method itself
    /// never waits between events.
    ///
    /// # Errors
    /// Returns `RunFailed` on a provider error event or terminal failure
    /// status, and `MalformedReply` if the stream ends without a
    /// conversation id.
    pub async fn execute_streaming(&self, request: RunRequest) -> ChatResult<RunOutcome> {
        let RunRequest {
            assistant_id,
            conversation_id,
            seed_messages,
            user_message,
            structured,
            ..
        } = request;

        let (stream, known_conversation) = match conversation_id {
            Some(conversation) => {
                self.provider
                    .append_message(&conversation, &user_message)
                    .await?;
                let stream = self
                    .provider
                    .stream_run(&conversation, &assistant_id, structured)
                    .await?;
                (stream, Some(conversation))
            }
            None => {
                let stream = self
                    .provider
                    .stream_conversation_run(&assistant_id, seed_messages, structured)
                    .await?;
                (stream, None)
            }
        };

        drain_stream(stream, known_conversation).await
    }

    /// Poll the run until it reaches a terminal state, with bounded attempts
    /// and exponential backoff capped at `max_delay_ms`.
    async fn wait_for_completion(
        &self,
        conversation_id: &str,
        run_id: &str,
        cancel: Option<&Notify>,
    ) -> ChatResult<()> {
        let mut delay_ms = self.poll.initial_delay_ms;

        for attempt in 1..=self.poll.max_attempts {
            let status = self.fetch_run_with_retry(conversation_id, run_id).await?;
            debug!(attempt, %status, "run status check");

            if status == RunStatus::Completed {
                return Ok(());
            }
            if status.is_terminal() {
                return Err(ChatError::RunFailed {
                    status,
                    conversation_id: Some(conversation_id.to_string()),
                });
            }
            if attempt == self.poll.max_attempts {
                break;
            }

            let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
            match cancel {
                Some(notify) => {
                    tokio::select! {
                        () = sleep => {}
                        () = notify.notified() => {
                            return Err(ChatError::RunCancelled {
                                conversation_id: Some(conversation_id.to_string()),
                            });
                        }
                    }
                }
                None => sleep.await,
            }
            delay_ms = self.poll.next_delay_ms(delay_ms);
        }

        Err(ChatError::RunTimedOut {
            conversation_id: Some(conversation_id.to_string()),
        })
    }

    /// Fetch the run status, retrying transient failures a fixed number of
    /// times with a fixed delay before treating them as hard.
    async fn fetch_run_with_retry(
        &self,
        conversation_id: &str,
        run_id: &str,
    ) -> ChatResult<RunStatus> {
        let attempts = self.poll.fetch_retries.max(1);
        let mut last_error: Option<ProviderError> = None;

        for attempt in 1..=attempts {
            match self.provider.fetch_run(conversation_id, run_id).await {
                Ok(status) => return Ok(status),
                Err(err) => {
                    warn!(attempt, error = %err, "run status fetch failed");
                    last_error = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(self.poll.fetch_retry_delay_ms))
                            .await;
                    }
                }
            }
        }

        Err(last_error.map_or_else(
            || {
                ChatError::Provider(ProviderError::Stream(
                    "status fetch failed without an error".to_string(),
                ))
            },
            ChatError::Provider,
        ))
    }
}

/// Assemble the final reply from an ordered run event stream.
///
/// Consumes until an explicit completed status, an error, or stream end.
///
/// # Errors
/// Returns `RunFailed` on an error event or terminal failure status, and
/// `MalformedReply` if no conversation id was ever observed.
pub async fn drain_stream(
    mut stream: RunEventStream,
    mut conversation_id: Option<String>,
) -> ChatResult<RunOutcome> {
    let mut reply = String::new();

    while let Some(event) = stream.next().await {
        match event? {
            RunStreamEvent::ConversationCreated {
                conversation_id: minted,
            } => {
                debug!(conversation_id = %minted, "conversation created by stream");
                conversation_id = Some(minted);
            }
            RunStreamEvent::MessageDelta { fragment } => reply.push_str(&fragment),
            RunStreamEvent::Status { status } => {
                if status == RunStatus::Completed {
                    break;
                }
                if status.is_terminal() {
                    return Err(ChatError::RunFailed {
                        status,
                        conversation_id,
                    });
                }
            }
            RunStreamEvent::Error { message } => {
                error!(message, "provider stream reported an error");
                return Err(ChatError::RunFailed {
                    status: RunStatus::Failed,
                    conversation_id,
                });
            }
        }
    }

    let conversation_id = conversation_id.ok_or_else(|| {
        ChatError::MalformedReply("stream ended without a conversation id".to_string())
    })?;

    Ok(RunOutcome {
        conversation_id,
        raw: RawReply::Text(reply),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    use super::*;
    use crate::chat::testing::FakeProvider;
    use crate::provider::ProviderResult;

    fn fast_poll(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            initial_delay_ms: 1,
            backoff_multiplier: 1.5,
            max_delay_ms: 2,
            fetch_retries: 1,
            fetch_retry_delay_ms: 1,
        }
    }

    fn request(conversation_id: Option<&str>) -> RunRequest {
        RunRequest {
            assistant_id: "asst_1".to_string(),
            conversation_id: conversation_id.map(str::to_string),
            seed_messages: vec![SeedMessage::user("hello")],
            user_message: "hello".to_string(),
            structured: false,
            cancel: None,
        }
    }

    #[tokio::test]
    async fn test_new_conversation_completes() {
        let provider = Arc::new(FakeProvider::default());
        provider.push_statuses(&[RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed]);
        let executor = RunExecutor::new(Arc::clone(&provider) as Arc<dyn AssistantJobs>, fast_poll(10));

        let outcome = executor.execute(request(None)).await.unwrap();

        assert_eq!(outcome.conversation_id, "conv_new");
        assert_eq!(provider.conversation_runs.load(Ordering::SeqCst), 1);
        assert_eq!(provider.appended_messages.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_existing_conversation_appends_then_runs() {
        let provider = Arc::new(FakeProvider::default());
        provider.push_statuses(&[RunStatus::Completed]);
        let executor = RunExecutor::new(Arc::clone(&provider) as Arc<dyn AssistantJobs>, fast_poll(10));

        let outcome = executor.execute(request(Some("conv_77"))).await.unwrap();

        assert_eq!(outcome.conversation_id, "conv_77");
        assert_eq!(provider.conversation_runs.load(Ordering::SeqCst), 0);
        let appended = provider.appended_messages.lock().unwrap().clone();
        assert_eq!(appended, vec![("conv_77".to_string(), "hello".to_string())]);
        let runs = provider.runs_started.lock().unwrap().clone();
        assert_eq!(runs, vec![("conv_77".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_run_failed() {
        let provider = Arc::new(FakeProvider::default());
        provider.push_statuses(&[RunStatus::InProgress, RunStatus::Failed]);
        let executor = RunExecutor::new(provider, fast_poll(10));

        let err = executor.execute(request(None)).await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::RunFailed {
                status: RunStatus::Failed,
                conversation_id: Some(ref conv)
            } if conv == "conv_new"
        ));
    }

    #[tokio::test]
    async fn test_backoff_bound_then_times_out() {
        let provider = Arc::new(FakeProvider::default());
        // Never reaches a terminal state.
        let executor = RunExecutor::new(Arc::clone(&provider) as Arc<dyn AssistantJobs>, fast_poll(5));

        let started = Instant::now();
        let err = executor.execute(request(None)).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ChatError::RunTimedOut { .. }));
        // Exactly the attempt cap, no more.
        assert_eq!(provider.status_fetches.load(Ordering::SeqCst), 5);
        // Total wait is bounded by attempts x max_delay (plus scheduling slack).
        assert!(elapsed < Duration::from_millis(5 * 2 + 500));
    }

    #[tokio::test]
    async fn test_transient_fetch_failures_are_retried() {
        let provider = Arc::new(FakeProvider::default());
        provider.fail_status_fetches.store(2, Ordering::SeqCst);
        provider.push_statuses(&[RunStatus::Completed]);
        let poll = PollConfig {
            fetch_retries: 3,
            ..fast_poll(10)
        };
        let executor = RunExecutor::new(Arc::clone(&provider) as Arc<dyn AssistantJobs>, poll);

        let outcome = executor.execute(request(None)).await.unwrap();
        assert_eq!(outcome.conversation_id, "conv_new");
        // Two failures then the successful third call.
        assert_eq!(provider.status_fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_fetch_retries_are_fatal() {
        let provider = Arc::new(FakeProvider::default());
        provider.fail_status_fetches.store(10, Ordering::SeqCst);
        let executor = RunExecutor::new(provider, fast_poll(10));

        let err = executor.execute(request(None)).await.unwrap_err();
        assert!(matches!(err, ChatError::Provider(_)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_the_wait() {
        let provider = Arc::new(FakeProvider::default());
        let poll = PollConfig {
            max_attempts: 3,
            initial_delay_ms: 60_000,
            backoff_multiplier: 1.0,
            max_delay_ms: 60_000,
            fetch_retries: 1,
            fetch_retry_delay_ms: 1,
        };
        let executor = RunExecutor::new(provider, poll);

        let cancel = Arc::new(Notify::new());
        cancel.notify_one();
        let mut request = request(None);
        request.cancel = Some(Arc::clone(&cancel));

        let err = executor.execute(request).await.unwrap_err();
        assert!(matches!(err, ChatError::RunCancelled { .. }));
    }

    #[tokio::test]
    async fn test_drain_stream_assembles_reply() {
        let events: Vec<ProviderResult<RunStreamEvent>> = vec![
            Ok(RunStreamEvent::ConversationCreated {
                conversation_id: "conv_s".to_string(),
            }),
            Ok(RunStreamEvent::Status {
                status: RunStatus::InProgress,
            }),
            Ok(RunStreamEvent::MessageDelta {
                fragment: "an".to_string(),
            }),
            Ok(RunStreamEvent::MessageDelta {
                fragment: "nyeong".to_string(),
            }),
            Ok(RunStreamEvent::Status {
                status: RunStatus::Completed,
            }),
        ];
        let stream: RunEventStream = Box::pin(futures::stream::iter(events));

        let outcome = drain_stream(stream, None).await.unwrap();
        assert_eq!(outcome.conversation_id, "conv_s");
        assert_eq!(outcome.raw, RawReply::Text("annyeong".to_string()));
    }

    #[tokio::test]
    async fn test_drain_stream_error_event_fails_run() {
        let events: Vec<ProviderResult<RunStreamEvent>> = vec![
            Ok(RunStreamEvent::ConversationCreated {
                conversation_id: "conv_s".to_string(),
            }),
            Ok(RunStreamEvent::Error {
                message: "boom".to_string(),
            }),
        ];
        let stream: RunEventStream = Box::pin(futures::stream::iter(events));

        let err = drain_stream(stream, None).await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::RunFailed {
                status: RunStatus::Failed,
                conversation_id: Some(ref conv)
            } if conv == "conv_s"
        ));
    }
}
