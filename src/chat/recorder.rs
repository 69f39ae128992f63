//! Transactional persistence of completed exchanges.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::chat::config::PersistencePolicy;
use crate::chat::errors::ChatResult;
use crate::storage::{MessageStore, NewExchange, StorageError, StorageResult};

/// Observable outcome of recording an exchange.
///
/// Background persistence is an explicit spawned task reporting through a
/// oneshot channel, never a detached fire-and-forget future, so callers and
/// tests can always await the result deterministically.
#[derive(Debug)]
pub enum PersistenceTicket {
    /// The exchange was persisted before the reply was returned.
    Completed,
    /// Persistence is running in the background; await the ticket to observe
    /// the result.
    Pending(oneshot::Receiver<StorageResult<()>>),
}

impl PersistenceTicket {
    /// Wait for the persistence outcome.
    ///
    /// # Errors
    /// Returns the storage failure, or [`StorageError::Interrupted`] if the
    /// background task was dropped before reporting.
    pub async fn wait(self) -> StorageResult<()> {
        match self {
            Self::Completed => Ok(()),
            Self::Pending(receiver) => receiver.await.map_err(|_| StorageError::Interrupted)?,
        }
    }
}

/// Records exchanges under the configured persistence policy.
pub struct ExchangeRecorder {
    messages: Arc<dyn MessageStore>,
    policy: PersistencePolicy,
}

impl ExchangeRecorder {
    /// Create a recorder over the message store.
    #[must_use]
    pub fn new(messages: Arc<dyn MessageStore>, policy: PersistencePolicy) -> Self {
        Self { messages, policy }
    }

    /// Persist an exchange according to the policy.
    ///
    /// Under [`PersistencePolicy::Await`] the transaction completes (or
    /// fails the turn) before this returns. Under
    /// [`PersistencePolicy::Background`] the reply does not wait for the
    /// write; the failure is logged and remains observable on the ticket.
    ///
    /// # Errors
    /// Returns a persistence error only under the `Await` policy.
    pub async fn record(&self, exchange: NewExchange) -> ChatResult<PersistenceTicket> {
        match self.policy {
            PersistencePolicy::Await => {
                self.messages.record_exchange(exchange).await?;
                debug!("exchange persisted synchronously");
                Ok(PersistenceTicket::Completed)
            }
            PersistencePolicy::Background => {
                let (sender, receiver) = oneshot::channel();
                let messages = Arc::clone(&self.messages);
                tokio::spawn(async move {
                    let exchange_id = exchange.exchange_id;
                    let result = messages.record_exchange(exchange).await;
                    match &result {
                        Ok(()) => debug!(%exchange_id, "exchange persisted in background"),
                        Err(err) => {
                            error!(%exchange_id, error = %err, "failed to persist exchange");
                        }
                    }
                    let _ = sender.send(result);
                });
                Ok(PersistenceTicket::Pending(receiver))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::FakeMessageStore;
    use uuid::Uuid;

    fn exchange() -> NewExchange {
        NewExchange {
            user_id: 1,
            exchange_id: Uuid::new_v4(),
            user_message: "hi".to_string(),
            bot_reply: "hello".to_string(),
            conversation_id: Some("conv-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_background_outcome_is_observable() {
        let store = Arc::new(FakeMessageStore::default());
        let recorder =
            ExchangeRecorder::new(Arc::clone(&store) as Arc<dyn MessageStore>, PersistencePolicy::Background);

        let ticket = recorder.record(exchange()).await.unwrap();
        ticket.wait().await.unwrap();

        assert_eq!(store.recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_background_failure_keeps_reply_path_clean() {
        let store = Arc::new(FakeMessageStore::default());
        store.fail_next_record();
        let recorder =
            ExchangeRecorder::new(Arc::clone(&store) as Arc<dyn MessageStore>, PersistencePolicy::Background);

        // The record call itself succeeds; only the ticket carries the fault.
        let ticket = recorder.record(exchange()).await.unwrap();
        assert!(ticket.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_await_policy_propagates_failure() {
        let store = Arc::new(FakeMessageStore::default());
        store.fail_next_record();
        let recorder =
            ExchangeRecorder::new(store, PersistencePolicy::Await);

        assert!(recorder.record(exchange()).await.is_err());
    }
}
