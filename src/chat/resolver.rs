//! Conversation context resolution.

use std::sync::Arc;

use tracing::debug;

use crate::chat::errors::ChatResult;
use crate::chat::ReplyMode;
use crate::storage::{MessageStore, UserRecord, UserStore};

/// Resolved context for one turn.
#[derive(Clone, Debug)]
pub struct TurnContext {
    /// The (possibly just created) user record.
    pub user: UserRecord,
    /// Conversation to continue, or `None` to start a fresh one.
    pub conversation_id: Option<String>,
}

/// Finds or creates the durable user record and picks the conversation to
/// continue for a turn.
pub struct ConversationResolver {
    users: Arc<dyn UserStore>,
    messages: Arc<dyn MessageStore>,
}

impl ConversationResolver {
    /// Create a resolver over the user and message stores.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { users, messages }
    }

    /// Upsert the user and determine the active conversation.
    ///
    /// Structured-mode turns always get `None`: mixing free-text history into
    /// a machine-parseable response is never acceptable, so a fresh
    /// conversation is forced regardless of what exists.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn resolve_context(
        &self,
        platform_id: &str,
        username: &str,
        mode: ReplyMode,
    ) -> ChatResult<TurnContext> {
        let user = self.users.upsert(platform_id, username).await?;

        let conversation_id = match mode {
            ReplyMode::Structured => {
                debug!(platform_id, "structured mode: forcing a new conversation");
                None
            }
            ReplyMode::Text => {
                let latest = self.messages.latest_conversation(user.id).await?;
                debug!(platform_id, conversation = ?latest, "resolved conversation");
                latest
            }
        };

        Ok(TurnContext {
            user,
            conversation_id,
        })
    }

    /// Look up a user without creating one.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn find_user(&self, platform_id: &str) -> ChatResult<Option<UserRecord>> {
        Ok(self.users.find_by_platform_id(platform_id).await?)
    }

    /// Soft-delete a user's messages and clear the conversation pointer.
    /// Returns the number of messages touched.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn clear_history(&self, user_id: i64) -> ChatResult<u64> {
        Ok(self.messages.mark_all_deleted(user_id).await?)
    }
}
