//! Configuration for the chat subsystem.

use serde::{Deserialize, Serialize};

use crate::chat::errors::{ChatError, ChatResult};

/// Top-level configuration for the chat service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Assistant name used when a request does not pick one.
    pub default_assistant: DefaultAssistant,
    /// Run polling settings.
    pub poll: PollConfig,
    /// Outbound delivery thresholds.
    pub delivery: DeliveryConfig,
    /// What to do when persistence fails after a computed reply.
    pub persistence: PersistencePolicy,
}

impl ChatConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.default_assistant.0.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "default_assistant must not be empty".to_string(),
            ));
        }
        self.poll.validate()?;
        self.delivery.validate()
    }
}

/// Newtype wrapper so the default assistant name has a sane `Default`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefaultAssistant(pub String);

impl Default for DefaultAssistant {
    fn default() -> Self {
        Self("default".to_string())
    }
}

/// Bounded-retry polling settings for run completion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Maximum number of status checks before giving up.
    pub max_attempts: u32,
    /// Delay before the second status check, in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
    /// Upper bound for the delay between attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Transient retries for a single status fetch.
    pub fetch_retries: u32,
    /// Fixed delay between transient fetch retries, in milliseconds.
    pub fetch_retry_delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            initial_delay_ms: 1000,
            backoff_multiplier: 1.5,
            max_delay_ms: 2000,
            fetch_retries: 3,
            fetch_retry_delay_ms: 1000,
        }
    }
}

impl PollConfig {
    /// Validate polling invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range.
    pub fn validate(&self) -> ChatResult<()> {
        if self.max_attempts == 0 {
            return Err(ChatError::InvalidConfig(
                "poll.max_attempts must be > 0".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ChatError::InvalidConfig(
                "poll.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ChatError::InvalidConfig(
                "poll.max_delay_ms must be >= poll.initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Next delay after `current_ms`, capped at `max_delay_ms`.
    #[must_use]
    pub fn next_delay_ms(&self, current_ms: u64) -> u64 {
        let scaled = (current_ms as f64 * self.backoff_multiplier).round() as u64;
        scaled.min(self.max_delay_ms)
    }
}

/// Outbound delivery thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum characters per chat message.
    pub char_limit: usize,
    /// Replies longer than this many characters become a file attachment.
    pub file_threshold: usize,
    /// File name used for attachment delivery.
    pub attachment_name: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            char_limit: 2000,
            file_threshold: 1000,
            attachment_name: "reply.txt".to_string(),
        }
    }
}

impl DeliveryConfig {
    /// Validate delivery invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range.
    pub fn validate(&self) -> ChatResult<()> {
        if self.char_limit == 0 {
            return Err(ChatError::InvalidConfig(
                "delivery.char_limit must be > 0".to_string(),
            ));
        }
        if self.file_threshold == 0 {
            return Err(ChatError::InvalidConfig(
                "delivery.file_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Policy for persistence failures after a reply has been computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Persist on a spawned task; the reply is returned regardless and the
    /// outcome stays observable through the returned ticket.
    #[default]
    Background,
    /// Persist before returning; a failure fails the whole turn.
    Await,
}
