//! Wire types shared across the assistant job boundary.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a run as reported by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, not yet started.
    Queued,
    /// Actively generating.
    InProgress,
    /// Finished successfully; output is available.
    Completed,
    /// Terminal provider-side failure.
    Failed,
    /// Cancelled before completion.
    Cancelled,
    /// Expired before completion.
    Expired,
    /// Any state this client does not model.
    #[serde(other)]
    Other,
}

impl RunStatus {
    /// Whether the run can make no further progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Expired)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// Role attached to a seeded or listed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// End-user turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// A message used to seed a new conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedMessage {
    /// Message role.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

impl SeedMessage {
    /// Build a user-role seed message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Text payload inside a content part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    /// The raw text value.
    pub value: String,
}

/// One part of a multi-part message content list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Textual part.
    Text {
        /// Text payload.
        text: TextPayload,
    },
    /// Any non-text part (images, files); carried but never rendered.
    #[serde(other)]
    Other,
}

impl ContentPart {
    /// Build a text part.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            text: TextPayload {
                value: value.into(),
            },
        }
    }
}

/// Raw assistant output before normalization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawReply {
    /// Pre-flattened plain text (streaming assembly).
    Text(String),
    /// Part list as returned by the message-listing endpoint.
    Parts(Vec<ContentPart>),
}

/// A message as listed from a conversation.
#[derive(Clone, Debug, Deserialize)]
pub struct ListedMessage {
    /// Message role.
    pub role: MessageRole,
    /// Message content.
    pub content: RawReply,
}

/// Provider-side assistant settings, cached for process lifetime.
#[derive(Clone, Debug, Deserialize)]
pub struct AssistantConfig {
    /// Provider-side assistant id.
    pub id: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Free-text instructions used to seed new conversations.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Model backing the assistant, informational only.
    #[serde(default)]
    pub model: Option<String>,
}

/// Handle returned by a run submission.
#[derive(Clone, Debug, Deserialize)]
pub struct RunHandle {
    /// Run identifier.
    pub run_id: String,
    /// Conversation the run belongs to (provider-minted for new ones).
    pub conversation_id: String,
}

/// One event from the incremental run stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunStreamEvent {
    /// A new conversation was minted for this run.
    ConversationCreated {
        /// The provider-minted conversation id.
        conversation_id: String,
    },
    /// An incremental fragment of the assistant's reply.
    MessageDelta {
        /// Text fragment to append.
        fragment: String,
    },
    /// A run status transition.
    Status {
        /// Reported status.
        status: RunStatus,
    },
    /// Provider-reported stream error.
    Error {
        /// Operator-facing message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_deserializes_unknown_as_other() {
        let status: RunStatus = serde_json::from_str("\"requires_action\"").unwrap();
        assert_eq!(status, RunStatus::Other);
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_content_part_wire_shape() {
        let json = r#"[{"type":"text","text":{"value":"hello"}},{"type":"image_file"}]"#;
        let parts: Vec<ContentPart> = serde_json::from_str(json).unwrap();
        assert_eq!(parts[0], ContentPart::text("hello"));
        assert_eq!(parts[1], ContentPart::Other);
    }

    #[test]
    fn test_raw_reply_untagged() {
        let as_text: RawReply = serde_json::from_str("\"plain\"").unwrap();
        assert_eq!(as_text, RawReply::Text("plain".to_string()));

        let as_parts: RawReply =
            serde_json::from_str(r#"[{"type":"text","text":{"value":"x"}}]"#).unwrap();
        assert!(matches!(as_parts, RawReply::Parts(parts) if parts.len() == 1));
    }
}
