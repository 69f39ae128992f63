//! Outbound delivery planning for size-limited chat transports.

use serde::Serialize;

use crate::chat::config::DeliveryConfig;

/// How a reply should be handed to the chat transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryPlan {
    /// One message carrying the full text verbatim.
    Single {
        /// The reply text.
        content: String,
    },
    /// Fixed-width chunks; the first replaces the in-progress placeholder,
    /// the rest are sent as follow-ups in order.
    Chunked {
        /// Ordered message chunks, each at most `char_limit` characters.
        chunks: Vec<String>,
    },
    /// The full text as a file attachment.
    Attachment {
        /// Suggested file name.
        filename: String,
        /// The reply text.
        content: String,
    },
}

/// Decide how to deliver a reply given the configured thresholds.
///
/// Replies longer than `file_threshold` characters become an attachment;
/// otherwise replies longer than `char_limit` are sliced into fixed-width
/// chunks (no respect for word boundaries); everything else goes out as a
/// single message. Lengths are counted in characters, so a chunk never splits
/// a UTF-8 scalar.
#[must_use]
pub fn plan_delivery(reply: &str, config: &DeliveryConfig) -> DeliveryPlan {
    let length = reply.chars().count();

    if length > config.file_threshold {
        return DeliveryPlan::Attachment {
            filename: config.attachment_name.clone(),
            content: reply.to_string(),
        };
    }

    if length > config.char_limit {
        return DeliveryPlan::Chunked {
            chunks: chunk_chars(reply, config.char_limit),
        };
    }

    DeliveryPlan::Single {
        content: reply.to_string(),
    }
}

fn chunk_chars(text: &str, width: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == width {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
