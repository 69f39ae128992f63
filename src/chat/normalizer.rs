//! Reply normalization: raw assistant output to a final string.

use crate::chat::errors::{ChatError, ChatResult};
use crate::chat::ReplyMode;
use crate::provider::{ContentPart, RawReply};

/// Convert raw assistant content into the final reply string.
///
/// Text mode concatenates the textual parts of a part list (non-text parts
/// are dropped, not rendered as gaps) and passes plain strings through.
/// Structured mode requires the first part to be textual and returns its raw
/// text verbatim; callers parse it as JSON themselves. Pre-flattened text
/// (streaming assembly) passes through in either mode.
///
/// Pure function: no side effects, no I/O.
///
/// # Errors
/// Returns [`ChatError::MalformedReply`] for any other shape.
pub fn normalize(raw: &RawReply, mode: ReplyMode) -> ChatResult<String> {
    match (mode, raw) {
        (_, RawReply::Text(text)) => Ok(text.clone()),
        (ReplyMode::Text, RawReply::Parts(parts)) => {
            let mut out = String::new();
            for part in parts {
                if let ContentPart::Text { text } = part {
                    out.push_str(&text.value);
                }
            }
            Ok(out)
        }
        (ReplyMode::Structured, RawReply::Parts(parts)) => match parts.first() {
            Some(ContentPart::Text { text }) => Ok(text.value.clone()),
            Some(ContentPart::Other) => Err(ChatError::MalformedReply(
                "structured reply does not start with a textual part".to_string(),
            )),
            None => Err(ChatError::MalformedReply(
                "structured reply content is empty".to_string(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        let raw = RawReply::Parts(vec![ContentPart::text("hello")]);
        assert_eq!(normalize(&raw, ReplyMode::Text).unwrap(), "hello");
    }

    #[test]
    fn test_text_drops_non_text_parts_without_gaps() {
        let raw = RawReply::Parts(vec![
            ContentPart::text("an"),
            ContentPart::Other,
            ContentPart::text("nyeong"),
        ]);
        assert_eq!(normalize(&raw, ReplyMode::Text).unwrap(), "annyeong");
    }

    #[test]
    fn test_text_all_non_text_yields_empty_reply() {
        let raw = RawReply::Parts(vec![ContentPart::Other, ContentPart::Other]);
        assert_eq!(normalize(&raw, ReplyMode::Text).unwrap(), "");
    }

    #[test]
    fn test_plain_string_passes_through() {
        let raw = RawReply::Text("already flat".to_string());
        assert_eq!(normalize(&raw, ReplyMode::Text).unwrap(), "already flat");
        assert_eq!(
            normalize(&raw, ReplyMode::Structured).unwrap(),
            "already flat"
        );
    }

    #[test]
    fn test_structured_takes_first_text_verbatim() {
        let raw = RawReply::Parts(vec![
            ContentPart::text(r#"{"posts": []}"#),
            ContentPart::text("ignored trailer"),
        ]);
        assert_eq!(
            normalize(&raw, ReplyMode::Structured).unwrap(),
            r#"{"posts": []}"#
        );
    }

    #[test]
    fn test_structured_rejects_empty_and_non_text_head() {
        let empty = RawReply::Parts(vec![]);
        assert!(matches!(
            normalize(&empty, ReplyMode::Structured),
            Err(ChatError::MalformedReply(_))
        ));

        let non_text = RawReply::Parts(vec![ContentPart::Other, ContentPart::text("{}")]);
        assert!(matches!(
            normalize(&non_text, ReplyMode::Structured),
            Err(ChatError::MalformedReply(_))
        ));
    }
}
