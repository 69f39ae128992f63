//! Server-sent-event decoding for the run event stream.

use std::collections::VecDeque;

use futures::StreamExt;
use serde::Deserialize;

use crate::provider::types::{ContentPart, RunStatus, RunStreamEvent};
use crate::provider::{ProviderError, RunEventStream};

/// One decoded SSE frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct SseFrame {
    pub(super) event: String,
    pub(super) data: String,
}

/// Incremental SSE frame parser over arbitrary byte-chunk boundaries.
#[derive(Debug, Default)]
pub(super) struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Feed a chunk and return every frame completed by it.
    pub(super) fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer = self.buffer.split_off(pos + 2);
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue; // comment / keep-alive
        }
        if let Some(rest) = line.strip_prefix("event:") {
            frame.event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }

    frame.data = data_lines.join("\n");
    if frame.event.is_empty() && frame.data.is_empty() {
        None
    } else {
        Some(frame)
    }
}

/// What a single frame contributes to the run event stream.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum FrameOutcome {
    /// A run event to forward.
    Event(RunStreamEvent),
    /// Frame carried nothing the executor cares about.
    Skip,
    /// Explicit end of stream.
    Done,
    /// Frame could not be decoded.
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct RunEventData {
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    status: Option<RunStatus>,
}

#[derive(Debug, Deserialize)]
struct DeltaEventData {
    delta: DeltaContent,
}

#[derive(Debug, Deserialize)]
struct DeltaContent {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ErrorEventData {
    #[serde(default)]
    message: Option<String>,
}

/// Map a decoded frame onto the provider-neutral event kinds.
pub(super) fn map_frame(frame: &SseFrame) -> FrameOutcome {
    if frame.event == "done" || frame.data == "[DONE]" {
        return FrameOutcome::Done;
    }

    if frame.event == "error" {
        let message = serde_json::from_str::<ErrorEventData>(&frame.data)
            .ok()
            .and_then(|data| data.message)
            .unwrap_or_else(|| frame.data.clone());
        return FrameOutcome::Event(RunStreamEvent::Error { message });
    }

    if frame.event == "thread.message.delta" {
        return match serde_json::from_str::<DeltaEventData>(&frame.data) {
            Ok(data) => {
                let mut fragment = String::new();
                for part in data.delta.content {
                    if let ContentPart::Text { text } = part {
                        fragment.push_str(&text.value);
                    }
                }
                if fragment.is_empty() {
                    FrameOutcome::Skip
                } else {
                    FrameOutcome::Event(RunStreamEvent::MessageDelta { fragment })
                }
            }
            Err(err) => FrameOutcome::Malformed(format!("bad delta frame: {err}")),
        };
    }

    if frame.event == "thread.run.created" {
        return match serde_json::from_str::<RunEventData>(&frame.data) {
            Ok(RunEventData {
                thread_id: Some(conversation_id),
                ..
            }) => FrameOutcome::Event(RunStreamEvent::ConversationCreated { conversation_id }),
            Ok(_) => FrameOutcome::Malformed("run.created frame without thread id".to_string()),
            Err(err) => FrameOutcome::Malformed(format!("bad run frame: {err}")),
        };
    }

    if frame.event.starts_with("thread.run.") && !frame.event.starts_with("thread.run.step") {
        return match serde_json::from_str::<RunEventData>(&frame.data) {
            Ok(RunEventData {
                status: Some(status),
                ..
            }) => FrameOutcome::Event(RunStreamEvent::Status { status }),
            Ok(_) | Err(_) => FrameOutcome::Skip,
        };
    }

    FrameOutcome::Skip
}

struct StreamState {
    chunks: futures::stream::BoxStream<'static, reqwest::Result<String>>,
    parser: SseParser,
    pending: VecDeque<RunStreamEvent>,
    finished: bool,
}

/// Wrap an SSE HTTP response into an ordered run event stream.
pub(super) fn event_stream(response: reqwest::Response) -> RunEventStream {
    let chunks = response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
        .boxed();
    let state = StreamState {
        chunks,
        parser: SseParser::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(text)) => {
                    for frame in state.parser.push(&text) {
                        match map_frame(&frame) {
                            FrameOutcome::Event(event) => state.pending.push_back(event),
                            FrameOutcome::Skip => {}
                            FrameOutcome::Done => state.finished = true,
                            FrameOutcome::Malformed(message) => {
                                state.finished = true;
                                return Some((Err(ProviderError::Stream(message)), state));
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(ProviderError::Http(err)), state));
                }
                None => state.finished = true,
            }
        }
    }))
}
