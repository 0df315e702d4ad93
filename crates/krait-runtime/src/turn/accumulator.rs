//! Folds a canonical stream into an assistant message and a batch of
//! tool invocations.
//!
//! One accumulator lives for exactly one stream attempt. A retried stream
//! starts over with a fresh accumulator; partial content from a failed
//! attempt is discarded, never spliced.

use std::collections::BTreeMap;

use krait_core::events::{ContentKind, StopReason, StreamEvent, TokenUsage};
use krait_core::messages::AssistantBlock;
use krait_core::tools::ToolInvocation;

/// Result of folding one complete stream.
#[derive(Debug)]
pub struct StreamResult {
    /// Assistant blocks in canonical index order. Empty when the model
    /// produced no content.
    pub blocks: Vec<AssistantBlock>,
    /// Invocations opened from `ToolCall` events, in index order.
    pub invocations: Vec<ToolInvocation>,
    /// Token accounting from the `Complete` event.
    pub usage: TokenUsage,
    /// Stop reason from the `Complete` event.
    pub stop_reason: Option<StopReason>,
    /// Continuation token to echo into the next request.
    pub continuation_token: Option<String>,
}

/// Terminal state of a stream attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The stream completed normally.
    Complete,
    /// The stream ended with an error event.
    Error {
        /// Error reason.
        reason: String,
        /// Whether a retry without operator intervention is safe.
        recoverable: bool,
    },
}

/// Stream-event fold state for one attempt.
#[derive(Default)]
pub struct StreamAccumulator {
    model: Option<String>,
    blocks: BTreeMap<usize, AssistantBlock>,
    kinds: BTreeMap<usize, ContentKind>,
    invocations: Vec<ToolInvocation>,
    usage: TokenUsage,
    stop_reason: Option<StopReason>,
    continuation_token: Option<String>,
    end: Option<StreamEnd>,
}

impl StreamAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the accumulator.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Started { model } => {
                self.model = Some(model.clone());
            }
            StreamEvent::ContentBlockStart { index, kind } => {
                let _ = self.kinds.insert(*index, *kind);
                let block = match kind {
                    ContentKind::Text => AssistantBlock::Text {
                        text: String::new(),
                    },
                    ContentKind::Thinking => AssistantBlock::Thinking {
                        thinking: String::new(),
                    },
                    // Filled in from the ToolCall event at block close.
                    ContentKind::ToolCall => AssistantBlock::ToolCall {
                        id: String::new(),
                        name: String::new(),
                        arguments: serde_json::Map::new(),
                    },
                };
                let _ = self.blocks.insert(*index, block);
            }
            StreamEvent::ContentDelta { index, text } => match self.blocks.get_mut(index) {
                Some(AssistantBlock::Text { text: acc }) => acc.push_str(text),
                Some(AssistantBlock::Thinking { thinking: acc }) => acc.push_str(text),
                // Tool-call fragments carry raw argument JSON; the parsed
                // form arrives in the ToolCall event.
                _ => {}
            },
            StreamEvent::ContentBlockStop { .. } => {}
            StreamEvent::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let _ = self.blocks.insert(
                    *index,
                    AssistantBlock::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    },
                );
                self.invocations
                    .push(ToolInvocation::open(id.clone(), name.clone(), arguments.clone()));
            }
            StreamEvent::Complete {
                usage,
                stop_reason,
                continuation_token,
            } => {
                self.usage = usage.clone();
                self.stop_reason = Some(*stop_reason);
                self.continuation_token = continuation_token.clone();
                self.end = Some(StreamEnd::Complete);
            }
            StreamEvent::Error {
                reason,
                recoverable,
            } => {
                self.end = Some(StreamEnd::Error {
                    reason: reason.clone(),
                    recoverable: *recoverable,
                });
            }
        }
    }

    /// Content kind of an open block, for live delta rendering.
    #[must_use]
    pub fn block_kind(&self, index: usize) -> Option<ContentKind> {
        self.kinds.get(&index).copied()
    }

    /// Model named in the `Started` event.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Terminal state, once observed.
    #[must_use]
    pub fn end(&self) -> Option<&StreamEnd> {
        self.end.as_ref()
    }

    /// Consume the accumulator into a [`StreamResult`].
    #[must_use]
    pub fn finish(self) -> StreamResult {
        StreamResult {
            blocks: self.blocks.into_values().collect(),
            invocations: self.invocations,
            usage: self.usage,
            stop_reason: self.stop_reason,
            continuation_token: self.continuation_token,
        }
    }
}

impl StreamResult {
    /// Concatenated text-block content.
    #[must_use]
    pub fn response_text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let AssistantBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }
}
