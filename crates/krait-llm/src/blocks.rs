//! Shared block-tracking semantics for all backend normalizers.
//!
//! [`BlockTracker`] owns the canonical block model:
//!
//! - indices are assigned in first-seen order, monotonically increasing,
//!   independent of the backend's own indexing scheme;
//! - at most one text/thinking block is open at a time; a delta of a
//!   different kind closes the old block and opens a new one before the
//!   delta is forwarded (kind-transition rule);
//! - tool-call arguments accumulate as string fragments per backend key
//!   and are parsed once at block close — parse failure yields an
//!   empty-object argument set, never a stream failure;
//! - a tool call without a backend-supplied ID gets a generated one,
//!   unique within the stream;
//! - any tool call forces the final stop reason to `ToolUse`.

use std::collections::HashSet;

use krait_core::events::{ContentKind, StopReason, StreamEvent};
use krait_core::ids::generate_call_id;
use serde_json::Value;
use tracing::warn;

/// An open tool-call block still accumulating argument fragments.
#[derive(Debug)]
struct ToolBuild {
    /// Backend-side key (provider block index or call ID).
    key: String,
    /// Canonical block index.
    index: usize,
    /// Backend-supplied call ID, if any.
    id: Option<String>,
    /// Tool name (may arrive after the block opens on some backends).
    name: String,
    /// Concatenated argument-JSON fragments.
    fragments: String,
}

/// Canonical block state for one stream.
#[derive(Debug, Default)]
pub struct BlockTracker {
    next_index: usize,
    current: Option<(usize, ContentKind)>,
    tools: Vec<ToolBuild>,
    used_ids: HashSet<String>,
    saw_tool_call: bool,
}

impl BlockTracker {
    /// Fresh tracker for a new stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    /// Forward a text or thinking delta, applying the kind-transition rule.
    pub fn content_delta(&mut self, kind: ContentKind, text: &str) -> Vec<StreamEvent> {
        debug_assert_ne!(kind, ContentKind::ToolCall, "tool calls use start_tool");
        let mut events = Vec::new();
        match self.current {
            Some((_, open_kind)) if open_kind == kind => {}
            Some((index, _)) => {
                // Backend switched kinds (e.g. thinking finished, answer
                // text begins) without closing the old block.
                events.push(StreamEvent::ContentBlockStop { index });
                let index = self.alloc_index();
                self.current = Some((index, kind));
                events.push(StreamEvent::ContentBlockStart { index, kind });
            }
            None => {
                let index = self.alloc_index();
                self.current = Some((index, kind));
                events.push(StreamEvent::ContentBlockStart { index, kind });
            }
        }
        let (index, _) = self.current.expect("block opened above");
        events.push(StreamEvent::ContentDelta {
            index,
            text: text.to_owned(),
        });
        events
    }

    /// Close the open text/thinking block, if any.
    pub fn close_content(&mut self) -> Vec<StreamEvent> {
        self.current
            .take()
            .map(|(index, _)| vec![StreamEvent::ContentBlockStop { index }])
            .unwrap_or_default()
    }

    /// Open a tool-call block keyed by the backend's own identifier.
    pub fn start_tool(
        &mut self,
        key: impl Into<String>,
        id: Option<String>,
        name: impl Into<String>,
    ) -> Vec<StreamEvent> {
        let mut events = self.close_content();
        let index = self.alloc_index();
        self.tools.push(ToolBuild {
            key: key.into(),
            index,
            id,
            name: name.into(),
            fragments: String::new(),
        });
        events.push(StreamEvent::ContentBlockStart {
            index,
            kind: ContentKind::ToolCall,
        });
        events
    }

    /// Append an argument-JSON fragment to an open tool build.
    ///
    /// Fragments for an unknown key are dropped with a warning — a
    /// malformed record must not abort the stream.
    pub fn tool_fragment(&mut self, key: &str, fragment: &str) -> Vec<StreamEvent> {
        let Some(build) = self.tools.iter_mut().find(|t| t.key == key) else {
            warn!(key, "argument fragment for unknown tool block, skipping");
            return Vec::new();
        };
        build.fragments.push_str(fragment);
        vec![StreamEvent::ContentDelta {
            index: build.index,
            text: fragment.to_owned(),
        }]
    }

    /// Update tool metadata that arrives after the block opened
    /// (OpenAI-family streams deliver id/name on later deltas).
    pub fn update_tool_meta(&mut self, key: &str, id: Option<&str>, name: Option<&str>) {
        if let Some(build) = self.tools.iter_mut().find(|t| t.key == key) {
            if let Some(id) = id {
                build.id = Some(id.to_owned());
            }
            if let Some(name) = name {
                if build.name.is_empty() {
                    build.name = name.to_owned();
                }
            }
        }
    }

    /// Close a tool build: parse arguments, assign an ID, emit the
    /// `ToolCall` event and the block stop.
    pub fn finish_tool(&mut self, key: &str) -> Vec<StreamEvent> {
        let Some(pos) = self.tools.iter().position(|t| t.key == key) else {
            warn!(key, "close for unknown tool block, skipping");
            return Vec::new();
        };
        let build = self.tools.remove(pos);
        self.emit_tool(build)
    }

    /// Emit a tool call whose arguments arrived as one complete object
    /// (NDJSON backends).
    pub fn complete_tool(
        &mut self,
        id: Option<String>,
        name: impl Into<String>,
        arguments: serde_json::Map<String, Value>,
    ) -> Vec<StreamEvent> {
        let mut events = self.close_content();
        let index = self.alloc_index();
        let id = self.claim_id(id);
        self.saw_tool_call = true;
        events.push(StreamEvent::ContentBlockStart {
            index,
            kind: ContentKind::ToolCall,
        });
        events.push(StreamEvent::ToolCall {
            index,
            id,
            name: name.into(),
            arguments,
        });
        events.push(StreamEvent::ContentBlockStop { index });
        events
    }

    fn emit_tool(&mut self, build: ToolBuild) -> Vec<StreamEvent> {
        let arguments = parse_arguments(&build.name, &build.fragments);
        let id = self.claim_id(build.id);
        self.saw_tool_call = true;
        vec![
            StreamEvent::ToolCall {
                index: build.index,
                id,
                name: build.name,
                arguments,
            },
            StreamEvent::ContentBlockStop { index: build.index },
        ]
    }

    /// Record an ID as used, generating one if the backend omitted it.
    fn claim_id(&mut self, id: Option<String>) -> String {
        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => {
                let mut generated = generate_call_id();
                while self.used_ids.contains(&generated) {
                    generated = generate_call_id();
                }
                generated
            }
        };
        let _ = self.used_ids.insert(id.clone());
        id
    }

    /// Close everything still open: the content block first, then tool
    /// builds in canonical index order.
    pub fn finalize(&mut self) -> Vec<StreamEvent> {
        let mut events = self.close_content();
        self.tools.sort_by_key(|t| t.index);
        while !self.tools.is_empty() {
            let build = self.tools.remove(0);
            events.extend(self.emit_tool(build));
        }
        events
    }

    /// Whether any tool call was emitted during this stream.
    #[must_use]
    pub fn saw_tool_call(&self) -> bool {
        self.saw_tool_call
    }

    /// Apply the tool-use forcing rule: some backends report a generic
    /// stop even when they emitted tool calls.
    #[must_use]
    pub fn resolve_stop_reason(&self, reported: StopReason) -> StopReason {
        if self.saw_tool_call {
            StopReason::ToolUse
        } else {
            reported
        }
    }
}

/// Parse accumulated argument fragments. Empty input or a parse failure
/// yields an empty object rather than failing the stream.
fn parse_arguments(tool_name: &str, fragments: &str) -> serde_json::Map<String, Value> {
    if fragments.trim().is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str::<Value>(fragments) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool_name, ?other, "tool arguments are not an object, using empty set");
            serde_json::Map::new()
        }
        Err(err) => {
            warn!(tool_name, error = %err, "tool argument JSON failed to parse, using empty set");
            serde_json::Map::new()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
