//! Event types for agent operation.
//!
//! Two event families:
//!
//! - **[`StreamEvent`]**: Canonical low-level streaming events produced by
//!   the per-backend normalizers (block start/delta/stop, tool calls,
//!   completion, errors). Purely in-memory, never persisted.
//! - **[`KraitEvent`]**: High-level session events with session context
//!   (turn lifecycle, invocation lifecycle, approvals, timeline). Broadcast
//!   to external subscribers and possibly persisted by the host.
//!
//! `KraitEvent` follows the self-healing contract: every event in a chain
//! re-includes the identity fields of the event(s) it supersedes, so a
//! subscriber that joins late can reconstruct current state from the single
//! latest event without replay. The contract is enforced by tests in this
//! module, not by convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::InvocationStatus;

// ─────────────────────────────────────────────────────────────────────────────
// Canonical stream model
// ─────────────────────────────────────────────────────────────────────────────

/// Canonical stop reason, mapped from each backend's own vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Model finished its response normally.
    EndTurn,
    /// Model wants tool results before continuing.
    ToolUse,
    /// Output token limit reached.
    MaxTokens,
}

impl StopReason {
    /// Canonical string form (matches the serde rename).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
        }
    }
}

/// Content kind of a stream block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Answer text.
    Text,
    /// Internal reasoning.
    Thinking,
    /// A single tool call.
    ToolCall,
}

/// Token accounting as reported by the backend.
///
/// Cache metrics a backend does not report stay `None` — callers can
/// distinguish "not reported" from "zero".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Input (prompt) tokens.
    pub input_tokens: u64,
    /// Output (completion) tokens.
    pub output_tokens: u64,
    /// Tokens served from the backend's prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
    /// Tokens written to the backend's prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
}

/// Canonical events emitted during response streaming.
///
/// Invariants (per stream):
/// - every `ContentBlockStart { index: i }` is followed by zero or more
///   `ContentDelta { index: i }` then exactly one `ContentBlockStop { index: i }`
///   before any other block opens at the same index;
/// - indices are assigned in first-seen order, monotonically increasing,
///   independent of the backend's own indexing scheme;
/// - a stream containing at least one `ToolCall` always completes with
///   `stop_reason: ToolUse`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream started.
    Started {
        /// Model the backend is serving.
        model: String,
    },

    /// A content block opened.
    ContentBlockStart {
        /// Canonical block index.
        index: usize,
        /// Block content kind.
        kind: ContentKind,
    },

    /// Incremental content for an open block. For tool-call blocks the
    /// text is a raw argument-JSON fragment.
    ContentDelta {
        /// Canonical block index.
        index: usize,
        /// Content fragment.
        text: String,
    },

    /// A content block closed.
    ContentBlockStop {
        /// Canonical block index.
        index: usize,
    },

    /// A fully constructed tool call (emitted at block close).
    ToolCall {
        /// Canonical block index of the tool-call block.
        index: usize,
        /// Backend-supplied or generated call ID.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed arguments. Empty object if the backend's argument JSON
        /// failed to parse.
        arguments: serde_json::Map<String, Value>,
    },

    /// Stream completed.
    Complete {
        /// Token accounting.
        usage: TokenUsage,
        /// Canonical stop reason.
        #[serde(rename = "stopReason")]
        stop_reason: StopReason,
        /// Opaque backend continuation token, echoed into the next
        /// request when present.
        #[serde(rename = "continuationToken", skip_serializing_if = "Option::is_none")]
        continuation_token: Option<String>,
    },

    /// Stream error.
    Error {
        /// Human-readable reason.
        reason: String,
        /// Whether a retry without operator intervention is safe.
        recoverable: bool,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// KraitEvent — session lifecycle events
// ─────────────────────────────────────────────────────────────────────────────

/// Turn state machine phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// No turn in flight.
    Idle,
    /// Consuming a backend response stream.
    Streaming,
    /// At least one invocation waits on an operator decision.
    AwaitingApproval,
    /// Invocations are executing; waiting for all to reach a terminal state.
    AwaitingToolCompletion,
    /// Building the continuation request.
    Continuing,
    /// Turn finished.
    Done,
    /// Turn ended on an unrecoverable failure.
    Error,
}

/// Common fields for all session events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Session this event belongs to.
    pub session_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a new base event with the current UTC timestamp.
    #[must_use]
    pub fn now(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Declarative macro that generates [`KraitEvent`], its `base()` and
/// `event_type()` accessors, and a compile-time `VARIANT_COUNT`.
///
/// Adding a new variant requires ONE edit (inside this invocation).
/// The compiler enforces exhaustive matching everywhere else.
macro_rules! krait_events {
    ($(
        $(#[doc = $doc:literal])*
        $variant:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty
            ),*
            $(,)?
        } => $rename:literal
    ),* $(,)?) => {
        /// High-level session event with session context.
        ///
        /// Broadcast to external subscribers. Every event chain obeys the
        /// self-healing contract: later events re-include the identity
        /// fields of the events they supersede.
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "type")]
        #[allow(missing_docs)]
        pub enum KraitEvent {
            $(
                $(#[doc = $doc])*
                #[serde(rename = $rename)]
                $variant {
                    #[serde(flatten)]
                    base: BaseEvent,
                    $(
                        $(#[$fmeta])*
                        $field: $ty,
                    )*
                },
            )*
        }

        impl KraitEvent {
            /// Get the base event fields.
            #[must_use]
            pub fn base(&self) -> &BaseEvent {
                match self {
                    $(Self::$variant { base, .. } => base,)*
                }
            }

            /// Get the event type string (for type discrimination).
            #[must_use]
            pub fn event_type(&self) -> &str {
                match self {
                    $(Self::$variant { .. } => $rename,)*
                }
            }
        }

        /// Number of `KraitEvent` variants (compile-time constant for tests).
        #[cfg(test)]
        pub(crate) const VARIANT_COUNT: usize = [$($rename),*].len();
    };
}

krait_events! {
    // -- Turn lifecycle chain --

    /// Turn opened on a user prompt.
    TurnStarted {
        #[serde(rename = "turnId")]
        turn_id: String,
        turn: u32,
        prompt: String,
    } => "turn_started",

    /// Turn moved to a new phase. Re-includes the turn identity so a
    /// subscriber that missed `turn_started` still knows which turn this is.
    TurnStateChanged {
        #[serde(rename = "turnId")]
        turn_id: String,
        turn: u32,
        phase: TurnPhase,
    } => "turn_state_changed",

    /// Turn reached a terminal state.
    TurnCompleted {
        #[serde(rename = "turnId")]
        turn_id: String,
        turn: u32,
        phase: TurnPhase,
        #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        #[serde(rename = "tokenUsage", skip_serializing_if = "Option::is_none")]
        token_usage: Option<TokenUsage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    } => "turn_completed",

    // -- Streaming content --

    /// Incremental assistant content (text or thinking) for live rendering.
    ContentDelta {
        #[serde(rename = "turnId")]
        turn_id: String,
        kind: ContentKind,
        delta: String,
    } => "content_delta",

    /// A recoverable stream failure is about to be retried.
    StreamRetry {
        #[serde(rename = "turnId")]
        turn_id: String,
        attempt: u32,
        #[serde(rename = "maxAttempts")]
        max_attempts: u32,
        #[serde(rename = "delayMs")]
        delay_ms: u64,
        reason: String,
    } => "stream_retry",

    // -- Invocation lifecycle chain --

    /// A tool invocation was opened from a stream `ToolCall` event.
    InvocationOpened {
        #[serde(rename = "invocationId")]
        invocation_id: String,
        #[serde(rename = "turnId")]
        turn_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        arguments: serde_json::Map<String, Value>,
        #[serde(rename = "approvalRequired")]
        approval_required: bool,
        #[serde(rename = "mutexGroup", skip_serializing_if = "Option::is_none")]
        mutex_group: Option<String>,
    } => "invocation_opened",

    /// An invocation needs an operator decision. Re-includes the defining
    /// identity fields from `invocation_opened`.
    ApprovalRequested {
        #[serde(rename = "invocationId")]
        invocation_id: String,
        #[serde(rename = "turnId")]
        turn_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        arguments: serde_json::Map<String, Value>,
    } => "approval_requested",

    /// An invocation changed status. Re-includes the invocation identity
    /// so late subscribers reconstruct state from this event alone.
    InvocationStateChanged {
        #[serde(rename = "invocationId")]
        invocation_id: String,
        #[serde(rename = "turnId")]
        turn_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        status: InvocationStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(rename = "denialReason", skip_serializing_if = "Option::is_none")]
        denial_reason: Option<String>,
    } => "invocation_state_changed",

    // -- Timeline --

    /// An entry was appended to the session timeline.
    TimelineAppended {
        position: u64,
        kind: crate::timeline::TimelineEntryKind,
        payload: Value,
    } => "timeline_appended",

    // -- Session --

    /// Session aborted; all open invocations were marked terminal.
    SessionAborted {
        #[serde(rename = "openInvocations")]
        open_invocations: u32,
    } => "session_aborted",
}

impl KraitEvent {
    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.base().session_id
    }

    /// Get the timestamp.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.base().timestamp
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Create a turn-state-changed event.
#[must_use]
pub fn turn_state_event(
    session_id: impl Into<String>,
    turn_id: impl Into<String>,
    turn: u32,
    phase: TurnPhase,
) -> KraitEvent {
    KraitEvent::TurnStateChanged {
        base: BaseEvent::now(session_id),
        turn_id: turn_id.into(),
        turn,
        phase,
    }
}

/// Create an invocation-state-changed event from an invocation snapshot.
#[must_use]
pub fn invocation_state_event(
    session_id: impl Into<String>,
    turn_id: impl Into<String>,
    invocation: &crate::tools::ToolInvocation,
) -> KraitEvent {
    KraitEvent::InvocationStateChanged {
        base: BaseEvent::now(session_id),
        invocation_id: invocation.id.clone(),
        turn_id: turn_id.into(),
        tool_name: invocation.name.clone(),
        status: invocation.status,
        result: invocation.result.clone(),
        is_error: invocation.is_error.then_some(true),
        denial_reason: invocation.denial_reason.clone(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
