//! Session timeline entry types.
//!
//! Timeline entries are globally ordered per session by a monotonically
//! increasing `position`. Operator activity that overlaps a streaming
//! response is deferred by the runtime and assigned a position only after
//! the stream finalizes, so the timeline always reads "operator activity
//! after the AI turn it overlapped with", never interleaved.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a timeline entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEntryKind {
    /// Operator prompt that opened a turn.
    UserPrompt,
    /// Finalized assistant response for one streaming cycle.
    AssistantResponse,
    /// Terminal outcome of one tool invocation.
    ToolActivity,
    /// Operator activity outside the turn (manual console command, note).
    OperatorActivity,
}

/// One ordered entry in a session timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// Session the entry belongs to.
    pub session_id: String,
    /// Monotonic position within the session.
    pub position: u64,
    /// Entry kind.
    pub kind: TimelineEntryKind,
    /// Entry payload.
    pub payload: Value,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl TimelineEntry {
    /// Create an entry stamped with the current UTC time.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        position: u64,
        kind: TimelineEntryKind,
        payload: Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            position,
            kind,
            payload,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
