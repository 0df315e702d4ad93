//! Per-session timeline ordering.
//!
//! Positions are assigned from a monotonic counter owned here. While a
//! stream is in flight, operator activity is deferred instead of being
//! assigned a position; the deferred entries are flushed after the stream
//! finalizes so they always sort after the assistant response they
//! overlapped with.

use krait_core::timeline::{TimelineEntry, TimelineEntryKind};
use serde_json::Value;

/// Position assignment and operator-activity deferral for one session.
pub struct SessionTimeline {
    session_id: String,
    next_position: u64,
    streaming: bool,
    deferred: Vec<Value>,
}

impl SessionTimeline {
    /// Resume a timeline at `next_position` (0 for a fresh session).
    #[must_use]
    pub fn new(session_id: impl Into<String>, next_position: u64) -> Self {
        Self {
            session_id: session_id.into(),
            next_position,
            streaming: false,
            deferred: Vec::new(),
        }
    }

    /// Mark a stream as in flight; operator activity defers until
    /// [`Self::finish_stream`].
    pub fn begin_stream(&mut self) {
        self.streaming = true;
    }

    /// Mark the stream finalized. Deferred entries stay queued until
    /// [`Self::flush_deferred`] so the finalized response can be recorded
    /// first.
    pub fn finish_stream(&mut self) {
        self.streaming = false;
    }

    /// Record an entry, assigning the next position. Operator activity
    /// during a stream is deferred and returns `None`.
    pub fn record(&mut self, kind: TimelineEntryKind, payload: Value) -> Option<TimelineEntry> {
        if self.streaming && kind == TimelineEntryKind::OperatorActivity {
            self.deferred.push(payload);
            return None;
        }
        Some(self.assign(kind, payload))
    }

    /// Flush deferred operator activity in arrival order.
    pub fn flush_deferred(&mut self) -> Vec<TimelineEntry> {
        let deferred = std::mem::take(&mut self.deferred);
        deferred
            .into_iter()
            .map(|payload| self.assign(TimelineEntryKind::OperatorActivity, payload))
            .collect()
    }

    /// Next position to be assigned.
    #[must_use]
    pub fn next_position(&self) -> u64 {
        self.next_position
    }

    /// Raise the position floor when resuming from stored state. Never
    /// moves backwards.
    pub fn ensure_at_least(&mut self, position: u64) {
        if position > self.next_position {
            self.next_position = position;
        }
    }

    /// Number of entries waiting on a stream finalize.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    fn assign(&mut self, kind: TimelineEntryKind, payload: Value) -> TimelineEntry {
        let position = self.next_position;
        self.next_position += 1;
        TimelineEntry::new(self.session_id.clone(), position, kind, payload)
    }
}
