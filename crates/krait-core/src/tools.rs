//! Tool registration and invocation lifecycle types.
//!
//! A [`ToolDescriptor`] is registered once per deployment and is immutable.
//! A [`ToolInvocation`] is created when a stream `ToolCall` event is
//! observed and mutated by approval actions and executor completion until
//! it reaches a terminal state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable description of a registered tool.
#[derive(Clone, Debug)]
pub struct ToolDescriptor {
    /// Tool name (unique per deployment).
    pub name: String,
    /// Human-readable description sent to the model.
    pub description: String,
    /// JSON-schema parameter definition.
    pub parameters: Value,
    /// Whether execution requires an operator approval.
    pub approval_required: bool,
    /// Mutual-exclusion group token. Tools sharing a group execute
    /// strictly one-at-a-time in invocation-open order.
    pub mutex_group: Option<String>,
    /// Bound on how long the scheduler waits for completion.
    pub timeout: Option<Duration>,
}

impl ToolDescriptor {
    /// Create a descriptor with no approval gate, no mutex group, no timeout.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            approval_required: false,
            mutex_group: None,
            timeout: None,
        }
    }

    /// Require operator approval before execution.
    #[must_use]
    pub fn with_approval(mut self) -> Self {
        self.approval_required = true;
        self
    }

    /// Join a mutual-exclusion group.
    #[must_use]
    pub fn with_mutex_group(mut self, group: impl Into<String>) -> Self {
        self.mutex_group = Some(group.into());
        self
    }

    /// Bound completion wait time.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Invocation lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Waiting on an operator decision.
    PendingApproval,
    /// Approved, not yet executing.
    Approved,
    /// Executor is running.
    Executing,
    /// Executor returned a result.
    Finished,
    /// Operator denied execution.
    Denied,
    /// Execution failed or was aborted.
    Error,
}

impl InvocationStatus {
    /// Whether this status is terminal (finished, denied, or error).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Denied | Self::Error)
    }
}

/// A single tool invocation opened during a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Call ID (backend-supplied or generated).
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed arguments.
    pub arguments: serde_json::Map<String, Value>,
    /// Current lifecycle status.
    pub status: InvocationStatus,
    /// Result payload once finished (or the error payload).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Whether the result represents a tool failure.
    pub is_error: bool,
    /// Operator-supplied denial reason, folded into the continuation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
}

impl ToolInvocation {
    /// Open a new invocation in the `Approved` state (the scheduler moves
    /// it to `PendingApproval` when the descriptor requires a gate).
    #[must_use]
    pub fn open(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: InvocationStatus::Approved,
            result: None,
            is_error: false,
            denial_reason: None,
        }
    }

    /// Whether the invocation has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark finished with a result payload.
    pub fn finish(&mut self, result: Value, is_error: bool) {
        self.status = InvocationStatus::Finished;
        self.result = Some(result);
        self.is_error = is_error;
    }

    /// Mark denied with an operator reason. A denied invocation never
    /// executes and is not an error.
    pub fn deny(&mut self, reason: impl Into<String>) {
        self.status = InvocationStatus::Denied;
        self.denial_reason = Some(reason.into());
    }

    /// Mark errored with a failure payload.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = InvocationStatus::Error;
        self.result = Some(error_result(reason.into()));
        self.is_error = true;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Build a plain-text tool result payload.
#[must_use]
pub fn text_result(text: impl Into<String>) -> Value {
    serde_json::json!({ "content": text.into(), "isError": false })
}

/// Build an error tool result payload.
#[must_use]
pub fn error_result(message: impl Into<String>) -> Value {
    serde_json::json!({ "content": message.into(), "isError": true })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
