//! Runtime error types.

use krait_llm::ProviderError;

/// Errors surfaced by the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// LLM provider error (request build, auth, rate limit).
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The backend stream failed unrecoverably, or recoverably too many
    /// times.
    #[error("stream failed: {reason}")]
    Stream {
        /// Last stream error reason.
        reason: String,
    },

    /// No registered executor handles the tool.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A tool did not complete within its descriptor timeout.
    #[error("tool timed out: {tool_name} after {waited_ms}ms")]
    ToolTimeout {
        /// Tool name.
        tool_name: String,
        /// How long the scheduler waited.
        waited_ms: u64,
    },

    /// Session not found in the store.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Another run is already active for this session.
    #[error("session busy: {0}")]
    SessionBusy(String),

    /// The server-wide run limit is reached.
    #[error("server busy: {current}/{max} runs active")]
    ServerBusy {
        /// Currently active runs.
        current: usize,
        /// Configured limit.
        max: usize,
    },

    /// The turn was aborted externally.
    #[error("operation aborted")]
    Aborted,

    /// Persistence collaborator failure.
    #[error("store error: {0}")]
    Store(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether the caller can safely retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_recoverable(),
            Self::SessionBusy(_) | Self::ServerBusy { .. } | Self::Aborted => true,
            Self::Stream { .. }
            | Self::UnknownTool(_)
            | Self::ToolTimeout { .. }
            | Self::SessionNotFound(_)
            | Self::Store(_)
            | Self::Internal(_) => false,
        }
    }

    /// Error category string for event emission and metrics labels.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::Stream { .. } => "stream",
            Self::UnknownTool(_) => "unknown_tool",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionBusy(_) => "session_busy",
            Self::ServerBusy { .. } => "server_busy",
            Self::Aborted => "aborted",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }
}
