//! Console tool executor.
//!
//! Wraps a single-threaded console backend (a container shell, a serial
//! console) behind the [`ToolExecutor`] seam. The backend may be booting
//! or serving another command when asked; attempts are retried with
//! bounded exponential backoff before the invocation is failed.
//!
//! The matching descriptor puts `console_exec` in the `"console"` mutex
//! group: the backend runs one command at a time, so invocations queue in
//! open order rather than racing the busy-retry loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use krait_core::retry::{AttemptOutcome, RetryError, RetryPolicy, retry_until_ready};
use krait_core::tools::ToolDescriptor;
use serde_json::{Value, json};
use tracing::instrument;

use crate::scheduler::{ExecutionOutcome, ExecutorContext, ToolExecutor};

/// Tool name served by [`ConsoleExecutor`].
pub const CONSOLE_TOOL: &str = "console_exec";

/// Output of one console command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleOutput {
    /// Combined stdout/stderr text.
    pub output: String,
    /// Process exit code.
    pub exit_code: i32,
}

/// A console that can run one command at a time.
#[async_trait]
pub trait ConsoleBackend: Send + Sync {
    /// Attempt to run a command. `Starting` and `Busy` are retried by the
    /// executor; `Failed` is permanent.
    async fn exec(&self, command: &str) -> AttemptOutcome<ConsoleOutput, String>;
}

/// [`ToolExecutor`] for `console_exec`.
pub struct ConsoleExecutor {
    backend: Arc<dyn ConsoleBackend>,
    policy: RetryPolicy,
}

impl ConsoleExecutor {
    /// Create an executor with the default retry policy.
    #[must_use]
    pub fn new(backend: Arc<dyn ConsoleBackend>) -> Self {
        Self::with_policy(backend, RetryPolicy::default())
    }

    /// Create an executor with a custom retry policy.
    #[must_use]
    pub fn with_policy(backend: Arc<dyn ConsoleBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Descriptor to register alongside this executor: approval-gated,
    /// serialized through the `"console"` mutex group.
    #[must_use]
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            CONSOLE_TOOL,
            "Run a shell command on the session console",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command line to run" }
                },
                "required": ["command"]
            }),
        )
        .with_approval()
        .with_mutex_group("console")
        .with_timeout(Duration::from_secs(120))
    }
}

#[async_trait]
impl ToolExecutor for ConsoleExecutor {
    fn handles_tool(&self, name: &str) -> bool {
        name == CONSOLE_TOOL
    }

    #[instrument(skip_all, fields(invocation_id = %ctx.invocation_id))]
    async fn execute(
        &self,
        _name: &str,
        arguments: &serde_json::Map<String, Value>,
        ctx: &ExecutorContext,
    ) -> ExecutionOutcome {
        let Some(command) = arguments.get("command").and_then(Value::as_str) else {
            return ExecutionOutcome::Failed("console_exec requires a 'command' argument".into());
        };

        let result = retry_until_ready(
            || self.backend.exec(command),
            &self.policy,
            &ctx.cancel,
        )
        .await;

        match result {
            Ok(output) => ExecutionOutcome::Completed(json!({
                "content": output.output,
                "exitCode": output.exit_code,
                "isError": output.exit_code != 0,
            })),
            Err(RetryError::Timeout { waited }) => {
                ExecutionOutcome::Failed(format!("console not ready after {waited:?}"))
            }
            Err(RetryError::Cancelled) => ExecutionOutcome::Failed("aborted".into()),
            Err(RetryError::Permanent(reason)) => {
                ExecutionOutcome::Failed(format!("console failed: {reason}"))
            }
        }
    }
}
