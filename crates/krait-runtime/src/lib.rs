//! # krait-runtime
//!
//! Orchestration layer: the per-session turn state machine, the tool
//! scheduler with mutex groups and approval gates, the broadcast event
//! emitter, persistence hooks, and the multi-session orchestrator.
//!
//! Each session's turn state is owned by exactly one async task; tasks
//! communicate only through events and completion channels, so sessions
//! stream concurrently without shared-state contention.
//!
//! ## Crate Position
//!
//! Depends on: krait-core, krait-llm. Top of the workspace; consumed by a
//! host process.

#![deny(unsafe_code)]

pub mod console;
pub mod emitter;
pub mod errors;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod turn;

pub use console::{ConsoleBackend, ConsoleExecutor, ConsoleOutput};
pub use emitter::{EventEmitter, session_topic};
pub use errors::RuntimeError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use scheduler::{ExecutionOutcome, ExecutorContext, ToolExecutor, ToolScheduler};
pub use store::{MemoryStore, SessionState, SessionStore};
pub use turn::controller::{TurnConfig, TurnController, TurnOutcome};
