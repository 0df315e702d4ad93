//! Multi-session orchestrator.
//!
//! Owns one [`TurnController`] per session and enforces two admission
//! rules: a session runs at most one turn at a time, and the server caps
//! concurrent runs with a semaphore. Every run gets a child cancellation
//! token off the shutdown token, so shutdown and per-session abort use
//! the same path.

use std::collections::HashMap;
use std::sync::Arc;

use krait_core::events::{BaseEvent, KraitEvent};
use krait_core::ids::new_run_id;
use krait_llm::Provider;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::emitter::EventEmitter;
use crate::errors::RuntimeError;
use crate::scheduler::ToolScheduler;
use crate::store::SessionStore;
use crate::turn::controller::{TurnConfig, TurnController, TurnOutcome};

/// Orchestrator admission and turn settings.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Server-wide cap on concurrent runs.
    pub max_concurrent_runs: usize,
    /// Turn settings applied to every session.
    pub turn: TurnConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 8,
            turn: TurnConfig::default(),
        }
    }
}

struct ActiveRun {
    run_id: String,
    cancel: CancellationToken,
}

/// Entry point for hosts: admits runs, routes operator actions, and
/// fans session events out through the shared emitter.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    scheduler: Arc<ToolScheduler>,
    store: Arc<dyn SessionStore>,
    emitter: Arc<EventEmitter>,
    config: OrchestratorConfig,
    semaphore: Arc<Semaphore>,
    runs: Mutex<HashMap<String, ActiveRun>>,
    controllers: Mutex<HashMap<String, Arc<TurnController>>>,
    shutdown: CancellationToken,
    drained: Notify,
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        scheduler: Arc<ToolScheduler>,
        store: Arc<dyn SessionStore>,
        emitter: Arc<EventEmitter>,
        config: OrchestratorConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_runs));
        Self {
            provider,
            scheduler,
            store,
            emitter,
            config,
            semaphore,
            runs: Mutex::new(HashMap::new()),
            controllers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            drained: Notify::new(),
        }
    }

    /// Event emitter shared by all sessions.
    #[must_use]
    pub fn emitter(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    /// Tool scheduler, for registering tools and executors.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<ToolScheduler> {
        &self.scheduler
    }

    /// Run one turn for a session. Rejects with [`RuntimeError::SessionBusy`]
    /// when the session already has a run in flight and
    /// [`RuntimeError::ServerBusy`] when the server cap is reached.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn run_turn(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> Result<TurnOutcome, RuntimeError> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::Aborted);
        }
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            return Err(RuntimeError::ServerBusy {
                current: self.config.max_concurrent_runs - self.semaphore.available_permits(),
                max: self.config.max_concurrent_runs,
            });
        };

        let cancel = self.shutdown.child_token();
        let run_id = new_run_id();
        {
            let mut runs = self.runs.lock();
            if runs.contains_key(session_id) {
                return Err(RuntimeError::SessionBusy(session_id.to_owned()));
            }
            let _ = runs.insert(
                session_id.to_owned(),
                ActiveRun {
                    run_id: run_id.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        let controller = self.controller(session_id);
        debug!(run_id, "run admitted");
        metrics::gauge!("krait_active_runs").increment(1.0);
        let result = controller.run_turn(prompt, &cancel).await;
        metrics::gauge!("krait_active_runs").decrement(1.0);
        let _ = self.runs.lock().remove(session_id);
        self.drained.notify_waiters();
        drop(permit);
        result
    }

    /// Approve a pending invocation.
    pub fn approve(&self, invocation_id: &str) -> bool {
        self.scheduler.approve(invocation_id)
    }

    /// Deny a pending invocation with an operator reason.
    pub fn deny(&self, invocation_id: &str, reason: impl Into<String>) -> bool {
        self.scheduler.deny(invocation_id, reason)
    }

    /// Resolve an async tool invocation with its result payload.
    pub fn resolve(&self, invocation_id: &str, value: Value) -> bool {
        self.scheduler.resolve(invocation_id, value)
    }

    /// Record operator activity on a session timeline.
    pub fn record_operator_activity(&self, session_id: &str, payload: Value) {
        self.controller(session_id).record_operator_activity(payload);
    }

    /// Abort a session's active run. Open invocations go terminal as
    /// errors through the run's cancellation token.
    pub fn abort(&self, session_id: &str) -> bool {
        let Some(cancel) = self
            .runs
            .lock()
            .get(session_id)
            .map(|run| run.cancel.clone())
        else {
            return false;
        };
        let open = self.scheduler.pending_approvals() + self.scheduler.pending_resolutions();
        cancel.cancel();
        self.emitter.emit(KraitEvent::SessionAborted {
            base: BaseEvent::now(session_id),
            open_invocations: u32::try_from(open).unwrap_or(u32::MAX),
        });
        info!(session_id, open, "session aborted");
        true
    }

    /// Whether a session has a run in flight.
    #[must_use]
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.runs.lock().contains_key(session_id)
    }

    /// Sessions with runs in flight.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<String> {
        self.runs.lock().keys().cloned().collect()
    }

    /// Cancel every run and wait for them to drain.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.shutdown.cancel();
        self.scheduler.cancel_all();
        loop {
            // Register before the emptiness check so a run finishing in
            // between cannot be missed.
            let notified = self.drained.notified();
            if self.runs.lock().is_empty() {
                break;
            }
            notified.await;
        }
    }

    fn controller(&self, session_id: &str) -> Arc<TurnController> {
        let mut controllers = self.controllers.lock();
        if let Some(controller) = controllers.get(session_id) {
            return Arc::clone(controller);
        }
        let controller = Arc::new(TurnController::new(
            session_id,
            Arc::clone(&self.provider),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.emitter),
            Arc::clone(&self.store),
            self.config.turn.clone(),
        ));
        let _ = controllers.insert(session_id.to_owned(), Arc::clone(&controller));
        controller
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
