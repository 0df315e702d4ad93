//! Tool scheduler: executes invocation batches with approval gates,
//! mutual-exclusion groups, and per-tool completion timeouts.
//!
//! Ordering rules:
//! - invocations in the same mutex group run strictly one-at-a-time in
//!   invocation-open order; a successor starts only after its predecessor
//!   reaches a terminal state;
//! - invocations in different groups (or no group) run concurrently;
//! - an approval wait counts as occupancy: a gated invocation holds its
//!   group slot until decided.
//!
//! Descriptor timeouts bound execution and async completion, not the
//! approval wait. A timed-out invocation becomes an error tool result for
//! that invocation alone, never a turn failure.

mod tracker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use krait_core::events::{BaseEvent, KraitEvent, invocation_state_event};
use krait_core::tools::{InvocationStatus, ToolDescriptor, ToolInvocation};
use metrics::{counter, histogram};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::emitter::EventEmitter;
use self::tracker::InvocationTracker;

// ─────────────────────────────────────────────────────────────────────────────
// Executor contract
// ─────────────────────────────────────────────────────────────────────────────

/// Context handed to an executor for a single invocation.
#[derive(Clone, Debug)]
pub struct ExecutorContext {
    /// Session the invocation belongs to.
    pub session_id: String,
    /// Invocation ID, used to resolve async completions.
    pub invocation_id: String,
    /// Cooperative cancellation signal for the run.
    pub cancel: CancellationToken,
}

/// Outcome of an executor's `execute` call.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The tool ran to completion; the value is the result payload.
    Completed(Value),
    /// Execution started; the result arrives later via
    /// [`ToolScheduler::resolve`] keyed by the invocation ID.
    Started,
    /// Execution failed before producing a result.
    Failed(String),
}

/// A tool executor. The scheduler asks each registered executor in
/// registration order and dispatches to the first that handles the name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Whether this executor handles the named tool.
    fn handles_tool(&self, name: &str) -> bool;

    /// Execute the tool.
    async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, Value>,
        ctx: &ExecutorContext,
    ) -> ExecutionOutcome;
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

enum ApprovalDecision {
    Approved,
    Denied(String),
}

/// Per-group turnstile: wait on the predecessor, release to the successor.
struct Turnstile {
    wait: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<()>,
}

/// Dispatches tool invocations to registered executors.
pub struct ToolScheduler {
    emitter: Arc<EventEmitter>,
    tools: RwLock<HashMap<String, ToolDescriptor>>,
    executors: RwLock<Vec<Arc<dyn ToolExecutor>>>,
    tracker: Mutex<InvocationTracker>,
    approvals: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
    /// Tail receiver per mutex group. Entering a group swaps in a fresh
    /// receiver and inherits the previous tail to wait on.
    groups: Mutex<HashMap<String, oneshot::Receiver<()>>>,
}

impl ToolScheduler {
    /// Create a scheduler emitting lifecycle events on `emitter`.
    #[must_use]
    pub fn new(emitter: Arc<EventEmitter>) -> Self {
        Self {
            emitter,
            tools: RwLock::new(HashMap::new()),
            executors: RwLock::new(Vec::new()),
            tracker: Mutex::new(InvocationTracker::new()),
            approvals: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Register a tool descriptor. Later registrations replace earlier
    /// ones with the same name.
    pub fn register_tool(&self, descriptor: ToolDescriptor) {
        let _ = self
            .tools
            .write()
            .insert(descriptor.name.clone(), descriptor);
    }

    /// Register an executor. Dispatch is first-match in registration order.
    pub fn register_executor(&self, executor: Arc<dyn ToolExecutor>) {
        self.executors.write().push(executor);
    }

    /// Look up a registered descriptor by tool name.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(name).cloned()
    }

    /// Registered descriptors, for building provider tool definitions.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.read().values().cloned().collect()
    }

    /// Approve a pending invocation. Returns `false` if nothing with this
    /// ID is awaiting a decision.
    pub fn approve(&self, invocation_id: &str) -> bool {
        match self.approvals.lock().remove(invocation_id) {
            Some(tx) => tx.send(ApprovalDecision::Approved).is_ok(),
            None => false,
        }
    }

    /// Deny a pending invocation with an operator reason.
    pub fn deny(&self, invocation_id: &str, reason: impl Into<String>) -> bool {
        match self.approvals.lock().remove(invocation_id) {
            Some(tx) => tx.send(ApprovalDecision::Denied(reason.into())).is_ok(),
            None => false,
        }
    }

    /// Resolve an async invocation with its result payload.
    pub fn resolve(&self, invocation_id: &str, value: Value) -> bool {
        self.tracker.lock().resolve(invocation_id, value)
    }

    /// Whether an invocation is awaiting an async resolution.
    #[must_use]
    pub fn has_pending_resolution(&self, invocation_id: &str) -> bool {
        self.tracker.lock().has_pending(invocation_id)
    }

    /// Number of invocations awaiting an operator decision.
    #[must_use]
    pub fn pending_approvals(&self) -> usize {
        self.approvals.lock().len()
    }

    /// Number of invocations awaiting an async resolution.
    #[must_use]
    pub fn pending_resolutions(&self) -> usize {
        self.tracker.lock().pending_count()
    }

    /// Drop every pending approval and async resolution. Waiting
    /// invocation tasks observe the closed channels and go terminal.
    pub fn cancel_all(&self) {
        self.approvals.lock().clear();
        self.tracker.lock().cancel_all();
    }

    /// Run a batch of invocations to terminal state. Results come back in
    /// input order once every invocation is terminal; unrelated groups
    /// make progress concurrently.
    pub async fn dispatch_batch(
        self: &Arc<Self>,
        session_id: &str,
        turn_id: &str,
        invocations: Vec<ToolInvocation>,
        autonomous: bool,
        cancel: &CancellationToken,
    ) -> Vec<ToolInvocation> {
        let mut fallbacks = Vec::with_capacity(invocations.len());
        let mut tasks = Vec::with_capacity(invocations.len());

        for invocation in invocations {
            fallbacks.push(invocation.clone());
            let descriptor = self.descriptor(&invocation.name);

            // Turnstiles and approval channels are registered here, in
            // invocation-open order, before any task is spawned. This is
            // what pins same-group execution order to open order.
            let turnstile = descriptor
                .as_ref()
                .and_then(|d| d.mutex_group.as_deref())
                .map(|group| self.enter_group(group));
            let approval_rx = match &descriptor {
                Some(d) if d.approval_required && !autonomous => {
                    let (tx, rx) = oneshot::channel();
                    let _ = self.approvals.lock().insert(invocation.id.clone(), tx);
                    Some(rx)
                }
                _ => None,
            };

            let scheduler = Arc::clone(self);
            let session = session_id.to_owned();
            let turn = turn_id.to_owned();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .run_invocation(&session, &turn, invocation, descriptor, turnstile, approval_rx, cancel)
                    .await
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (task, fallback) in tasks.into_iter().zip(fallbacks) {
            match task.await {
                Ok(invocation) => results.push(invocation),
                Err(e) => {
                    warn!(invocation_id = %fallback.id, error = %e, "invocation task failed");
                    let mut invocation = fallback;
                    invocation.fail(format!("invocation task failed: {e}"));
                    self.emitter
                        .emit(invocation_state_event(session_id, turn_id, &invocation));
                    results.push(invocation);
                }
            }
        }
        results
    }

    fn enter_group(&self, group: &str) -> Turnstile {
        let (tx, rx) = oneshot::channel();
        let wait = self.groups.lock().insert(group.to_owned(), rx);
        Turnstile { wait, release: tx }
    }

    #[instrument(skip_all, fields(tool = %invocation.name, invocation_id = %invocation.id))]
    #[allow(clippy::too_many_arguments)]
    async fn run_invocation(
        &self,
        session_id: &str,
        turn_id: &str,
        mut invocation: ToolInvocation,
        descriptor: Option<ToolDescriptor>,
        turnstile: Option<Turnstile>,
        approval_rx: Option<oneshot::Receiver<ApprovalDecision>>,
        cancel: CancellationToken,
    ) -> ToolInvocation {
        let started = Instant::now();
        let (wait, release) = match turnstile {
            Some(t) => (t.wait, Some(t.release)),
            None => (None, None),
        };

        // Wait for the group predecessor to go terminal. A closed channel
        // means the predecessor was dropped, which also releases the slot.
        if let Some(prev) = wait {
            tokio::select! {
                () = cancel.cancelled() => {
                    invocation.fail("aborted");
                    self.finish_invocation(session_id, turn_id, &invocation, release, started);
                    return invocation;
                }
                _ = prev => {}
            }
        }

        if let Some(rx) = approval_rx {
            invocation.status = InvocationStatus::PendingApproval;
            self.emitter
                .emit(invocation_state_event(session_id, turn_id, &invocation));
            self.emitter.emit(KraitEvent::ApprovalRequested {
                base: BaseEvent::now(session_id),
                invocation_id: invocation.id.clone(),
                turn_id: turn_id.to_owned(),
                tool_name: invocation.name.clone(),
                arguments: invocation.arguments.clone(),
            });

            let decision = tokio::select! {
                () = cancel.cancelled() => None,
                d = rx => d.ok(),
            };
            let _ = self.approvals.lock().remove(&invocation.id);

            match decision {
                Some(ApprovalDecision::Approved) => {
                    invocation.status = InvocationStatus::Approved;
                    self.emitter
                        .emit(invocation_state_event(session_id, turn_id, &invocation));
                }
                Some(ApprovalDecision::Denied(reason)) => {
                    invocation.deny(reason);
                    self.finish_invocation(session_id, turn_id, &invocation, release, started);
                    return invocation;
                }
                None => {
                    invocation.fail("aborted");
                    self.finish_invocation(session_id, turn_id, &invocation, release, started);
                    return invocation;
                }
            }
        }

        invocation.status = InvocationStatus::Executing;
        self.emitter
            .emit(invocation_state_event(session_id, turn_id, &invocation));

        let timeout = descriptor.as_ref().and_then(|d| d.timeout);
        let timed_out = match timeout {
            Some(dur) => tokio::time::timeout(
                dur,
                self.execute_to_completion(session_id, &mut invocation, &cancel),
            )
            .await
            .is_err(),
            None => {
                self.execute_to_completion(session_id, &mut invocation, &cancel)
                    .await;
                false
            }
        };
        if timed_out {
            let waited_ms = duration_ceil_ms(timeout.unwrap_or_default());
            self.tracker.lock().forget(&invocation.id);
            invocation.fail(format!("timed out after {waited_ms}ms"));
        }

        self.finish_invocation(session_id, turn_id, &invocation, release, started);
        invocation
    }

    async fn execute_to_completion(
        &self,
        session_id: &str,
        invocation: &mut ToolInvocation,
        cancel: &CancellationToken,
    ) {
        let executor = {
            let executors = self.executors.read();
            executors
                .iter()
                .find(|e| e.handles_tool(&invocation.name))
                .cloned()
        };
        let Some(executor) = executor else {
            invocation.fail(format!("unknown tool: {}", invocation.name));
            return;
        };

        // Register the completion channel before the executor runs so a
        // resolve racing the Started return cannot be lost.
        let completion = self.tracker.lock().register(&invocation.id);
        let ctx = ExecutorContext {
            session_id: session_id.to_owned(),
            invocation_id: invocation.id.clone(),
            cancel: cancel.clone(),
        };

        match executor
            .execute(&invocation.name, &invocation.arguments, &ctx)
            .await
        {
            ExecutionOutcome::Completed(value) => {
                self.tracker.lock().forget(&invocation.id);
                let is_error = result_is_error(&value);
                invocation.finish(value, is_error);
            }
            ExecutionOutcome::Failed(reason) => {
                self.tracker.lock().forget(&invocation.id);
                invocation.fail(reason);
            }
            ExecutionOutcome::Started => {
                let resolved = tokio::select! {
                    () = cancel.cancelled() => None,
                    r = completion => r.ok(),
                };
                match resolved {
                    Some(value) => {
                        let is_error = result_is_error(&value);
                        invocation.finish(value, is_error);
                    }
                    None => {
                        self.tracker.lock().forget(&invocation.id);
                        invocation.fail("aborted");
                    }
                }
            }
        }
    }

    fn finish_invocation(
        &self,
        session_id: &str,
        turn_id: &str,
        invocation: &ToolInvocation,
        release: Option<oneshot::Sender<()>>,
        started: Instant,
    ) {
        self.emitter
            .emit(invocation_state_event(session_id, turn_id, invocation));
        counter!(
            "krait_tool_invocations_total",
            "tool" => invocation.name.clone(),
            "status" => status_label(invocation.status),
        )
        .increment(1);
        histogram!("krait_tool_duration_ms", "tool" => invocation.name.clone())
            .record(duration_ceil_ms(started.elapsed()) as f64);
        if let Some(tx) = release {
            let _ = tx.send(());
        }
    }
}

fn status_label(status: InvocationStatus) -> &'static str {
    match status {
        InvocationStatus::PendingApproval => "pending_approval",
        InvocationStatus::Approved => "approved",
        InvocationStatus::Executing => "executing",
        InvocationStatus::Finished => "finished",
        InvocationStatus::Denied => "denied",
        InvocationStatus::Error => "error",
    }
}

fn result_is_error(value: &Value) -> bool {
    value
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn duration_ceil_ms(d: Duration) -> u64 {
    let ms = d.as_secs_f64() * 1000.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        ms.ceil().max(0.0) as u64
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use krait_core::tools::text_result;
    use serde_json::json;

    fn args(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn scheduler() -> (Arc<ToolScheduler>, Arc<EventEmitter>) {
        let emitter = Arc::new(EventEmitter::new());
        (Arc::new(ToolScheduler::new(Arc::clone(&emitter))), emitter)
    }

    struct EchoExecutor;

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        fn handles_tool(&self, name: &str) -> bool {
            name == "echo"
        }

        async fn execute(
            &self,
            _name: &str,
            arguments: &serde_json::Map<String, Value>,
            _ctx: &ExecutorContext,
        ) -> ExecutionOutcome {
            let text = arguments
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            ExecutionOutcome::Completed(text_result(text))
        }
    }

    /// Sleeps per the `delay_ms` argument and records completion order.
    struct SlowExecutor {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ToolExecutor for SlowExecutor {
        fn handles_tool(&self, name: &str) -> bool {
            name == "slow"
        }

        async fn execute(
            &self,
            _name: &str,
            arguments: &serde_json::Map<String, Value>,
            ctx: &ExecutorContext,
        ) -> ExecutionOutcome {
            let delay = arguments
                .get("delay_ms")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.log.lock().push(ctx.invocation_id.clone());
            ExecutionOutcome::Completed(text_result("slept"))
        }
    }

    struct AsyncExecutor;

    #[async_trait]
    impl ToolExecutor for AsyncExecutor {
        fn handles_tool(&self, name: &str) -> bool {
            name == "bg"
        }

        async fn execute(
            &self,
            _name: &str,
            _arguments: &serde_json::Map<String, Value>,
            _ctx: &ExecutorContext,
        ) -> ExecutionOutcome {
            ExecutionOutcome::Started
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sync_executor_completes_invocation() {
        let (scheduler, _emitter) = scheduler();
        scheduler.register_tool(ToolDescriptor::new("echo", "echo", json!({})));
        scheduler.register_executor(Arc::new(EchoExecutor));

        let invocation = ToolInvocation::open("call_1", "echo", args(json!({"text": "hi"})));
        let results = scheduler
            .dispatch_batch("s1", "turn_1", vec![invocation], false, &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, InvocationStatus::Finished);
        assert!(!results[0].is_error);
        assert_eq!(results[0].result.as_ref().unwrap()["content"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_fails_only_that_invocation() {
        let (scheduler, _emitter) = scheduler();
        scheduler.register_tool(ToolDescriptor::new("echo", "echo", json!({})));
        scheduler.register_executor(Arc::new(EchoExecutor));

        let results = scheduler
            .dispatch_batch(
                "s1",
                "turn_1",
                vec![
                    ToolInvocation::open("call_1", "missing", args(json!({}))),
                    ToolInvocation::open("call_2", "echo", args(json!({"text": "ok"}))),
                ],
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results[0].status, InvocationStatus::Error);
        assert!(results[0].is_error);
        assert!(
            results[0].result.as_ref().unwrap()["content"]
                .as_str()
                .unwrap()
                .contains("unknown tool")
        );
        assert_eq!(results[1].status, InvocationStatus::Finished);
    }

    // ── Approval gate ───────────────────────────────────────────────────

    async fn wait_for_approval_request(
        rx: &mut tokio::sync::broadcast::Receiver<KraitEvent>,
    ) -> String {
        loop {
            let event = rx.recv().await.unwrap();
            if let KraitEvent::ApprovalRequested { invocation_id, .. } = event {
                return invocation_id;
            }
        }
    }

    #[tokio::test]
    async fn denied_invocation_never_executes() {
        let (scheduler, emitter) = scheduler();
        scheduler.register_tool(ToolDescriptor::new("echo", "echo", json!({})).with_approval());
        scheduler.register_executor(Arc::new(EchoExecutor));
        let mut rx = emitter.subscribe();

        let dispatch = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .dispatch_batch(
                        "s1",
                        "turn_1",
                        vec![ToolInvocation::open("call_1", "echo", args(json!({})))],
                        false,
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        let id = wait_for_approval_request(&mut rx).await;
        assert!(scheduler.deny(&id, "not on the engagement scope"));

        let results = dispatch.await.unwrap();
        assert_eq!(results[0].status, InvocationStatus::Denied);
        assert!(!results[0].is_error);
        assert_eq!(
            results[0].denial_reason.as_deref(),
            Some("not on the engagement scope")
        );
        assert!(results[0].result.is_none());
    }

    #[tokio::test]
    async fn approved_invocation_executes() {
        let (scheduler, emitter) = scheduler();
        scheduler.register_tool(ToolDescriptor::new("echo", "echo", json!({})).with_approval());
        scheduler.register_executor(Arc::new(EchoExecutor));
        let mut rx = emitter.subscribe();

        let dispatch = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .dispatch_batch(
                        "s1",
                        "turn_1",
                        vec![ToolInvocation::open(
                            "call_1",
                            "echo",
                            args(json!({"text": "approved"})),
                        )],
                        false,
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        let id = wait_for_approval_request(&mut rx).await;
        assert!(scheduler.approve(&id));

        let results = dispatch.await.unwrap();
        assert_eq!(results[0].status, InvocationStatus::Finished);
        assert_eq!(results[0].result.as_ref().unwrap()["content"], "approved");
    }

    #[tokio::test]
    async fn autonomous_mode_skips_approval() {
        let (scheduler, emitter) = scheduler();
        scheduler.register_tool(ToolDescriptor::new("echo", "echo", json!({})).with_approval());
        scheduler.register_executor(Arc::new(EchoExecutor));
        let mut rx = emitter.subscribe();

        let results = scheduler
            .dispatch_batch(
                "s1",
                "turn_1",
                vec![ToolInvocation::open("call_1", "echo", args(json!({})))],
                true,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results[0].status, InvocationStatus::Finished);
        while let Ok(event) = rx.try_recv() {
            assert_ne!(event.event_type(), "approval_requested");
        }
    }

    #[tokio::test]
    async fn approve_unknown_id_returns_false() {
        let (scheduler, _emitter) = scheduler();
        assert!(!scheduler.approve("call_nope"));
        assert!(!scheduler.deny("call_nope", "reason"));
    }

    // ── Mutex groups ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn mutex_group_serializes_in_open_order() {
        let (scheduler, _emitter) = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_tool(
            ToolDescriptor::new("slow", "slow", json!({})).with_mutex_group("console"),
        );
        scheduler.register_executor(Arc::new(SlowExecutor {
            log: Arc::clone(&log),
        }));

        // First group member is slower than the second. Serialization in
        // open order means the second still completes last.
        let results = scheduler
            .dispatch_batch(
                "s1",
                "turn_1",
                vec![
                    ToolInvocation::open("call_a", "slow", args(json!({"delay_ms": 50}))),
                    ToolInvocation::open("call_b", "slow", args(json!({"delay_ms": 10}))),
                ],
                false,
                &CancellationToken::new(),
            )
            .await;

        assert!(results.iter().all(|r| r.status == InvocationStatus::Finished));
        assert_eq!(*log.lock(), vec!["call_a".to_owned(), "call_b".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn ungrouped_invocation_runs_concurrently_with_group() {
        let (scheduler, _emitter) = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.register_tool(
            ToolDescriptor::new("slow", "slow", json!({})).with_mutex_group("console"),
        );
        scheduler.register_tool(ToolDescriptor::new("echo", "echo", json!({})));
        scheduler.register_executor(Arc::new(SlowExecutor {
            log: Arc::clone(&log),
        }));
        scheduler.register_executor(Arc::new(EchoExecutor));

        let started = tokio::time::Instant::now();
        let results = scheduler
            .dispatch_batch(
                "s1",
                "turn_1",
                vec![
                    ToolInvocation::open("call_a", "slow", args(json!({"delay_ms": 40}))),
                    ToolInvocation::open("call_b", "slow", args(json!({"delay_ms": 40}))),
                    ToolInvocation::open("call_c", "echo", args(json!({"text": "free"}))),
                ],
                false,
                &CancellationToken::new(),
            )
            .await;

        assert!(results.iter().all(|r| r.status == InvocationStatus::Finished));
        // Grouped members ran back-to-back (80ms), the ungrouped one did
        // not wait behind the group.
        assert_eq!(*log.lock(), vec!["call_a".to_owned(), "call_b".to_owned()]);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(80), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(120), "elapsed {elapsed:?}");
    }

    // ── Async completion ────────────────────────────────────────────────

    #[tokio::test]
    async fn async_invocation_resolves_via_tracker() {
        let (scheduler, _emitter) = scheduler();
        scheduler.register_tool(ToolDescriptor::new("bg", "background", json!({})));
        scheduler.register_executor(Arc::new(AsyncExecutor));

        let dispatch = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .dispatch_batch(
                        "s1",
                        "turn_1",
                        vec![ToolInvocation::open("call_bg", "bg", args(json!({})))],
                        false,
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        while !scheduler.has_pending_resolution("call_bg") {
            tokio::task::yield_now().await;
        }
        assert!(scheduler.resolve("call_bg", text_result("finished later")));

        let results = dispatch.await.unwrap();
        assert_eq!(results[0].status, InvocationStatus::Finished);
        assert_eq!(
            results[0].result.as_ref().unwrap()["content"],
            "finished later"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_marks_invocation_error() {
        let (scheduler, _emitter) = scheduler();
        scheduler.register_tool(
            ToolDescriptor::new("bg", "background", json!({}))
                .with_timeout(Duration::from_millis(100)),
        );
        scheduler.register_executor(Arc::new(AsyncExecutor));

        let results = scheduler
            .dispatch_batch(
                "s1",
                "turn_1",
                vec![ToolInvocation::open("call_bg", "bg", args(json!({})))],
                false,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results[0].status, InvocationStatus::Error);
        assert!(results[0].is_error);
        let content = results[0].result.as_ref().unwrap()["content"]
            .as_str()
            .unwrap()
            .to_owned();
        assert!(content.contains("timed out after 100ms"), "{content}");
        assert!(!scheduler.has_pending_resolution("call_bg"));
    }

    // ── Cancellation ────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_aborts_pending_approval() {
        let (scheduler, emitter) = scheduler();
        scheduler.register_tool(ToolDescriptor::new("echo", "echo", json!({})).with_approval());
        scheduler.register_executor(Arc::new(EchoExecutor));
        let mut rx = emitter.subscribe();
        let cancel = CancellationToken::new();

        let dispatch = {
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                scheduler
                    .dispatch_batch(
                        "s1",
                        "turn_1",
                        vec![ToolInvocation::open("call_1", "echo", args(json!({})))],
                        false,
                        &cancel,
                    )
                    .await
            })
        };

        let _ = wait_for_approval_request(&mut rx).await;
        cancel.cancel();

        let results = dispatch.await.unwrap();
        assert_matches!(results[0].status, InvocationStatus::Error);
        assert_eq!(results[0].result.as_ref().unwrap()["content"], "aborted");
        assert_eq!(scheduler.pending_approvals(), 0);
    }

    #[test]
    fn duration_ceil_rounds_up() {
        assert_eq!(duration_ceil_ms(Duration::from_micros(1)), 1);
        assert_eq!(duration_ceil_ms(Duration::from_millis(5)), 5);
        assert_eq!(duration_ceil_ms(Duration::ZERO), 0);
    }
}
