//! Turn controller: drives one session's prompt through streaming, tool
//! execution, and continuation until the model ends its turn.
//!
//! Phases per cycle: `Streaming` → (`AwaitingApproval` |
//! `AwaitingToolCompletion`) → `Continuing` → `Streaming` …, terminating
//! in `Done` or `Error`. Denials continue the turn: the operator's reason
//! is folded into the tool result so the model can route around it, and
//! the continuation request goes out with no extra operator input.
//!
//! Recoverable stream faults are retried with exponential backoff up to
//! `max_stream_retries`; each retry starts a fresh stream and discards
//! partial content from the failed attempt.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use krait_core::events::{
    BaseEvent, ContentKind, KraitEvent, StopReason, StreamEvent, TokenUsage, TurnPhase,
    turn_state_event,
};
use krait_core::ids::new_turn_id;
use krait_core::messages::Message;
use krait_core::timeline::{TimelineEntry, TimelineEntryKind};
use krait_core::tools::ToolDescriptor;
use krait_llm::{Context, Provider, ProviderError, ProviderStreamOptions};
use metrics::counter;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::emitter::EventEmitter;
use crate::errors::RuntimeError;
use crate::scheduler::ToolScheduler;
use crate::store::{SessionState, SessionStore};
use crate::turn::accumulator::{StreamAccumulator, StreamEnd, StreamResult};
use crate::turn::timeline::SessionTimeline;

/// Turn behavior knobs.
#[derive(Clone, Debug)]
pub struct TurnConfig {
    /// Auto-approve gated invocations (no operator in the loop).
    pub autonomous: bool,
    /// Retries after a recoverable stream fault.
    pub max_stream_retries: u32,
    /// First retry delay; doubles per retry.
    pub retry_base_delay: Duration,
    /// Bound on streaming cycles within one turn.
    pub max_tool_cycles: u32,
    /// Max output tokens override.
    pub max_tokens: Option<u32>,
    /// Request thinking/reasoning output.
    pub enable_thinking: bool,
    /// System prompt sent with every request.
    pub system_prompt: Option<String>,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            autonomous: false,
            max_stream_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            max_tool_cycles: 24,
            max_tokens: None,
            enable_thinking: false,
            system_prompt: None,
        }
    }
}

/// Result of a completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Turn identity.
    pub turn_id: String,
    /// Turn ordinal within the session.
    pub turn: u32,
    /// Concatenated assistant text across all cycles.
    pub response: String,
    /// Stop reason from the final cycle.
    pub stop_reason: Option<StopReason>,
    /// Token usage summed across cycles.
    pub usage: TokenUsage,
    /// Streaming cycles the turn took.
    pub cycles: u32,
}

/// Drives turns for one session.
pub struct TurnController {
    session_id: String,
    provider: Arc<dyn Provider>,
    scheduler: Arc<ToolScheduler>,
    emitter: Arc<EventEmitter>,
    store: Arc<dyn SessionStore>,
    config: TurnConfig,
    timeline: Mutex<SessionTimeline>,
    /// Operator entries recorded between runs, persisted at the next
    /// save point.
    pending_entries: Mutex<Vec<TimelineEntry>>,
}

impl TurnController {
    /// Create a controller for one session.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        provider: Arc<dyn Provider>,
        scheduler: Arc<ToolScheduler>,
        emitter: Arc<EventEmitter>,
        store: Arc<dyn SessionStore>,
        config: TurnConfig,
    ) -> Self {
        let session_id = session_id.into();
        let timeline = Mutex::new(SessionTimeline::new(session_id.clone(), 0));
        Self {
            session_id,
            provider,
            scheduler,
            emitter,
            store,
            config,
            timeline,
            pending_entries: Mutex::new(Vec::new()),
        }
    }

    /// Session this controller drives.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record operator activity (manual console command, note). Deferred
    /// while a stream is in flight and flushed after it finalizes, so the
    /// entry sorts after the response it overlapped with.
    pub fn record_operator_activity(&self, payload: Value) {
        let entry = self
            .timeline
            .lock()
            .record(TimelineEntryKind::OperatorActivity, payload);
        if let Some(entry) = entry {
            self.emit_timeline(&entry);
            self.pending_entries.lock().push(entry);
        }
    }

    /// Run one turn to a terminal phase.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub async fn run_turn(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, RuntimeError> {
        let mut state = self.store.load_or_default(&self.session_id).await?;
        self.timeline.lock().ensure_at_least(state.next_position);
        self.drain_pending(&mut state);

        let turn_id = new_turn_id();
        let turn = state.turn + 1;
        self.emitter.emit(KraitEvent::TurnStarted {
            base: BaseEvent::now(&self.session_id),
            turn_id: turn_id.clone(),
            turn,
            prompt: prompt.to_owned(),
        });
        self.record_entry(
            &mut state,
            TimelineEntryKind::UserPrompt,
            json!({ "text": prompt }),
        );
        state.messages.push(Message::User {
            content: prompt.to_owned(),
        });

        let tools = self.scheduler.descriptors();
        let mut options = ProviderStreamOptions {
            max_tokens: self.config.max_tokens,
            enable_thinking: self.config.enable_thinking,
            continuation_token: None,
        };

        let mut usage = TokenUsage::default();
        let mut response = String::new();
        let mut cycles: u32 = 0;

        loop {
            cycles += 1;
            if cycles > self.config.max_tool_cycles {
                let err = RuntimeError::Internal(format!(
                    "turn exceeded {} tool cycles",
                    self.config.max_tool_cycles
                ));
                return self.fail_turn(&mut state, &turn_id, turn, err).await;
            }

            self.set_phase(&turn_id, turn, TurnPhase::Streaming);
            let result = match self
                .stream_with_retries(&turn_id, &tools, &state.messages, &options, cancel)
                .await
            {
                Ok(result) => result,
                Err(err) => return self.fail_turn(&mut state, &turn_id, turn, err).await,
            };

            add_usage(&mut usage, &result.usage);
            let cycle_text = result.response_text();
            response.push_str(&cycle_text);
            if !result.blocks.is_empty() {
                state.messages.push(Message::Assistant {
                    blocks: result.blocks.clone(),
                });
            }
            self.record_entry(
                &mut state,
                TimelineEntryKind::AssistantResponse,
                json!({ "turnId": turn_id, "text": cycle_text }),
            );
            // Operator activity that arrived mid-stream lands here, after
            // the response it overlapped with.
            let flushed = self.timeline.lock().flush_deferred();
            for entry in flushed {
                self.emit_timeline(&entry);
                push_entry(&mut state, entry);
            }

            if result.invocations.is_empty() || result.stop_reason != Some(StopReason::ToolUse) {
                let stop_reason = result.stop_reason;
                state.turn = turn;
                self.drain_pending(&mut state);
                self.save_state(&state).await;
                self.set_phase(&turn_id, turn, TurnPhase::Done);
                self.emitter.emit(KraitEvent::TurnCompleted {
                    base: BaseEvent::now(&self.session_id),
                    turn_id: turn_id.clone(),
                    turn,
                    phase: TurnPhase::Done,
                    stop_reason,
                    token_usage: Some(usage.clone()),
                    error: None,
                });
                counter!("krait_turns_total", "status" => "completed").increment(1);
                info!(turn_id, turn, cycles, "turn completed");
                return Ok(TurnOutcome {
                    turn_id,
                    turn,
                    response,
                    stop_reason,
                    usage,
                    cycles,
                });
            }

            let needs_approval = !self.config.autonomous
                && result.invocations.iter().any(|inv| {
                    self.scheduler
                        .descriptor(&inv.name)
                        .is_some_and(|d| d.approval_required)
                });
            for inv in &result.invocations {
                let descriptor = self.scheduler.descriptor(&inv.name);
                self.emitter.emit(KraitEvent::InvocationOpened {
                    base: BaseEvent::now(&self.session_id),
                    invocation_id: inv.id.clone(),
                    turn_id: turn_id.clone(),
                    tool_name: inv.name.clone(),
                    arguments: inv.arguments.clone(),
                    approval_required: !self.config.autonomous
                        && descriptor
                            .as_ref()
                            .is_some_and(|d| d.approval_required),
                    mutex_group: descriptor.and_then(|d| d.mutex_group),
                });
            }
            self.set_phase(
                &turn_id,
                turn,
                if needs_approval {
                    TurnPhase::AwaitingApproval
                } else {
                    TurnPhase::AwaitingToolCompletion
                },
            );

            let completed = self
                .scheduler
                .dispatch_batch(
                    &self.session_id,
                    &turn_id,
                    result.invocations,
                    self.config.autonomous,
                    cancel,
                )
                .await;
            if cancel.is_cancelled() {
                return self
                    .fail_turn(&mut state, &turn_id, turn, RuntimeError::Aborted)
                    .await;
            }

            self.set_phase(&turn_id, turn, TurnPhase::Continuing);
            for inv in &completed {
                self.record_entry(
                    &mut state,
                    TimelineEntryKind::ToolActivity,
                    serde_json::to_value(inv).unwrap_or(Value::Null),
                );
                state.messages.push(Message::from_invocation(inv));
            }
            options.continuation_token = result.continuation_token;
        }
    }

    // ── Streaming ───────────────────────────────────────────────────────

    async fn stream_with_retries(
        &self,
        turn_id: &str,
        tools: &[ToolDescriptor],
        messages: &[Message],
        options: &ProviderStreamOptions,
        cancel: &CancellationToken,
    ) -> Result<StreamResult, RuntimeError> {
        let max_attempts = self.config.max_stream_retries + 1;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let context = Context {
                system_prompt: self.config.system_prompt.clone(),
                messages: messages.to_vec(),
                tools: tools.to_vec(),
            };

            self.timeline.lock().begin_stream();
            let outcome = self.consume_stream(turn_id, &context, options, cancel).await;
            self.timeline.lock().finish_stream();

            let (reason, retry_after) = match outcome {
                Ok(acc) => match acc.end() {
                    Some(StreamEnd::Complete) => return Ok(acc.finish()),
                    Some(StreamEnd::Error {
                        reason,
                        recoverable,
                    }) => {
                        if !recoverable {
                            return Err(RuntimeError::Stream {
                                reason: reason.clone(),
                            });
                        }
                        (reason.clone(), None)
                    }
                    // The pipeline guarantees a terminal event; a missing
                    // one is a stream fault in its own right.
                    None => ("stream ended without completion".to_owned(), None),
                },
                Err(RuntimeError::Provider(e)) => {
                    if !e.is_recoverable() {
                        return Err(RuntimeError::Provider(e));
                    }
                    let retry_after = match &e {
                        ProviderError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                            Some(Duration::from_millis(*retry_after_ms))
                        }
                        _ => None,
                    };
                    (e.to_string(), retry_after)
                }
                Err(other) => return Err(other),
            };

            if attempt >= max_attempts {
                warn!(turn_id, attempt, reason, "stream retries exhausted");
                return Err(RuntimeError::Stream { reason });
            }

            let backoff = self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1);
            let delay = retry_after.map_or(backoff, |ra| ra.max(backoff));
            self.emitter.emit(KraitEvent::StreamRetry {
                base: BaseEvent::now(&self.session_id),
                turn_id: turn_id.to_owned(),
                attempt,
                max_attempts,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason,
            });
            counter!("krait_stream_retries_total").increment(1);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(RuntimeError::Aborted),
            }
        }
    }

    async fn consume_stream(
        &self,
        turn_id: &str,
        context: &Context,
        options: &ProviderStreamOptions,
        cancel: &CancellationToken,
    ) -> Result<StreamAccumulator, RuntimeError> {
        let mut stream = self.provider.stream(context, options).await?;
        let mut acc = StreamAccumulator::new();

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return Err(RuntimeError::Aborted),
                event = stream.next() => event,
            };
            let Some(event) = event else { break };

            if let StreamEvent::ContentDelta { index, text } = &event {
                match acc.block_kind(*index) {
                    Some(kind @ (ContentKind::Text | ContentKind::Thinking)) => {
                        self.emitter.emit(KraitEvent::ContentDelta {
                            base: BaseEvent::now(&self.session_id),
                            turn_id: turn_id.to_owned(),
                            kind,
                            delta: text.clone(),
                        });
                    }
                    _ => {}
                }
            }

            acc.apply(&event);
            if acc.end().is_some() {
                break;
            }
        }
        Ok(acc)
    }

    // ── Bookkeeping ─────────────────────────────────────────────────────

    fn set_phase(&self, turn_id: &str, turn: u32, phase: TurnPhase) {
        self.emitter
            .emit(turn_state_event(&self.session_id, turn_id, turn, phase));
    }

    fn record_entry(&self, state: &mut SessionState, kind: TimelineEntryKind, payload: Value) {
        let entry = self.timeline.lock().record(kind, payload);
        if let Some(entry) = entry {
            self.emit_timeline(&entry);
            push_entry(state, entry);
        }
    }

    fn emit_timeline(&self, entry: &TimelineEntry) {
        self.emitter.emit(KraitEvent::TimelineAppended {
            base: BaseEvent::now(&self.session_id),
            position: entry.position,
            kind: entry.kind,
            payload: entry.payload.clone(),
        });
    }

    fn drain_pending(&self, state: &mut SessionState) {
        for entry in self.pending_entries.lock().drain(..) {
            push_entry(state, entry);
        }
    }

    async fn save_state(&self, state: &SessionState) {
        if let Err(e) = self.store.save(state).await {
            warn!(session_id = %self.session_id, error = %e, "session save failed");
        }
    }

    async fn fail_turn(
        &self,
        state: &mut SessionState,
        turn_id: &str,
        turn: u32,
        err: RuntimeError,
    ) -> Result<TurnOutcome, RuntimeError> {
        state.turn = turn;
        self.drain_pending(state);
        self.save_state(state).await;
        self.emitter.emit(KraitEvent::TurnCompleted {
            base: BaseEvent::now(&self.session_id),
            turn_id: turn_id.to_owned(),
            turn,
            phase: TurnPhase::Error,
            stop_reason: None,
            token_usage: None,
            error: Some(err.to_string()),
        });
        counter!("krait_turns_total", "status" => err.category()).increment(1);
        warn!(turn_id, turn, error = %err, "turn failed");
        Err(err)
    }
}

fn push_entry(state: &mut SessionState, entry: TimelineEntry) {
    state.next_position = state.next_position.max(entry.position + 1);
    state.timeline.push(entry);
}

fn add_usage(total: &mut TokenUsage, cycle: &TokenUsage) {
    total.input_tokens += cycle.input_tokens;
    total.output_tokens += cycle.output_tokens;
    if let Some(cached) = cycle.cached_input_tokens {
        *total.cached_input_tokens.get_or_insert(0) += cached;
    }
    if let Some(created) = cycle.cache_creation_tokens {
        *total.cache_creation_tokens.get_or_insert(0) += created;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use krait_core::tools::{InvocationStatus, text_result};
    use krait_llm::{ProviderResult, ProviderType, StreamEventStream};
    use serde_json::json;

    use crate::scheduler::{ExecutionOutcome, ExecutorContext, ToolExecutor};
    use crate::store::MemoryStore;

    // ── Fixtures ────────────────────────────────────────────────────────

    /// Serves one scripted event list per `stream` call and records the
    /// request contexts it saw.
    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
        requests: Mutex<Vec<Context>>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Anthropic
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn stream(
            &self,
            context: &Context,
            _options: &ProviderStreamOptions,
        ) -> ProviderResult<StreamEventStream> {
            self.requests.lock().push(context.clone());
            let events = self.scripts.lock().pop_front().unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    /// Yields whatever the test pushes through the channel.
    struct ChannelProvider {
        rx: Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<StreamEvent>>>,
    }

    #[async_trait]
    impl Provider for ChannelProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Anthropic
        }

        fn model(&self) -> &str {
            "channel"
        }

        async fn stream(
            &self,
            _context: &Context,
            _options: &ProviderStreamOptions,
        ) -> ProviderResult<StreamEventStream> {
            let mut rx = self.rx.lock().take().expect("single stream per test");
            Ok(Box::pin(futures::stream::poll_fn(move |cx| {
                rx.poll_recv(cx)
            })))
        }
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
            ExecutionOutcome::Completed(text_result(format!("echo: {text}")))
        }
    }

    fn text_stream(text: &str, stop: StopReason) -> Vec<StreamEvent> {
        vec![
            StreamEvent::Started {
                model: "scripted".into(),
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                kind: ContentKind::Text,
            },
            StreamEvent::ContentDelta {
                index: 0,
                text: text.into(),
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::Complete {
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    ..TokenUsage::default()
                },
                stop_reason: stop,
                continuation_token: None,
            },
        ]
    }

    fn tool_stream(tool: &str, arguments: Value) -> Vec<StreamEvent> {
        vec![
            StreamEvent::Started {
                model: "scripted".into(),
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                kind: ContentKind::ToolCall,
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::ToolCall {
                index: 0,
                id: "call_1".into(),
                name: tool.into(),
                arguments: arguments.as_object().cloned().unwrap_or_default(),
            },
            StreamEvent::Complete {
                usage: TokenUsage::default(),
                stop_reason: StopReason::ToolUse,
                continuation_token: Some("tok_1".into()),
            },
        ]
    }

    struct Harness {
        controller: Arc<TurnController>,
        provider: Arc<ScriptedProvider>,
        scheduler: Arc<ToolScheduler>,
        emitter: Arc<EventEmitter>,
        store: Arc<MemoryStore>,
    }

    fn harness(scripts: Vec<Vec<StreamEvent>>, config: TurnConfig) -> Harness {
        let emitter = Arc::new(EventEmitter::new());
        let scheduler = Arc::new(ToolScheduler::new(Arc::clone(&emitter)));
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(TurnController::new(
            "s1",
            Arc::clone(&provider) as Arc<dyn Provider>,
            Arc::clone(&scheduler),
            Arc::clone(&emitter),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            config,
        ));
        Harness {
            controller,
            provider,
            scheduler,
            emitter,
            store,
        }
    }

    fn collect_events(rx: &mut tokio::sync::broadcast::Receiver<KraitEvent>) -> Vec<KraitEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── Plain turns ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn text_only_turn_completes() {
        let h = harness(
            vec![text_stream("Port 22 is open.", StopReason::EndTurn)],
            TurnConfig::default(),
        );
        let mut rx = h.emitter.subscribe();

        let outcome = h
            .controller
            .run_turn("scan the target", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.turn, 1);
        assert_eq!(outcome.response, "Port 22 is open.");
        assert_eq!(outcome.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.usage.input_tokens, 10);

        let state = h.store.load("s1").await.unwrap().unwrap();
        assert_eq!(state.turn, 1);
        assert_eq!(state.messages.len(), 2);
        assert_matches::assert_matches!(state.messages[0], Message::User { .. });
        assert_matches::assert_matches!(state.messages[1], Message::Assistant { .. });
        assert_eq!(state.timeline.len(), 2);
        assert_eq!(state.timeline[0].kind, TimelineEntryKind::UserPrompt);
        assert_eq!(state.timeline[1].kind, TimelineEntryKind::AssistantResponse);

        let events = collect_events(&mut rx);
        let types: Vec<&str> = events.iter().map(KraitEvent::event_type).collect();
        assert!(types.contains(&"turn_started"));
        assert!(types.contains(&"content_delta"));
        assert_eq!(types.last(), Some(&"turn_completed"));
    }

    #[tokio::test]
    async fn tool_cycle_feeds_result_into_continuation() {
        let h = harness(
            vec![
                tool_stream("echo", json!({"text": "ping"})),
                text_stream("It said pong.", StopReason::EndTurn),
            ],
            TurnConfig::default(),
        );
        h.scheduler
            .register_tool(ToolDescriptor::new("echo", "echo", json!({})));
        h.scheduler.register_executor(Arc::new(EchoExecutor));

        let outcome = h
            .controller
            .run_turn("try the echo tool", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.cycles, 2);
        assert_eq!(outcome.response, "It said pong.");

        // The second request carries the assistant tool call and its result.
        let requests = h.provider.requests.lock();
        assert_eq!(requests.len(), 2);
        let continuation = &requests[1].messages;
        assert_matches::assert_matches!(
            continuation[continuation.len() - 2],
            Message::Assistant { .. }
        );
        match &continuation[continuation.len() - 1] {
            Message::ToolResult {
                call_id,
                content,
                is_error,
            } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(content["content"], "echo: ping");
                assert!(!is_error);
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }

        let state = h.store.load("s1").await.unwrap().unwrap();
        assert!(
            state
                .timeline
                .iter()
                .any(|e| e.kind == TimelineEntryKind::ToolActivity)
        );
    }

    // ── Denial continuation ─────────────────────────────────────────────

    #[tokio::test]
    async fn denial_folds_reason_into_continuation() {
        let h = harness(
            vec![
                tool_stream("echo", json!({"text": "rm -rf"})),
                text_stream("Understood, skipping that.", StopReason::EndTurn),
            ],
            TurnConfig::default(),
        );
        h.scheduler
            .register_tool(ToolDescriptor::new("echo", "echo", json!({})).with_approval());
        h.scheduler.register_executor(Arc::new(EchoExecutor));
        let mut rx = h.emitter.subscribe();

        let run = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move {
                controller
                    .run_turn("clean up the box", &CancellationToken::new())
                    .await
            })
        };

        // Wait for the approval request, then deny with a reason.
        let invocation_id = loop {
            if let KraitEvent::ApprovalRequested { invocation_id, .. } = rx.recv().await.unwrap() {
                break invocation_id;
            }
        };
        assert!(h.scheduler.deny(&invocation_id, "keep off production hosts"));

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.response, "Understood, skipping that.");

        // The continuation request carries the denial as a non-error result.
        let requests = h.provider.requests.lock();
        match requests[1].messages.last().unwrap() {
            Message::ToolResult {
                content, is_error, ..
            } => {
                let text = content.as_str().unwrap();
                assert!(text.contains("Denied by operator"), "{text}");
                assert!(text.contains("keep off production hosts"), "{text}");
                assert!(!is_error);
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
        drop(requests);

        // The turn continued through the denial to completion.
        let events = collect_events(&mut rx);
        let phases: Vec<TurnPhase> = events
            .iter()
            .filter_map(|e| match e {
                KraitEvent::TurnStateChanged { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect();
        assert!(phases.contains(&TurnPhase::Continuing));
        assert!(phases.contains(&TurnPhase::Done));
    }

    #[tokio::test]
    async fn autonomous_mode_runs_gated_tool_without_approval() {
        let h = harness(
            vec![
                tool_stream("echo", json!({"text": "auto"})),
                text_stream("done", StopReason::EndTurn),
            ],
            TurnConfig {
                autonomous: true,
                ..TurnConfig::default()
            },
        );
        h.scheduler
            .register_tool(ToolDescriptor::new("echo", "echo", json!({})).with_approval());
        h.scheduler.register_executor(Arc::new(EchoExecutor));
        let mut rx = h.emitter.subscribe();

        let outcome = h
            .controller
            .run_turn("go", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.cycles, 2);

        for event in collect_events(&mut rx) {
            assert_ne!(event.event_type(), "approval_requested");
            if let KraitEvent::TurnStateChanged { phase, .. } = &event {
                assert_ne!(*phase, TurnPhase::AwaitingApproval);
            }
        }
    }

    // ── Stream retry ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn recoverable_stream_error_retries() {
        let h = harness(
            vec![
                vec![
                    StreamEvent::Started {
                        model: "scripted".into(),
                    },
                    StreamEvent::Error {
                        reason: "connection reset".into(),
                        recoverable: true,
                    },
                ],
                text_stream("second attempt worked", StopReason::EndTurn),
            ],
            TurnConfig::default(),
        );
        let mut rx = h.emitter.subscribe();

        let outcome = h
            .controller
            .run_turn("go", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.response, "second attempt worked");

        let retries: Vec<KraitEvent> = collect_events(&mut rx)
            .into_iter()
            .filter(|e| e.event_type() == "stream_retry")
            .collect();
        assert_eq!(retries.len(), 1);
        match &retries[0] {
            KraitEvent::StreamRetry {
                attempt,
                max_attempts,
                reason,
                ..
            } => {
                assert_eq!(*attempt, 1);
                assert_eq!(*max_attempts, 4);
                assert!(reason.contains("connection reset"));
            }
            other => panic!("expected StreamRetry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecoverable_stream_error_fails_turn() {
        let h = harness(
            vec![vec![
                StreamEvent::Started {
                    model: "scripted".into(),
                },
                StreamEvent::Error {
                    reason: "invalid request".into(),
                    recoverable: false,
                },
            ]],
            TurnConfig::default(),
        );
        let mut rx = h.emitter.subscribe();

        let err = h
            .controller
            .run_turn("go", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, RuntimeError::Stream { .. });

        let events = collect_events(&mut rx);
        match events.last().unwrap() {
            KraitEvent::TurnCompleted { phase, error, .. } => {
                assert_eq!(*phase, TurnPhase::Error);
                assert!(error.as_deref().unwrap().contains("invalid request"));
            }
            other => panic!("expected TurnCompleted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_fails_turn() {
        let fault = || {
            vec![StreamEvent::Error {
                reason: "overloaded".into(),
                recoverable: true,
            }]
        };
        let h = harness(
            vec![fault(), fault()],
            TurnConfig {
                max_stream_retries: 1,
                ..TurnConfig::default()
            },
        );

        let err = h
            .controller
            .run_turn("go", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, RuntimeError::Stream { ref reason } if reason == "overloaded");
    }

    // ── Operator activity deferral ──────────────────────────────────────

    #[tokio::test]
    async fn mid_stream_operator_activity_sorts_after_response() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let emitter = Arc::new(EventEmitter::new());
        let scheduler = Arc::new(ToolScheduler::new(Arc::clone(&emitter)));
        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(TurnController::new(
            "s1",
            Arc::new(ChannelProvider {
                rx: Mutex::new(Some(rx)),
            }) as Arc<dyn Provider>,
            scheduler,
            Arc::clone(&emitter),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            TurnConfig::default(),
        ));
        let mut events = emitter.subscribe();

        let run = {
            let controller = Arc::clone(&controller);
            tokio::spawn(
                async move { controller.run_turn("go", &CancellationToken::new()).await },
            )
        };

        tx.send(StreamEvent::Started {
            model: "channel".into(),
        })
        .unwrap();
        tx.send(StreamEvent::ContentBlockStart {
            index: 0,
            kind: ContentKind::Text,
        })
        .unwrap();
        tx.send(StreamEvent::ContentDelta {
            index: 0,
            text: "working".into(),
        })
        .unwrap();

        // Wait until the controller has visibly consumed stream content,
        // then inject a manual console command mid-stream.
        loop {
            if events.recv().await.unwrap().event_type() == "content_delta" {
                break;
            }
        }
        controller.record_operator_activity(json!({"command": "whoami"}));

        tx.send(StreamEvent::ContentBlockStop { index: 0 }).unwrap();
        tx.send(StreamEvent::Complete {
            usage: TokenUsage::default(),
            stop_reason: StopReason::EndTurn,
            continuation_token: None,
        })
        .unwrap();

        let _ = run.await.unwrap().unwrap();

        let state = store.load("s1").await.unwrap().unwrap();
        let response_pos = state
            .timeline
            .iter()
            .find(|e| e.kind == TimelineEntryKind::AssistantResponse)
            .unwrap()
            .position;
        let operator = state
            .timeline
            .iter()
            .find(|e| e.kind == TimelineEntryKind::OperatorActivity)
            .unwrap();
        assert!(operator.position > response_pos);
        assert_eq!(operator.payload["command"], "whoami");
    }

    // ── Unknown tool ────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_tool_becomes_error_result_and_turn_continues() {
        let h = harness(
            vec![
                tool_stream("missing_tool", json!({})),
                text_stream("adjusting approach", StopReason::EndTurn),
            ],
            TurnConfig::default(),
        );

        let outcome = h
            .controller
            .run_turn("go", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.cycles, 2);

        let requests = h.provider.requests.lock();
        match requests[1].messages.last().unwrap() {
            Message::ToolResult {
                content, is_error, ..
            } => {
                assert!(is_error);
                assert!(
                    content["content"]
                        .as_str()
                        .unwrap()
                        .contains("unknown tool")
                );
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    // ── State plumbing ──────────────────────────────────────────────────

    #[tokio::test]
    async fn second_turn_resumes_counters() {
        let h = harness(
            vec![
                text_stream("first", StopReason::EndTurn),
                text_stream("second", StopReason::EndTurn),
            ],
            TurnConfig::default(),
        );

        let first = h
            .controller
            .run_turn("one", &CancellationToken::new())
            .await
            .unwrap();
        let second = h
            .controller
            .run_turn("two", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.turn, 1);
        assert_eq!(second.turn, 2);

        let state = h.store.load("s1").await.unwrap().unwrap();
        assert_eq!(state.turn, 2);
        let positions: Vec<u64> = state.timeline.iter().map(|e| e.position).collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(positions, sorted, "positions must be strictly increasing");
    }

    #[tokio::test]
    async fn abort_mid_approval_fails_turn() {
        let h = harness(
            vec![tool_stream("echo", json!({"text": "x"}))],
            TurnConfig::default(),
        );
        h.scheduler
            .register_tool(ToolDescriptor::new("echo", "echo", json!({})).with_approval());
        h.scheduler.register_executor(Arc::new(EchoExecutor));
        let mut rx = h.emitter.subscribe();
        let cancel = CancellationToken::new();

        let run = {
            let controller = Arc::clone(&h.controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run_turn("go", &cancel).await })
        };

        loop {
            if rx.recv().await.unwrap().event_type() == "approval_requested" {
                break;
            }
        }
        cancel.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert_matches::assert_matches!(err, RuntimeError::Aborted);

        // The gated invocation went terminal as an error.
        let terminal = collect_events(&mut rx).into_iter().find_map(|e| match e {
            KraitEvent::InvocationStateChanged { status, .. } if status.is_terminal() => {
                Some(status)
            }
            _ => None,
        });
        assert_eq!(terminal, Some(InvocationStatus::Error));
    }
}
