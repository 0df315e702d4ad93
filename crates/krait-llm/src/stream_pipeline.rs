//! Body-to-event pipeline shared by all providers.
//!
//! Takes an HTTP body stream and a normalizer, threads the fold state
//! through each chunk, and yields canonical [`StreamEvent`]s. The
//! pipeline guarantees the stream always ends with a terminal event:
//! `Complete` from the backend, or `Error` when the body ends early or
//! the transport fails mid-stream.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use krait_core::events::StreamEvent;
use metrics::counter;
use tracing::{debug, warn};

use crate::normalizer::{RequestInfo, StreamNormalizer};
use crate::provider::StreamEventStream;

fn is_terminal(event: &StreamEvent) -> bool {
    matches!(event, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
}

/// Run a normalizer over an HTTP body stream.
///
/// Body items are raw chunks or transport errors. A transport error mid-
/// stream flushes the state (closing any open blocks) and ends the stream
/// with a recoverable `Error`; completion events the flush would fabricate
/// are suppressed because the body was cut.
pub fn normalize_body<N, E>(
    normalizer: N,
    request: RequestInfo,
    body: impl Stream<Item = Result<Bytes, E>> + Send + 'static,
) -> StreamEventStream
where
    N: StreamNormalizer + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut state = normalizer.init(&request);
        let mut saw_terminal = false;

        yield StreamEvent::Started {
            model: request.model.clone(),
        };

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    counter!("krait_llm_stream_chunks_total").increment(1);
                    let (events, next) = normalizer.process_chunk(&bytes, state);
                    state = next;
                    for event in events {
                        if is_terminal(&event) {
                            saw_terminal = true;
                        }
                        yield event;
                    }
                    if saw_terminal {
                        break;
                    }
                }
                Err(err) => {
                    warn!(model = %request.model, error = %err, "transport error mid-stream");
                    counter!("krait_llm_stream_transport_errors_total").increment(1);
                    let (events, _state) = normalizer.finalize(state);
                    for event in events {
                        if !is_terminal(&event) {
                            yield event;
                        }
                    }
                    yield StreamEvent::Error {
                        reason: format!("transport error: {err}"),
                        recoverable: true,
                    };
                    return;
                }
            }
        }

        if !saw_terminal {
            // Body ended without a completion record. Flush the tail —
            // some backends end the final line without a newline, so the
            // flush itself may still produce Complete.
            let (events, _state) = normalizer.finalize(state);
            for event in events {
                if is_terminal(&event) {
                    saw_terminal = true;
                }
                yield event;
            }
            if !saw_terminal {
                debug!(model = %request.model, "stream ended without completion");
                yield StreamEvent::Error {
                    reason: "stream ended without completion".into(),
                    recoverable: true,
                };
            }
        }
    };
    Box::pin(stream)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use krait_core::events::{ContentKind, StopReason, TokenUsage};

    /// Toy normalizer: each chunk is one text delta; a chunk equal to
    /// `"DONE"` completes the stream.
    struct EchoNormalizer;

    #[derive(Default)]
    struct EchoState {
        opened: bool,
    }

    impl StreamNormalizer for EchoNormalizer {
        type State = EchoState;

        fn init(&self, _request: &RequestInfo) -> EchoState {
            EchoState::default()
        }

        fn process_chunk(
            &self,
            chunk: &[u8],
            mut state: EchoState,
        ) -> (Vec<StreamEvent>, EchoState) {
            let text = String::from_utf8_lossy(chunk).into_owned();
            if text == "DONE" {
                let mut events = Vec::new();
                if state.opened {
                    events.push(StreamEvent::ContentBlockStop { index: 0 });
                    state.opened = false;
                }
                events.push(StreamEvent::Complete {
                    usage: TokenUsage::default(),
                    stop_reason: StopReason::EndTurn,
                    continuation_token: None,
                });
                return (events, state);
            }
            let mut events = Vec::new();
            if !state.opened {
                state.opened = true;
                events.push(StreamEvent::ContentBlockStart {
                    index: 0,
                    kind: ContentKind::Text,
                });
            }
            events.push(StreamEvent::ContentDelta { index: 0, text });
            (events, state)
        }

        fn finalize(&self, mut state: EchoState) -> (Vec<StreamEvent>, EchoState) {
            let mut events = Vec::new();
            if state.opened {
                events.push(StreamEvent::ContentBlockStop { index: 0 });
                state.opened = false;
            }
            (events, state)
        }
    }

    fn request() -> RequestInfo {
        RequestInfo::new("http://localhost/api", "test-model")
    }

    fn ok_chunks(chunks: &[&str]) -> Vec<Result<Bytes, std::io::Error>> {
        chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn completed_stream_passes_through() {
        let body = stream::iter(ok_chunks(&["hi", "DONE"]));
        let events: Vec<StreamEvent> =
            normalize_body(EchoNormalizer, request(), body).collect().await;

        assert_eq!(
            events[0],
            StreamEvent::Started {
                model: "test-model".into()
            }
        );
        assert!(matches!(events.last(), Some(StreamEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn truncated_stream_ends_with_recoverable_error() {
        let body = stream::iter(ok_chunks(&["partial"]));
        let events: Vec<StreamEvent> =
            normalize_body(EchoNormalizer, request(), body).collect().await;

        // Open block closed by the flush, then the error terminator.
        assert!(events.contains(&StreamEvent::ContentBlockStop { index: 0 }));
        match events.last() {
            Some(StreamEvent::Error { recoverable, .. }) => assert!(recoverable),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_error_closes_blocks_then_errors() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"hel")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        ]);
        let events: Vec<StreamEvent> =
            normalize_body(EchoNormalizer, request(), body).collect().await;

        let stop_at = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ContentBlockStop { .. }))
            .expect("open block closed before the error");
        match &events[stop_at + 1] {
            StreamEvent::Error { reason, recoverable } => {
                assert!(reason.contains("reset"));
                assert!(recoverable);
            }
            other => panic!("expected Error, got {other:?}"),
        }
        assert_eq!(events.len(), stop_at + 2);
    }

    #[tokio::test]
    async fn chunks_after_completion_are_ignored() {
        let body = stream::iter(ok_chunks(&["hi", "DONE", "trailing"]));
        let events: Vec<StreamEvent> =
            normalize_body(EchoNormalizer, request(), body).collect().await;

        assert!(matches!(events.last(), Some(StreamEvent::Complete { .. })));
        let deltas = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ContentDelta { .. }))
            .count();
        assert_eq!(deltas, 1);
    }
}
