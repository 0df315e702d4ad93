//! The stream-normalizer fold contract.
//!
//! A normalizer turns raw HTTP body fragments into canonical
//! [`StreamEvent`]s. Input chunks may split a JSON object or SSE record at
//! any byte boundary; the state buffers the incomplete tail and resumes on
//! the next chunk. State is owned by exactly one in-flight stream and is
//! destroyed when the stream finalizes or errors.

use krait_core::events::StreamEvent;

/// Request metadata captured at stream start, used for the diagnostic
/// trace and for `Started` events on backends that do not echo the model.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    /// Request URL.
    pub url: String,
    /// Model requested.
    pub model: String,
}

impl RequestInfo {
    /// Capture request metadata.
    #[must_use]
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
        }
    }
}

/// Fold contract shared by all backend normalizers.
///
/// Callers thread the state value through explicitly:
///
/// ```text
/// let mut state = normalizer.init(&request);
/// for chunk in body {
///     let (events, next) = normalizer.process_chunk(chunk, state);
///     state = next;
/// }
/// let (events, _state) = normalizer.finalize(state);
/// ```
pub trait StreamNormalizer: Send + Sync {
    /// Per-stream mutable accumulator.
    type State: Send;

    /// Create fresh state for one stream.
    fn init(&self, request: &RequestInfo) -> Self::State;

    /// Consume one raw body fragment, producing zero or more events.
    ///
    /// A JSON-decode failure on a *complete* line or record is logged and
    /// skipped; it never aborts the stream.
    fn process_chunk(&self, chunk: &[u8], state: Self::State) -> (Vec<StreamEvent>, Self::State);

    /// Flush any buffered tail and close open blocks.
    fn finalize(&self, state: Self::State) -> (Vec<StreamEvent>, Self::State);
}
