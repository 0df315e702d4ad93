//! # krait-llm
//!
//! Provider layer: per-backend stream normalizers and the HTTP plumbing
//! that feeds them.
//!
//! Three incompatible wire formats are reconciled into the canonical
//! [`krait_core::events::StreamEvent`] sequence:
//!
//! - **Anthropic family** — event-tagged SSE with `partial_json` argument
//!   deltas ([`anthropic`]).
//! - **OpenAI family** — JSON-over-SSE chat-completion chunks terminated by
//!   `[DONE]` ([`openai`]).
//! - **Ollama family** — newline-delimited JSON with complete tool-call
//!   objects ([`ollama`]).
//!
//! Each normalizer is a pure fold ([`normalizer::StreamNormalizer`]): state
//! is an explicit value created by `init`, threaded through `process_chunk`,
//! and consumed by `finalize` — never a hidden accumulator. The shared
//! block semantics (first-seen index assignment, kind transitions, argument
//! fragment assembly, tool-use stop-reason forcing) live in [`blocks`].
//!
//! ## Crate Position
//!
//! Depends on: krait-core. Depended on by: krait-runtime.

#![deny(unsafe_code)]

pub mod anthropic;
pub mod blocks;
pub mod error_parsing;
pub mod normalizer;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod sse;
pub mod stop_reason;
pub mod stream_pipeline;
pub mod trace;

pub use normalizer::{RequestInfo, StreamNormalizer};
pub use provider::{
    Context, Provider, ProviderError, ProviderResult, ProviderStreamOptions, ProviderType,
    StreamEventStream,
};
