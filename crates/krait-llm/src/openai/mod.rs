//! OpenAI-family provider (JSON chunks over SSE).
//!
//! Same composition as the other backends: `provider` builds the request,
//! `stream_handler` normalizes `data:` chunks, `types` holds config and
//! wire shapes. The stream ends with a literal `[DONE]` record.

pub mod provider;
pub mod stream_handler;
pub mod types;

pub use provider::OpenAiProvider;
pub use stream_handler::OpenAiNormalizer;
pub use types::OpenAiConfig;
