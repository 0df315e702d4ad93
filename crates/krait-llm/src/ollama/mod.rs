//! Ollama provider (newline-delimited JSON).
//!
//! No SSE framing: each body line is one complete JSON object. Tool
//! calls arrive fully formed with parsed arguments and no call ID.

pub mod provider;
pub mod stream_handler;
pub mod types;

pub use provider::OllamaProvider;
pub use stream_handler::OllamaNormalizer;
pub use types::OllamaConfig;
