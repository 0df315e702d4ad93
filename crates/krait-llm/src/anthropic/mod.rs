//! Anthropic-family provider (event-tagged SSE).
//!
//! Follows the composition pattern shared across all backends:
//! `provider` (entry point) uses `types` (config and wire format) and
//! `stream_handler` (tagged SSE records -> canonical events).

pub mod provider;
pub mod stream_handler;
pub mod types;

pub use provider::AnthropicProvider;
pub use stream_handler::AnthropicNormalizer;
pub use types::AnthropicConfig;
