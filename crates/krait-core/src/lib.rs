//! # krait-core
//!
//! Foundation types and primitives for the Krait agent engine.
//!
//! This crate provides the shared vocabulary that the other Krait crates
//! depend on:
//!
//! - **Stream events**: [`events::StreamEvent`] — the canonical per-provider
//!   streaming model all backend normalizers emit.
//! - **Broadcast events**: [`events::KraitEvent`] — self-healing session
//!   events published to external subscribers.
//! - **Messages**: [`messages::Message`] conversation model used to build
//!   provider requests and continuations.
//! - **Tools**: [`tools::ToolDescriptor`] and [`tools::ToolInvocation`] —
//!   the tool registration and lifecycle types.
//! - **Retry**: [`retry::RetryPolicy`] and [`retry::retry_until_ready`] —
//!   bounded exponential backoff against a flaky dependent resource.
//! - **Timeline**: [`timeline::TimelineEntry`] — per-session ordered record.
//! - **IDs**: [`ids`] — UUIDv7 identifiers and generated tool-call IDs.
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `krait-llm` and `krait-runtime`.

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod messages;
pub mod retry;
pub mod timeline;
pub mod tools;
