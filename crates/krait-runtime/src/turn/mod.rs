//! Per-session turn state machine: stream accumulation, timeline
//! ordering, and the turn controller.

pub mod accumulator;
pub mod controller;
pub mod timeline;
