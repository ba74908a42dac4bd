//! aidf — an AI-assisted task execution engine.
//!
//! The value is not the AI but the safety, concurrency, and control layer
//! wrapping it: scope enforcement, validation gates, git integration,
//! retry/backoff, rate limiting, context assembly, parallel wave
//! scheduling, and persistent execution state.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
