//! Comment moderation with retries, a circuit breaker and a hard timeout.
//! Screening fails open.

pub mod client;
pub mod resilient;

pub use client::{HttpModerationClient, ModerationClient, ModerationError, ModerationVerdict};
pub use resilient::{CircuitState, ModerationDecision, ResilientModeration};
