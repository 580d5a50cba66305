#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # MBFlow Resilience
//!
//! Retry policies and circuit breakers wrapping node executor
//! invocations:
//!
//! - [`RetryPolicy`] — exponential backoff with jitter; the engine drives
//!   the attempt loop so it can emit retry events and honor cancellation
//! - [`CircuitBreaker`] — per-node-kind Closed/Open/HalfOpen breaker with
//!   a lock-free state fast path

pub mod breaker;
pub mod retry;

pub use breaker::{
    BreakerConfig, BreakerError, BreakerState, BreakerTransition, CircuitBreaker,
};
pub use retry::RetryPolicy;

/// Serde helper for `Duration` serialized as integer milliseconds.
pub(crate) mod serde_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize a `Duration` as integer milliseconds.
    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(s)
    }

    /// Deserialize integer milliseconds into a `Duration`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
