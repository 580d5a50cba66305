//! Circuit breaker with a lock-free state fast path.
//!
//! One breaker guards one node kind. Closed counts consecutive failures;
//! reaching the threshold opens the breaker for a reset timeout, after
//! which a bounded number of half-open probes decide between closing and
//! reopening.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Fast-fail error returned while the breaker is open.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The breaker is open; the invocation was rejected without running.
    #[error("circuit breaker open{}", retry_after.map(|d| format!(" (retry in {d:?})")).unwrap_or_default())]
    Open {
        /// Time until the next half-open probe is admitted, if known.
        retry_after: Option<Duration>,
    },
}

/// Breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed that open the breaker.
    pub threshold: u32,
    /// How long the breaker stays open before admitting probes.
    #[serde(with = "crate::serde_duration_ms")]
    pub timeout: Duration,
    /// Probes that must succeed in HalfOpen to close the breaker.
    pub half_open_max: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(30),
            half_open_max: 1,
        }
    }
}

/// Runtime state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Operations flow; consecutive failures are counted.
    Closed,
    /// Operations fail fast.
    Open,
    /// A bounded number of probes are admitted to test recovery.
    HalfOpen,
}

impl BreakerState {
    const fn to_atomic(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    const fn from_atomic(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// A state change worth recording in the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// The breaker opened.
    Opened,
    /// The breaker closed after successful probes.
    Closed,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    /// Probes admitted in the current HalfOpen episode.
    probes_admitted: u32,
    /// Probes that succeeded in the current HalfOpen episode.
    probes_succeeded: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one node kind.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    /// Lock-free mirror of the state for the Closed fast path: the common
    /// case never takes the lock.
    atomic_state: AtomicU8,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            atomic_state: AtomicU8::new(BreakerState::Closed.to_atomic()),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                probes_admitted: 0,
                probes_succeeded: 0,
                opened_at: None,
            }),
        }
    }

    /// Create a breaker with the default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BreakerConfig::default())
    }

    /// Current state without taking the lock.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        BreakerState::from_atomic(self.atomic_state.load(Ordering::Acquire))
    }

    /// Ask permission to run one invocation.
    ///
    /// In Open, the call fails fast until the reset timeout elapses, at
    /// which point the breaker moves to HalfOpen and admits up to
    /// `half_open_max` probes.
    pub fn try_acquire(&self) -> Result<(), BreakerError> {
        // Fast path: most calls happen with a closed breaker.
        if self.state() == BreakerState::Closed {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
                if elapsed >= self.config.timeout {
                    debug!("circuit breaker transitioning from open to half-open");
                    self.set_state(&mut inner, BreakerState::HalfOpen);
                    inner.probes_admitted = 1;
                    inner.probes_succeeded = 0;
                    Ok(())
                } else {
                    Err(BreakerError::Open {
                        retry_after: self.config.timeout.checked_sub(elapsed),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_admitted < self.config.half_open_max {
                    inner.probes_admitted += 1;
                    Ok(())
                } else {
                    Err(BreakerError::Open { retry_after: None })
                }
            }
        }
    }

    /// Record a successful invocation; returns a transition if the breaker
    /// closed.
    pub fn on_success(&self) -> Option<BreakerTransition> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            BreakerState::HalfOpen => {
                inner.probes_succeeded += 1;
                if inner.probes_succeeded >= self.config.half_open_max {
                    debug!("circuit breaker closing after successful probes");
                    self.set_state(&mut inner, BreakerState::Closed);
                    inner.consecutive_failures = 0;
                    inner.probes_admitted = 0;
                    inner.probes_succeeded = 0;
                    Some(BreakerTransition::Closed)
                } else {
                    None
                }
            }
            BreakerState::Open => None,
        }
    }

    /// Record a failed invocation; returns a transition if the breaker
    /// opened (or reopened from HalfOpen).
    pub fn on_failure(&self) -> Option<BreakerTransition> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opening"
                    );
                    self.set_state(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(Instant::now());
                    Some(BreakerTransition::Opened)
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker reopening after failed probe");
                self.set_state(&mut inner, BreakerState::Open);
                inner.opened_at = Some(Instant::now());
                inner.probes_admitted = 0;
                inner.probes_succeeded = 0;
                Some(BreakerTransition::Opened)
            }
            BreakerState::Open => None,
        }
    }

    /// Reset to Closed, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.set_state(&mut inner, BreakerState::Closed);
        inner.consecutive_failures = 0;
        inner.probes_admitted = 0;
        inner.probes_succeeded = 0;
        inner.opened_at = None;
    }

    fn set_state(&self, inner: &mut BreakerInner, state: BreakerState) {
        inner.state = state;
        self.atomic_state.store(state.to_atomic(), Ordering::Release);
    }
}
