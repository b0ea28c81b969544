//! Per-peer circuit breaker.
//!
//! Each relay peer gets its own breaker. Consecutive connection failures
//! open the circuit; while open, connection attempts are skipped entirely.
//! After the recovery timeout a single probe is allowed (half-open): success
//! closes the circuit, failure re-opens it and restarts the timer.

use std::time::{Duration, Instant};

/// Breaker state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected until the recovery timeout elapses.
    Open,
    /// One probe request is in flight; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            failure_threshold,
            recovery_timeout,
            opened_at: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a connection attempt may proceed right now.
    ///
    /// Transitions Open -> HalfOpen once the recovery timeout has elapsed;
    /// the caller must then report the probe's outcome via
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    self.state = BreakerState::HalfOpen;
                    tracing::debug!("circuit half-open, allowing probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful connection: closes the circuit and resets the
    /// failure count.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            tracing::info!("circuit closed after successful probe");
        }
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }

    /// Report a failed connection.
    ///
    /// In half-open state a single failure re-opens the circuit; in closed
    /// state the circuit opens once the consecutive-failure threshold is
    /// reached.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        let tripped = self.state == BreakerState::HalfOpen
            || self.failure_count >= self.failure_threshold;
        if tripped {
            if self.state != BreakerState::Open {
                tracing::warn!(
                    failures = self.failure_count,
                    recovery_secs = self.recovery_timeout.as_secs(),
                    "circuit opened"
                );
            }
            self.state = BreakerState::Open;
            self.opened_at = Some(Instant::now());
        }
    }

    #[cfg(test)]
    fn backdate_open(&mut self, by: Duration) {
        if let Some(t) = self.opened_at.as_mut() {
            *t -= by;
        }
    }
}
