//! Per-endpoint circuit breaker: Closed → Open → HalfOpen.
//!
//! Closed counts consecutive failures; at the threshold the circuit opens and
//! rejects calls for the timeout window, then admits exactly one probe.
//! Probe success closes the circuit; probe failure re-opens it.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Finite-state device that short-circuits an external call after repeated
/// failures. All state sits behind one mutex; this is one of the two coarse
/// locks in the whole core.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Whether a call may be attempted now. In the Open state this flips to
    /// HalfOpen once the timeout has elapsed and admits exactly one probe.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.timeout);
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
        }
    }

    /// Trip straight to Open regardless of the failure count (auth failures).
    pub fn trip_open(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        inner.consecutive_failures = self.threshold;
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}
