//! Closed / open / half-open circuit breaker for downstream calls.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "resilience::breaker";

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_HALF_OPEN_MAX_REQUESTS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures tolerated in the closed state; one more trips it.
    pub failure_threshold: u32,
    /// Period after which closed-state counts are cleared. Zero keeps them
    /// until the next success.
    pub interval: Duration,
    /// Cool-down spent open before a probe is allowed.
    pub open_timeout: Duration,
    /// Probes admitted while half-open; that many successes close the breaker.
    pub half_open_max_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            interval: Duration::ZERO,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            half_open_max_requests: DEFAULT_HALF_OPEN_MAX_REQUESTS,
        }
    }
}

impl From<&crate::config::BreakerSettings> for BreakerConfig {
    fn from(settings: &crate::config::BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.get(),
            interval: settings.interval,
            open_timeout: settings.open_timeout,
            half_open_max_requests: settings.half_open_max_requests.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker `{0}` is open")]
    Open(&'static str),
    #[error("circuit breaker `{0}` is shedding half-open requests")]
    TooManyRequests(&'static str),
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True when the call was rejected without reaching the dependency.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Inner(_))
    }

    pub fn map_inner<F, T>(self, f: F) -> BreakerError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            BreakerError::Open(name) => BreakerError::Open(name),
            BreakerError::TooManyRequests(name) => BreakerError::TooManyRequests(name),
            BreakerError::Inner(err) => BreakerError::Inner(f(err)),
        }
    }
}

/// Errors that decide whether a failed call counts against the breaker.
///
/// Outcomes such as "row not found" prove the dependency is healthy and
/// should return `false`.
pub trait TripsBreaker {
    fn trips_breaker(&self) -> bool {
        true
    }
}

#[derive(Debug)]
enum State {
    Closed {
        consecutive_failures: u32,
        window_start: Instant,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        in_flight: u32,
        successes: u32,
    },
}

#[derive(Debug)]
struct Inner {
    state: State,
    generation: u64,
    forced_open: bool,
}

/// Failure-protection state machine shared by every caller of one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

struct Permit {
    generation: u64,
    half_open: bool,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: State::Closed {
                    consecutive_failures: 0,
                    window_start: Instant::now(),
                },
                generation: 0,
                forced_open: false,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> BreakerState {
        let now = Instant::now();
        let mut inner = mutex_lock(&self.inner, SOURCE, "state");
        if inner.forced_open {
            return BreakerState::Open;
        }
        self.refresh(&mut inner, now);
        match inner.state {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Reject every call until [`CircuitBreaker::reset`] is invoked.
    pub fn force_open(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "force_open");
        inner.forced_open = true;
        warn!(target = SOURCE, breaker = self.name, "Circuit breaker forced open");
    }

    /// Clear any forced state and return to closed with fresh counts.
    pub fn reset(&self) {
        let now = Instant::now();
        let mut inner = mutex_lock(&self.inner, SOURCE, "reset");
        inner.forced_open = false;
        self.transition(&mut inner, closed(now));
    }

    /// Execute `op` under the breaker.
    ///
    /// Dropping the returned future before completion releases the probe
    /// slot it held without recording an outcome.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TripsBreaker,
    {
        let permit = self.enter()?;
        let mut guard = PermitGuard {
            breaker: self,
            permit: Some(permit),
        };
        let result = op().await;
        if let Some(permit) = guard.permit.take() {
            let failed = matches!(&result, Err(err) if err.trips_breaker());
            self.exit(permit, failed);
        }
        result.map_err(BreakerError::Inner)
    }

    fn enter<E>(&self) -> Result<Permit, BreakerError<E>> {
        let now = Instant::now();
        let mut inner = mutex_lock(&self.inner, SOURCE, "enter");
        if inner.forced_open {
            self.record_rejection("forced_open");
            return Err(BreakerError::Open(self.name));
        }
        self.refresh(&mut inner, now);
        let generation = inner.generation;
        let max_probes = self.config.half_open_max_requests.max(1);
        match &mut inner.state {
            State::Closed { .. } => Ok(Permit {
                generation,
                half_open: false,
            }),
            State::Open { .. } => {
                self.record_rejection("open");
                Err(BreakerError::Open(self.name))
            }
            State::HalfOpen {
                in_flight,
                successes,
            } => {
                if in_flight.saturating_add(*successes) >= max_probes {
                    self.record_rejection("too_many_requests");
                    return Err(BreakerError::TooManyRequests(self.name));
                }
                *in_flight += 1;
                Ok(Permit {
                    generation,
                    half_open: true,
                })
            }
        }
    }

    fn exit(&self, permit: Permit, failed: bool) {
        let now = Instant::now();
        let mut inner = mutex_lock(&self.inner, SOURCE, "exit");
        self.refresh(&mut inner, now);
        if inner.generation != permit.generation {
            return;
        }
        let max_probes = self.config.half_open_max_requests.max(1);
        let threshold = self.config.failure_threshold;
        let next = match &mut inner.state {
            State::Closed {
                consecutive_failures,
                ..
            } => {
                if failed {
                    *consecutive_failures = consecutive_failures.saturating_add(1);
                    (*consecutive_failures > threshold).then(|| self.opened(now))
                } else {
                    *consecutive_failures = 0;
                    None
                }
            }
            State::Open { .. } => None,
            State::HalfOpen {
                in_flight,
                successes,
            } => {
                *in_flight = in_flight.saturating_sub(1);
                if failed {
                    Some(self.opened(now))
                } else {
                    *successes += 1;
                    (*successes >= max_probes).then(|| closed(now))
                }
            }
        };
        if let Some(next) = next {
            self.transition(&mut inner, next);
        }
    }

    fn release(&self, permit: Permit) {
        if !permit.half_open {
            return;
        }
        let mut inner = mutex_lock(&self.inner, SOURCE, "release");
        if inner.generation != permit.generation {
            return;
        }
        if let State::HalfOpen { in_flight, .. } = &mut inner.state {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        let next = match &mut inner.state {
            State::Open { until } if now >= *until => Some(State::HalfOpen {
                in_flight: 0,
                successes: 0,
            }),
            State::Closed {
                consecutive_failures,
                window_start,
            } if !self.config.interval.is_zero()
                && now.duration_since(*window_start) >= self.config.interval =>
            {
                *consecutive_failures = 0;
                *window_start = now;
                None
            }
            _ => None,
        };
        if let Some(next) = next {
            self.transition(inner, next);
        }
    }

    fn opened(&self, now: Instant) -> State {
        State::Open {
            until: now + self.config.open_timeout,
        }
    }

    fn transition(&self, inner: &mut Inner, next: State) {
        let from = describe(&inner.state);
        let to = describe(&next);
        inner.state = next;
        inner.generation = inner.generation.wrapping_add(1);
        if from != to {
            info!(
                target = SOURCE,
                breaker = self.name,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker changed state"
            );
            counter!(
                "postrank_breaker_transition_total",
                "breaker" => self.name,
                "to" => to.as_str()
            )
            .increment(1);
        }
    }

    fn record_rejection(&self, reason: &'static str) {
        counter!(
            "postrank_breaker_rejected_total",
            "breaker" => self.name,
            "reason" => reason
        )
        .increment(1);
    }
}

struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.release(permit);
        }
    }
}

fn closed(now: Instant) -> State {
    State::Closed {
        consecutive_failures: 0,
        window_start: now,
    }
}

fn describe(state: &State) -> BreakerState {
    match state {
        State::Closed { .. } => BreakerState::Closed,
        State::Open { .. } => BreakerState::Open,
        State::HalfOpen { .. } => BreakerState::HalfOpen,
    }
}
