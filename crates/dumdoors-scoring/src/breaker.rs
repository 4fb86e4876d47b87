//! Circuit breaker and the process-wide breaker registry.
//!
//! A breaker is `Closed` while the dependency behaves, `Open` for a cooldown
//! after too many consecutive failures, and `HalfOpen` once the cooldown has
//! elapsed: a bounded number of probe calls may pass, enough consecutive
//! probe successes close it again and any probe failure reopens it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use dumdoors_core::config::BreakerConfig;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

/// Point-in-time counters for one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub probes_in_flight: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct Inner {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
    // Bumped on every state change so late results from an older state are
    // counted but do not drive transitions.
    generation: u64,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl Inner {
    fn transition(&mut self, name: &str, next: BreakerState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        self.generation += 1;
        self.consecutive_successes = 0;
        self.probes_in_flight = 0;
        match next {
            BreakerState::Open => {
                self.opened_at = Some(Instant::now());
                warn!(breaker = name, from = previous.as_str(), "circuit breaker opened");
            }
            BreakerState::HalfOpen => {
                info!(breaker = name, "circuit breaker half-open, allowing probes");
            }
            BreakerState::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
                info!(breaker = name, "circuit breaker closed");
            }
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        self.opened_at
            .is_none_or(|at| at.elapsed() >= self.config.cooldown())
    }
}

/// A circuit breaker guarding one downstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                config,
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                probes_in_flight: 0,
                opened_at: None,
                generation: 0,
                total_successes: 0,
                total_failures: 0,
                rejected_calls: 0,
            }),
        }
    }

    /// Name of the guarded dependency.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks to make a call. Returns `None` if the call must be short-circuited.
    ///
    /// The returned permit must be settled with [`BreakerPermit::success`] or
    /// [`BreakerPermit::failure`]; dropping it unsettled releases its probe
    /// slot without counting an outcome.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        let mut inner = self.lock();
        if inner.state == BreakerState::Open && inner.cooldown_elapsed() {
            inner.transition(&self.name, BreakerState::HalfOpen);
        }
        let probe = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                inner.rejected_calls += 1;
                return None;
            }
            BreakerState::HalfOpen => {
                if inner.probes_in_flight >= inner.config.half_open_max_probes {
                    inner.rejected_calls += 1;
                    return None;
                }
                inner.probes_in_flight += 1;
                true
            }
        };
        Some(BreakerPermit {
            breaker: Arc::clone(self),
            generation: inner.generation,
            probe,
            settled: false,
        })
    }

    fn settle(&self, generation: u64, probe: bool, success: bool) {
        let mut inner = self.lock();
        if success {
            inner.total_successes += 1;
        } else {
            inner.total_failures += 1;
        }
        if generation != inner.generation {
            return;
        }
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        match (inner.state, success) {
            (BreakerState::Closed, true) => inner.consecutive_failures = 0,
            (BreakerState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= inner.config.failure_threshold {
                    inner.transition(&self.name, BreakerState::Open);
                }
            }
            (BreakerState::HalfOpen, true) => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= inner.config.success_threshold {
                    inner.transition(&self.name, BreakerState::Closed);
                }
            }
            (BreakerState::HalfOpen, false) => {
                inner.consecutive_failures += 1;
                inner.transition(&self.name, BreakerState::Open);
            }
            (BreakerState::Open, _) => {}
        }
    }

    fn release(&self, generation: u64, probe: bool) {
        let mut inner = self.lock();
        if probe && generation == inner.generation {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    /// Current state. An open breaker whose cooldown has elapsed still
    /// reports `Open` until the next call attempts a probe.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Replaces the breaker parameters without resetting its state.
    pub fn reconfigure(&self, config: &BreakerConfig) {
        let mut inner = self.lock();
        if inner.config != *config {
            inner.config = config.clone();
        }
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            probes_in_flight: inner.probes_in_flight,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
        }
    }
}

/// Permission to make one call through a breaker.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Returns true if this call is a half-open probe.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Records a successful call.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.probe, true);
    }

    /// Records a failed call.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.probe, false);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.generation, self.probe);
        }
    }
}

/// Process-wide set of breakers keyed by dependency name.
///
/// Created at startup and shared for the life of the process. Access is
/// synchronized per breaker, never across the whole registry.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the breaker for `name`, creating it with `config` if needed.
    pub fn get_or_create(&self, name: &str, config: &BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.breakers
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config.clone())))
                .value(),
        )
    }

    /// Looks up a breaker without creating it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Applies `config` to every breaker.
    pub fn reconfigure(&self, config: &BreakerConfig) {
        for breaker in &self.breakers {
            breaker.value().reconfigure(config);
        }
    }

    /// Counters for every breaker, ordered by name.
    #[must_use]
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
