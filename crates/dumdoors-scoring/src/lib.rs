//! Resilient Scoring Client.
//!
//! Wraps the external scoring service with a per-call timeout, bounded retry
//! with exponential backoff and jitter, and a per-dependency circuit breaker.
//! Every call resolves to a score: either the service's answer or a
//! deterministic fallback. Outcomes are reported through a
//! [`metrics::ScoringMetricsSink`].

pub mod breaker;
pub mod client;
pub mod http;
pub mod metrics;
pub mod retry;

pub use breaker::{BreakerRegistry, BreakerState, BreakerStats, CircuitBreaker};
pub use client::{FallbackReason, ResilientScoringClient, ScoreOutcome};
pub use http::HttpScoringService;
pub use metrics::{InMemoryScoringMetrics, OtelScoringMetrics, ScoringMetricsSink};
