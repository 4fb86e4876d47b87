//! Per-call scoring metrics.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram};

use crate::breaker::BreakerState;

/// How a resilient scoring call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The service returned a score.
    Success,
    /// A fallback score was substituted.
    Fallback,
}

impl CallOutcome {
    /// Stable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fallback => "fallback",
        }
    }
}

/// One observation emitted per resilient scoring call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringCallRecord {
    pub dependency: String,
    pub outcome: CallOutcome,
    pub reason: Option<&'static str>,
    pub attempts: u32,
    pub latency: Duration,
    pub breaker_state: BreakerState,
}

/// Destination for scoring call observations.
pub trait ScoringMetricsSink: Send + Sync {
    /// Records one call.
    fn record(&self, record: &ScoringCallRecord);
}

/// Records through the OpenTelemetry global meter.
#[derive(Debug, Clone)]
pub struct OtelScoringMetrics {
    latency: Histogram<f64>,
    calls: Counter<u64>,
}

impl OtelScoringMetrics {
    /// Registers the instruments on the global meter provider.
    #[must_use]
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("dumdoors-scoring");
        Self {
            latency: meter
                .f64_histogram("dumdoors.scoring.latency")
                .with_unit("ms")
                .with_description("Latency of resilient scoring calls")
                .build(),
            calls: meter
                .u64_counter("dumdoors.scoring.calls")
                .with_description("Resilient scoring calls by outcome")
                .build(),
        }
    }
}

impl Default for OtelScoringMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringMetricsSink for OtelScoringMetrics {
    fn record(&self, record: &ScoringCallRecord) {
        let attributes = [
            KeyValue::new("dependency", record.dependency.clone()),
            KeyValue::new("outcome", record.outcome.as_str()),
            KeyValue::new("reason", record.reason.unwrap_or("none")),
            KeyValue::new("breaker_state", record.breaker_state.as_str()),
        ];
        self.latency
            .record(record.latency.as_secs_f64() * 1000.0, &attributes);
        self.calls.add(1, &attributes);
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct InMemoryScoringMetrics {
    records: Mutex<Vec<ScoringCallRecord>>,
}

impl InMemoryScoringMetrics {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded calls.
    #[must_use]
    pub fn records(&self) -> Vec<ScoringCallRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ScoringMetricsSink for InMemoryScoringMetrics {
    fn record(&self, record: &ScoringCallRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}
