//! Metric emission for traced operations.
//!
//! Tracers never reach for a global metrics switch: they hold a [`MetricsSink`]
//! and check [`MetricsSink::enabled`] before every observation.

use std::fmt;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{InstrumentationScope, Key, KeyValue};
use opentelemetry_semantic_conventions as semconv;

use crate::common::OperationStatus;

const OPERATION: Key = Key::from_static_str("operation");
const STATUS: Key = Key::from_static_str("status");

/// The data store an observation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    Relational,
    Cache,
}

/// One completed operation, as reported to a [`MetricsSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<'a> {
    pub store: Store,
    pub operation: &'a str,
    pub status: OperationStatus,
    pub duration: Duration,
}

/// Destination for per-operation counters and latency histograms.
///
/// Implementations are shared between every traced operation and must accept
/// concurrent observations.
pub trait MetricsSink: Send + Sync {
    /// Whether observations should be produced at all.
    fn enabled(&self) -> bool;

    /// Counts one operation labelled `(operation, status)` and records its
    /// duration, in seconds, labelled `(operation)`.
    fn observe(&self, observation: &Observation<'_>);
}

/// A sink that is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn enabled(&self) -> bool {
        false
    }

    fn observe(&self, _observation: &Observation<'_>) {}
}

#[derive(Clone)]
struct Instruments {
    total: Counter<u64>,
    duration: Histogram<f64>,
}

impl Instruments {
    fn observe(&self, observation: &Observation<'_>) {
        let operation = KeyValue::new(OPERATION, observation.operation.to_owned());
        self.total.add(
            1,
            &[
                operation.clone(),
                KeyValue::new(STATUS, observation.status.as_str()),
            ],
        );
        self.duration
            .record(observation.duration.as_secs_f64(), &[operation]);
    }
}

/// [`MetricsSink`] backed by OpenTelemetry instruments.
///
/// | instrument | kind | labels |
/// |------------|------|--------|
/// | `db.client.query.total` | counter | operation, status |
/// | `db.client.query.duration` | histogram (s) | operation |
/// | `cache.client.operation.total` | counter | operation, status |
/// | `cache.client.operation.duration` | histogram (s) | operation |
#[derive(Clone)]
pub struct OtelMetrics {
    relational: Instruments,
    cache: Instruments,
}

impl OtelMetrics {
    /// Builds the instruments on the given meter.
    pub fn new(meter: &Meter) -> Self {
        let relational = Instruments {
            total: meter
                .u64_counter("db.client.query.total")
                .with_description("Number of relational operations, by operation and status")
                .with_unit("{operation}")
                .build(),
            duration: meter
                .f64_histogram("db.client.query.duration")
                .with_description("Duration of relational operations")
                .with_unit("s")
                .build(),
        };
        let cache = Instruments {
            total: meter
                .u64_counter("cache.client.operation.total")
                .with_description("Number of cache commands and pipelines, by operation and status")
                .with_unit("{operation}")
                .build(),
            duration: meter
                .f64_histogram("cache.client.operation.duration")
                .with_description("Duration of cache commands and pipelines")
                .with_unit("s")
                .build(),
        };

        Self { relational, cache }
    }

    /// Builds the instruments on a meter obtained from the global meter provider,
    /// scoped to this crate.
    pub fn from_global() -> Self {
        let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semconv::SCHEMA_URL)
            .build();

        Self::new(&opentelemetry::global::meter_with_scope(scope))
    }
}

impl fmt::Debug for OtelMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelMetrics").finish_non_exhaustive()
    }
}

impl MetricsSink for OtelMetrics {
    fn enabled(&self) -> bool {
        true
    }

    fn observe(&self, observation: &Observation<'_>) {
        match observation.store {
            Store::Relational => self.relational.observe(observation),
            Store::Cache => self.cache.observe(observation),
        }
    }
}
