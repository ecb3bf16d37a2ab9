//! Options shared by both tracers.

use std::fmt;
use std::sync::Arc;

use crate::metrics::{MetricsSink, NoopMetrics};

/// Controls what a tracer emits.
///
/// Log events are always emitted. Spans are only opened when `enable_tracing`
/// is set, and metrics only when the sink reports itself as enabled.
///
/// ```rust
/// use otel_instrumentation_datastore::{OtelMetrics, TraceOptions};
///
/// let options = TraceOptions::new(true).with_metrics(OtelMetrics::from_global());
/// assert!(options.tracing_enabled());
/// ```
#[derive(Clone)]
pub struct TraceOptions {
    enable_tracing: bool,
    metrics: Arc<dyn MetricsSink>,
}

impl TraceOptions {
    /// Options with the given tracing flag and metrics switched off.
    #[must_use]
    pub fn new(enable_tracing: bool) -> Self {
        Self {
            enable_tracing,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Routes metric observations to `metrics`.
    #[must_use]
    pub fn with_metrics(self, metrics: impl MetricsSink + 'static) -> Self {
        self.with_shared_metrics(Arc::new(metrics))
    }

    /// Routes metric observations to a sink shared with other components.
    #[must_use]
    pub fn with_shared_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn tracing_enabled(&self) -> bool {
        self.enable_tracing
    }

    pub fn metrics(&self) -> &dyn MetricsSink {
        self.metrics.as_ref()
    }
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for TraceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceOptions")
            .field("enable_tracing", &self.enable_tracing)
            .field("metrics_enabled", &self.metrics.enabled())
            .finish()
    }
}
