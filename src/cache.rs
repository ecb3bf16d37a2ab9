//! Tracing stages for cache commands.
//!
//! [`CacheTracer`] provides the three stages a Redis connection is wrapped in:
//! connection establishment ([`CacheTracer::dial`]), single commands
//! ([`CacheTracer::process`]) and pipelines ([`CacheTracer::process_pipeline`]).
//! Each stage takes the next step of the pipeline as a closure (or future),
//! times exactly that step and returns its result untouched.

use std::time::{Duration, Instant};

use redis::{Cmd, RedisResult};
#[cfg(feature = "aio")]
use redis::{ErrorKind, RedisError};
use tracing::field::Empty;
use tracing::Span;

use crate::common::{
    duration_ms, format_command, generate_span_name, get_command_name, record_command_result,
    OperationStatus, VerbLabel,
};
use crate::metrics::{Observation, Store};
use crate::options::TraceOptions;

/// Error message recorded for async commands and pipelines dropped before completion.
#[cfg(feature = "aio")]
const CANCELLED_MESSAGE: &str = "operation cancelled before completion";

/// Wraps cache commands and pipelines with spans, log events and metrics.
#[derive(Debug, Clone, Default)]
pub struct CacheTracer {
    options: TraceOptions,
}

impl CacheTracer {
    pub fn new(options: TraceOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    /// Connection stage. Connections are not traced; `next` runs as is.
    pub fn dial<T>(&self, next: impl FnOnce() -> RedisResult<T>) -> RedisResult<T> {
        next()
    }

    /// Runs a single command through `next`.
    pub fn process<T>(&self, cmd: &Cmd, next: impl FnOnce(&Cmd) -> RedisResult<T>) -> RedisResult<T> {
        let operation = command_operation(cmd);
        let span = self.command_span(&operation);

        let start = Instant::now();
        let result = span.in_scope(|| next(cmd));
        let duration = start.elapsed();

        self.finish_command(&span, &operation, cmd, duration, &result);
        result
    }

    /// Runs a pipeline of `command_count` commands through `next`.
    pub fn process_pipeline<T>(
        &self,
        command_count: usize,
        next: impl FnOnce() -> RedisResult<T>,
    ) -> RedisResult<T> {
        let span = self.pipeline_span(command_count);

        let start = Instant::now();
        let result = span.in_scope(next);
        let duration = start.elapsed();

        self.finish_pipeline(&span, command_count, duration, &result);
        result
    }

    /// Async form of [`CacheTracer::dial`].
    #[cfg(feature = "aio")]
    pub async fn dial_async<T, F>(&self, next: F) -> RedisResult<T>
    where
        F: std::future::Future<Output = RedisResult<T>>,
    {
        next.await
    }

    /// Async form of [`CacheTracer::process`]. The span follows `next` across
    /// await points.
    ///
    /// If the returned future is dropped before `next` completes, the command is
    /// still finished: the span is marked as failed with a cancellation error and
    /// the log event and metric observation are emitted with status `error`.
    #[cfg(feature = "aio")]
    pub async fn process_async<T, F>(&self, cmd: &Cmd, next: F) -> RedisResult<T>
    where
        F: std::future::Future<Output = RedisResult<T>>,
    {
        use tracing::Instrument;

        let operation = command_operation(cmd);
        let span = self.command_span(&operation);

        let start = Instant::now();
        let mut guard = CancelGuard {
            tracer: self,
            span: &span,
            start,
            stage: PendingStage::Command {
                operation: &operation,
                cmd,
            },
            armed: true,
        };
        let result = next.instrument(span.clone()).await;
        guard.armed = false;
        let duration = start.elapsed();

        self.finish_command(&span, &operation, cmd, duration, &result);
        result
    }

    /// Async form of [`CacheTracer::process_pipeline`], finished the same way
    /// as [`CacheTracer::process_async`] when dropped early.
    #[cfg(feature = "aio")]
    pub async fn process_pipeline_async<T, F>(&self, command_count: usize, next: F) -> RedisResult<T>
    where
        F: std::future::Future<Output = RedisResult<T>>,
    {
        use tracing::Instrument;

        let span = self.pipeline_span(command_count);

        let start = Instant::now();
        let mut guard = CancelGuard {
            tracer: self,
            span: &span,
            start,
            stage: PendingStage::Pipeline { command_count },
            armed: true,
        };
        let result = next.instrument(span.clone()).await;
        guard.armed = false;
        let duration = start.elapsed();

        self.finish_pipeline(&span, command_count, duration, &result);
        result
    }

    fn command_span(&self, operation: &str) -> Span {
        if !self.options.tracing_enabled() {
            return Span::none();
        }

        tracing::info_span!(
            "cache_command",
            otel.name = %generate_span_name("cache", operation),
            otel.kind = "client",
            otel.status_code = Empty,
            otel.status_description = Empty,
            db.system = "cache",
            db.operation = operation,
            db.statement = Empty,
            db.duration_ms = Empty,
            error = Empty,
            error.message = Empty,
            "error.type" = Empty,
        )
    }

    fn pipeline_span(&self, command_count: usize) -> Span {
        if !self.options.tracing_enabled() {
            return Span::none();
        }

        tracing::info_span!(
            "cache_pipeline",
            otel.name = %generate_span_name("cache", VerbLabel::Pipeline.as_str()),
            otel.kind = "client",
            otel.status_code = Empty,
            otel.status_description = Empty,
            db.system = "cache",
            db.operation = VerbLabel::Pipeline.as_str(),
            db.command_count = command_count,
            db.duration_ms = Empty,
            error = Empty,
            error.message = Empty,
            "error.type" = Empty,
        )
    }

    fn finish_command<T>(
        &self,
        span: &Span,
        operation: &str,
        cmd: &Cmd,
        duration: Duration,
        result: &RedisResult<T>,
    ) {
        let statement = format_command(cmd);
        let status = OperationStatus::from_failed(result.is_err());

        if !span.is_none() {
            span.record("db.statement", statement.as_str());
            span.record("db.duration_ms", duration_ms(duration));
            record_command_result(span, result);
        }

        span.in_scope(|| {
            tracing::info!(
                operation,
                cmd = %statement,
                ?duration,
                status = %status,
                error = result.as_ref().err().map(tracing::field::display),
                "Redis command"
            );
        });

        self.observe(operation, status, duration);
    }

    fn finish_pipeline<T>(
        &self,
        span: &Span,
        command_count: usize,
        duration: Duration,
        result: &RedisResult<T>,
    ) {
        let status = OperationStatus::from_failed(result.is_err());

        if !span.is_none() {
            span.record("db.duration_ms", duration_ms(duration));
            record_command_result(span, result);
        }

        span.in_scope(|| {
            tracing::info!(
                operation = VerbLabel::Pipeline.as_str(),
                cmd_count = command_count,
                ?duration,
                status = %status,
                error = result.as_ref().err().map(tracing::field::display),
                "Redis pipeline"
            );
        });

        self.observe(VerbLabel::Pipeline.as_str(), status, duration);
    }

    fn observe(&self, operation: &str, status: OperationStatus, duration: Duration) {
        let metrics = self.options.metrics();
        if metrics.enabled() {
            metrics.observe(&Observation {
                store: Store::Cache,
                operation,
                status,
                duration,
            });
        }
    }
}

#[cfg(feature = "aio")]
enum PendingStage<'a> {
    Command { operation: &'a str, cmd: &'a Cmd },
    Pipeline { command_count: usize },
}

/// Finishes an async stage whose future was dropped while `next` was pending.
#[cfg(feature = "aio")]
struct CancelGuard<'a> {
    tracer: &'a CacheTracer,
    span: &'a Span,
    start: Instant,
    stage: PendingStage<'a>,
    armed: bool,
}

#[cfg(feature = "aio")]
impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let duration = self.start.elapsed();
        let cancelled: RedisResult<()> = Err(RedisError::from((
            ErrorKind::ClientError,
            CANCELLED_MESSAGE,
        )));
        match self.stage {
            PendingStage::Command { operation, cmd } => {
                self.tracer
                    .finish_command(self.span, operation, cmd, duration, &cancelled);
            }
            PendingStage::Pipeline { command_count } => {
                self.tracer
                    .finish_pipeline(self.span, command_count, duration, &cancelled);
            }
        }
    }
}

/// Lower-case command name used for span names, log events and metric labels.
fn command_operation(cmd: &Cmd) -> String {
    get_command_name(cmd).map_or_else(|| "unknown".to_owned(), |name| name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use redis::{ErrorKind, RedisError, Value};
    use tracing_test::traced_test;

    use super::*;
    use crate::metrics::testing::RecordingMetrics;
    use crate::test_util::record_spans;

    fn tracer(enable_tracing: bool) -> (CacheTracer, Arc<RecordingMetrics>) {
        let metrics = Arc::new(RecordingMetrics::default());
        let options = TraceOptions::new(enable_tracing).with_shared_metrics(metrics.clone());
        (CacheTracer::new(options), metrics)
    }

    fn get_cmd() -> Cmd {
        let mut cmd = Cmd::new();
        cmd.arg("GET").arg("user:1");
        cmd
    }

    #[test]
    fn test_command_span_and_metrics() {
        let (tracer, metrics) = tracer(true);

        let (result, spans) = record_spans(|| {
            tracer.process(&get_cmd(), |_| Ok(Value::BulkString(b"ann".to_vec())))
        });

        assert_eq!(result.unwrap(), Value::BulkString(b"ann".to_vec()));
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "cache_command");
        assert_eq!(span.closed, 1);
        assert_eq!(span.field("otel.name"), Some("cache.get"));
        assert_eq!(span.field("db.system"), Some("cache"));
        assert_eq!(span.field("db.operation"), Some("get"));
        assert_eq!(span.field("db.statement"), Some("GET user:1"));
        assert_eq!(span.field("otel.status_code"), Some("OK"));

        let observations = metrics.observations();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].0, Store::Cache);
        assert_eq!(observations[0].1, "get");
        assert_eq!(observations[0].2, OperationStatus::Success);
    }

    #[test]
    fn test_command_error_passes_through() {
        let (tracer, metrics) = tracer(true);

        let (result, spans) = record_spans(|| {
            tracer.process(&get_cmd(), |_| -> RedisResult<Value> {
                Err(RedisError::from((
                    ErrorKind::TypeError,
                    "WRONGTYPE",
                    "Operation against a key holding the wrong kind of value".to_owned(),
                )))
            })
        });

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeError);
        assert_eq!(err.detail(), Some("Operation against a key holding the wrong kind of value"));

        let span = &spans[0];
        assert_eq!(span.closed, 1);
        assert_eq!(span.field("otel.status_code"), Some("ERROR"));
        assert_eq!(span.field("error.type"), Some("type_error"));
        assert_eq!(span.field("error"), Some("true"));
        assert_eq!(metrics.observations()[0].2, OperationStatus::Error);
    }

    #[test]
    fn test_empty_command_is_unknown() {
        let (tracer, metrics) = tracer(true);

        let (_, spans) = record_spans(|| tracer.process(&Cmd::new(), |_| Ok(Value::Nil)));

        assert_eq!(spans[0].field("otel.name"), Some("cache.unknown"));
        assert_eq!(metrics.observations()[0].1, "unknown");
    }

    #[test]
    fn test_pipeline_is_labelled_pipeline() {
        let (tracer, metrics) = tracer(true);

        let (_, spans) = record_spans(|| {
            tracer.process_pipeline(3, || Ok(vec![Value::Okay, Value::Okay, Value::Int(1)]))
        });

        let span = &spans[0];
        assert_eq!(span.name, "cache_pipeline");
        assert_eq!(span.closed, 1);
        assert_eq!(span.field("otel.name"), Some("cache.pipeline"));
        assert_eq!(span.field("db.operation"), Some("pipeline"));
        assert_eq!(span.field("db.command_count"), Some("3"));

        let observations = metrics.observations();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].1, "pipeline");
    }

    #[test]
    fn test_disabled_tracing_opens_no_span() {
        let (tracer, metrics) = tracer(false);

        let (_, spans) = record_spans(|| {
            let _ = tracer.process(&get_cmd(), |_| Ok(Value::Nil));
            let _ = tracer.process_pipeline(2, || Ok(Vec::<Value>::new()));
        });

        assert!(spans.is_empty());
        assert_eq!(metrics.observations().len(), 2);
    }

    #[test]
    fn test_spans_balance_over_mixed_outcomes() {
        let (tracer, metrics) = tracer(true);

        let (_, spans) = record_spans(|| {
            for i in 0..40u32 {
                let fail = i % 3 == 1;
                let next = |_: &Cmd| -> RedisResult<Value> {
                    if fail {
                        Err(RedisError::from((ErrorKind::IoError, "connection reset")))
                    } else {
                        Ok(Value::Okay)
                    }
                };
                if i % 4 == 0 {
                    let _ = tracer.process_pipeline(i as usize, || next(&get_cmd()));
                } else {
                    let _ = tracer.process(&get_cmd(), next);
                }
            }
        });

        assert_eq!(spans.len(), 40);
        assert!(spans.iter().all(|s| s.closed == 1));
        assert_eq!(metrics.observations().len(), 40);
    }

    #[test]
    fn test_dial_passthrough() {
        let (tracer, metrics) = tracer(true);

        let (result, spans) = record_spans(|| tracer.dial(|| Ok(7)));

        assert_eq!(result.unwrap(), 7);
        assert!(spans.is_empty());
        assert!(metrics.observations().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_log_events() {
        let (tracer, _) = tracer(true);

        let mut cmd = Cmd::new();
        cmd.arg("SET").arg("k").arg("v");
        let _ = tracer.process(&cmd, |_| Ok(Value::Okay));
        let _ = tracer.process_pipeline(5, || Ok(Value::Okay));

        assert!(logs_contain("Redis command"));
        assert!(logs_contain("operation=\"set\""));
        assert!(logs_contain("cmd=SET k v"));
        assert!(logs_contain("Redis pipeline"));
        assert!(logs_contain("cmd_count=5"));
        assert!(logs_contain("status=success"));
    }
}
