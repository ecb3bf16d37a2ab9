//! Asynchronous Redis connection instrumentation

use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::{Cmd, Pipeline, RedisFuture, RedisResult, Value};

use crate::cache::CacheTracer;

/// An instrumented wrapper around an async Redis connection.
///
/// Implements [`redis::aio::ConnectionLike`], so `AsyncCommands`,
/// `Cmd::query_async` and `Pipeline::query_async` are traced as is.
#[derive(Clone)]
pub struct InstrumentedAsyncConnection<C> {
    inner: C,
    tracer: CacheTracer,
}

impl<C: ConnectionLike + Send> InstrumentedAsyncConnection<C> {
    /// Create a new instrumented async connection
    ///
    /// # Arguments
    ///
    /// * `connection` - The async connection to instrument, typically a
    ///   `MultiplexedConnection`.
    /// * `tracer` - The tracer every command and pipeline is routed through.
    ///
    /// # Returns
    ///
    /// An `InstrumentedAsyncConnection` that owns `connection`.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let conn = client.get_multiplexed_async_connection().await?;
    /// let mut instrumented = InstrumentedAsyncConnection::new(conn, CacheTracer::default());
    /// let _: () = instrumented.set("key", "value").await?;
    /// ```
    pub fn new(connection: C, tracer: CacheTracer) -> Self {
        Self {
            inner: connection,
            tracer,
        }
    }

    /// Get the underlying connection
    ///
    /// # Returns
    ///
    /// A shared reference (`&C`) to the wrapped connection.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Get a mutable reference to the underlying connection
    ///
    /// Commands sent through the returned reference are not traced.
    ///
    /// # Returns
    ///
    /// A mutable reference (`&mut C`) to the wrapped connection.
    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// Execute a pipeline of commands with tracing
    ///
    /// Equivalent to `pipeline.query_async(&mut conn)`; the pipeline is recorded
    /// as one `cache_pipeline` span with its queued command count.
    ///
    /// # Errors
    ///
    /// Returns the error produced by the connection, unchanged. If the returned
    /// future is dropped before the reply arrives, the pipeline is recorded as
    /// failed with a cancellation error.
    pub async fn execute_pipeline(&mut self, pipeline: &Pipeline) -> RedisResult<Vec<Value>> {
        pipeline.query_async(self).await
    }
}

impl<C: ConnectionLike + Send> ConnectionLike for InstrumentedAsyncConnection<C> {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        Box::pin(async move {
            let Self { inner, tracer } = self;
            tracer.process_async(cmd, inner.req_packed_command(cmd)).await
        })
    }

    /// The pipeline is recorded with its queued command count, including for
    /// atomic pipelines where `count` only covers the `EXEC` reply.
    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        Box::pin(async move {
            let Self { inner, tracer } = self;
            tracer
                .process_pipeline_async(
                    cmd.cmd_iter().count(),
                    inner.req_packed_commands(cmd, offset, count),
                )
                .await
        })
    }

    fn get_db(&self) -> i64 {
        self.inner.get_db()
    }
}

/// A multiplexed async connection that is instrumented with tracing, logs and metrics.
pub type InstrumentedMultiplexedConnection = InstrumentedAsyncConnection<MultiplexedConnection>;
