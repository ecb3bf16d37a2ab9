//! This module provides an instrumented wrapper around synchronous Redis
//! connections. `InstrumentedConnection` implements [`redis::ConnectionLike`],
//! so `redis::Commands`, `Cmd::query` and `Pipeline::query` are traced without
//! any change at the call site.

use redis::{Cmd, Connection, ConnectionLike, Pipeline, RedisResult, Value};

use crate::cache::CacheTracer;

/// A connection with every command and pipeline routed through a [`CacheTracer`].
///
/// # Examples
/// ```ignore
/// use otel_instrumentation_datastore::{InstrumentedClient, TraceOptions};
/// use redis::Commands;
///
/// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
/// let mut conn = InstrumentedClient::new(client, TraceOptions::new(true)).get_connection()?;
///
/// let _: () = conn.set("key1", "value1")?;
/// let value: String = conn.get("key1")?;
/// ```
pub struct InstrumentedConnection<C = Connection> {
    inner: C,
    tracer: CacheTracer,
}

impl<C: ConnectionLike> InstrumentedConnection<C> {
    /// Wraps `connection` so that its commands and pipelines pass through `tracer`.
    ///
    /// # Arguments
    ///
    /// * `connection` - The connection to instrument. Any [`ConnectionLike`]
    ///   works, including `redis::Connection` and test doubles.
    /// * `tracer` - The tracer that opens spans, emits log events and records
    ///   metrics for every command.
    ///
    /// # Returns
    ///
    /// An `InstrumentedConnection` that owns `connection`.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let conn = client.get_connection()?;
    /// let instrumented = InstrumentedConnection::new(conn, CacheTracer::default());
    /// ```
    pub fn new(connection: C, tracer: CacheTracer) -> Self {
        Self {
            inner: connection,
            tracer,
        }
    }

    /// Returns a reference to the inner connection.
    ///
    /// # Returns
    ///
    /// A shared reference (`&C`) to the wrapped connection.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Provides mutable access to the inner connection.
    ///
    /// Commands sent through the returned reference bypass the tracer and are
    /// not traced.
    ///
    /// # Returns
    ///
    /// A mutable reference (`&mut C`) to the wrapped connection.
    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// Unwraps the instrumented connection, returning the inner connection.
    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Executes `pipeline` as one traced unit and returns its replies.
    ///
    /// Equivalent to `pipeline.query(&mut conn)`, with `db.command_count` taken
    /// from the commands queued in `pipeline`.
    ///
    /// # Errors
    ///
    /// Returns the error produced by the connection, unchanged.
    pub fn execute_pipeline(&mut self, pipeline: &Pipeline) -> RedisResult<Vec<Value>> {
        let inner = &mut self.inner;
        self.tracer
            .process_pipeline(pipeline.cmd_iter().count(), || pipeline.query(inner))
    }
}

impl<C: ConnectionLike> ConnectionLike for InstrumentedConnection<C> {
    /// Pre-encoded commands carry no command name and are passed through untraced.
    fn req_packed_command(&mut self, cmd: &[u8]) -> RedisResult<Value> {
        self.inner.req_packed_command(cmd)
    }

    /// Atomic pipelines arrive as `MULTI`, the queued commands and `EXEC`, with
    /// `offset` skipping every reply but the last. The queued command count is
    /// `offset - 1` for those and `count` otherwise.
    fn req_packed_commands(
        &mut self,
        cmd: &[u8],
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<Value>> {
        let command_count = if offset > 0 { offset - 1 } else { count };
        let inner = &mut self.inner;
        self.tracer
            .process_pipeline(command_count, || inner.req_packed_commands(cmd, offset, count))
    }

    fn req_command(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        let inner = &mut self.inner;
        self.tracer.process(cmd, |cmd| inner.req_command(cmd))
    }

    fn get_db(&self) -> i64 {
        self.inner.get_db()
    }

    fn supports_pipelining(&self) -> bool {
        self.inner.supports_pipelining()
    }

    fn check_connection(&mut self) -> bool {
        self.inner.check_connection()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

/// A Redis connection that is instrumented with tracing, logs and metrics.
pub type InstrumentedRedisConnection = InstrumentedConnection<Connection>;
