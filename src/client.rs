//! A module providing an instrumented wrapper around a Redis client.

use redis::{Client, RedisError};
use tracing::instrument;

use crate::cache::CacheTracer;
use crate::options::TraceOptions;

/// Wraps a `Client` so that every connection it hands out is traced.
///
/// Creating the wrapper is the attach step for cache clients: each connection
/// obtained from it routes commands and pipelines through one shared
/// [`CacheTracer`].
///
/// # Example
/// ```rust,ignore
/// use otel_instrumentation_datastore::{InstrumentedClient, TraceOptions};
///
/// let client = redis::Client::open("redis://127.0.0.1/")?;
/// let instrumented = InstrumentedClient::new(client, TraceOptions::default());
/// let mut conn = instrumented.get_connection()?;
/// ```
#[derive(Debug, Clone)]
pub struct InstrumentedClient {
    inner: Client,
    tracer: CacheTracer,
}

impl InstrumentedClient {
    /// Creates an instrumented client around `client`.
    ///
    /// # Arguments
    ///
    /// * `client` - The redis-rs client connections are opened with.
    /// * `options` - Tracing switch and metrics sink shared by every connection
    ///   handed out by this client.
    ///
    /// # Returns
    ///
    /// An `InstrumentedClient` holding `client` and a [`CacheTracer`] built from
    /// `options`.
    ///
    /// # Example
    /// ```rust,ignore
    /// let client = redis::Client::open("redis://127.0.0.1/")?;
    /// let instrumented = InstrumentedClient::new(client, TraceOptions::new(true));
    /// ```
    #[instrument(skip(client))]
    pub fn new(client: Client, options: TraceOptions) -> Self {
        Self {
            inner: client,
            tracer: CacheTracer::new(options),
        }
    }

    /// Returns a reference to the inner `Client` instance.
    ///
    /// # Returns
    ///
    /// A shared reference (`&Client`) to the wrapped client. Connections opened
    /// directly from it are not traced.
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Returns the tracer shared by every connection of this client.
    pub fn tracer(&self) -> &CacheTracer {
        &self.tracer
    }

    /// Retrieves a synchronous instrumented Redis connection.
    ///
    /// # Errors
    ///
    /// Returns the `RedisError` from the underlying `get_connection` call.
    #[cfg(feature = "sync")]
    #[instrument(skip(self))]
    pub fn get_connection(&self) -> Result<crate::sync::InstrumentedConnection, RedisError> {
        let conn = self.tracer.dial(|| self.inner.get_connection())?;
        Ok(crate::sync::InstrumentedConnection::new(
            conn,
            self.tracer.clone(),
        ))
    }

    /// Get a multiplexed asynchronous connection to the Redis server
    ///
    /// # Errors
    ///
    /// Returns the `RedisError` from the underlying
    /// `get_multiplexed_async_connection` call.
    #[cfg(feature = "aio")]
    #[instrument(skip(self))]
    pub async fn get_multiplexed_async_connection(
        &self,
    ) -> Result<crate::aio::InstrumentedMultiplexedConnection, RedisError> {
        let conn = self
            .tracer
            .dial_async(self.inner.get_multiplexed_async_connection())
            .await?;
        Ok(crate::aio::InstrumentedMultiplexedConnection::new(
            conn,
            self.tracer.clone(),
        ))
    }
}
