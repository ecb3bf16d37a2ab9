//! OpenTelemetry instrumentation for relational and cache data stores
//!
//! This crate traces the operations an application sends to its data stores
//! and reports each of them as a span, a structured log event and a pair of
//! metrics (an operation counter and a duration histogram).
//!
//! Two tracers are provided:
//!
//! - [`RelationalTracer`] attaches a before and an after callback to every verb
//!   of a [`relational::HookRegistry`]. The SQL statement is rendered with its
//!   bound parameters and classified (`select`, `insert`, `update`, ...) once it
//!   has run.
//! - [`CacheTracer`] wraps Redis connection establishment, single commands and
//!   pipelines. [`InstrumentedClient`] hands out connections that route every
//!   command through it, so `redis::Commands` and `redis::AsyncCommands` need
//!   no changes at the call site.
//!
//! Service names should be configured at the application level through
//! the OpenTelemetry SDK configuration, not within individual instrumentation libraries.
//!
//! # Features
//!
//! - `sync` (default): Synchronous Redis client instrumentation
//! - `aio`: Asynchronous Redis client instrumentation
//!
//! # Examples
//!
//! ## Relational operations
//!
//! ```rust
//! use otel_instrumentation_datastore::relational::{Callbacks, Operation, Verb};
//! use otel_instrumentation_datastore::{RelationalTracer, TraceOptions};
//!
//! let mut callbacks = Callbacks::new();
//! RelationalTracer::new(TraceOptions::default())
//!     .attach(&mut callbacks)
//!     .expect("fresh registry");
//!
//! let mut op = Operation::new(Verb::Query).with_table("users");
//! callbacks
//!     .execute(&mut op, |op| {
//!         op.set_sql("SELECT * FROM users WHERE id = ?", vec![42i64.into()]);
//!         Ok(())
//!     })
//!     .expect("query succeeds");
//! ```
//!
//! ## Cache commands
//!
//! ```rust,ignore
//! use otel_instrumentation_datastore::{InstrumentedClient, TraceOptions};
//! use redis::Commands;
//!
//! let client = redis::Client::open("redis://127.0.0.1/")?;
//! let instrumented = InstrumentedClient::new(client, TraceOptions::default());
//!
//! let mut conn = instrumented.get_connection()?;
//! let _: () = conn.set("key1", "value1")?;
//! let value: String = conn.get("key1")?;
//!
//! let _: Vec<redis::Value> = redis::pipe().incr("hits", 1).get("hits").query(&mut conn)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # OpenTelemetry Attributes
//!
//! The following attributes are added to spans:
//!
//! - `otel.name`: `db.<operation>` for relational operations, `cache.<operation>` for cache commands
//! - `db.system`: `sql` or `cache`
//! - `db.operation`: The classified verb or the lowercase command name
//! - `db.statement`: The rendered SQL statement or the formatted cache command
//! - `db.table`: The target table, when one is bound
//! - `db.command_count`: The number of commands in a pipeline
//! - `db.duration_ms`: Time spent in the wrapped operation
//! - `error`, `error.message`: Set when operations fail
//! - `otel.status_code`: "OK" or "ERROR"
//! - `otel.status_description`: Error description for failures

pub mod cache;
pub mod client;
pub mod common;
pub mod metrics;
pub mod options;
pub mod relational;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "aio")]
pub mod aio;

#[cfg(test)]
mod test_util;

pub use cache::CacheTracer;
pub use client::InstrumentedClient;
pub use common::{OperationStatus, VerbLabel};
pub use metrics::{MetricsSink, NoopMetrics, OtelMetrics};
pub use options::TraceOptions;
pub use relational::{AttachError, RelationalTracer};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::CacheTracer;
    pub use crate::client::InstrumentedClient;
    pub use crate::metrics::{MetricsSink, OtelMetrics};
    pub use crate::options::TraceOptions;
    pub use crate::relational::{Callbacks, HookRegistry, Operation, RelationalTracer, Verb};

    #[cfg(feature = "sync")]
    pub use crate::sync::*;

    #[cfg(feature = "aio")]
    pub use crate::aio::*;
}
