//! Tracing for relational operations driven through a [`HookRegistry`].
//!
//! [`RelationalTracer::attach`] places a before/after callback pair around the
//! statement of every chain. The before callback stamps the start time and, when
//! tracing is enabled, opens a `db_operation` span that becomes the operation's
//! context. The after callback classifies the executed SQL, renders it with its
//! parameters, closes the span and emits one log event and one metric
//! observation.

pub mod lifecycle;
pub mod render;

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::field::Empty;

use crate::common::{
    classify_verb_post_execution, duration_ms, generate_span_name, hint_verb_pre_execution,
    record_error_on_span, record_ok_on_span, OperationStatus,
};
use crate::metrics::{Observation, Store};
use crate::options::TraceOptions;

pub use lifecycle::{
    Anchor, Callbacks, DbError, Hook, HookRegistry, Operation, Phase, RegisterError, Verb,
};
pub use render::{render_statement, SqlValue};

/// Name of the callback registered ahead of each statement.
pub const BEFORE_CALLBACK: &str = "otel:trace_before";
/// Name of the callback registered behind each statement.
pub const AFTER_CALLBACK: &str = "otel:trace_after";

const ANCHORS: [(Verb, Anchor, Anchor); 6] = [
    (
        Verb::Create,
        Anchor::Before("core:before_create"),
        Anchor::After("core:after_create"),
    ),
    (
        Verb::Query,
        Anchor::Before("core:query"),
        Anchor::After("core:after_query"),
    ),
    (
        Verb::Update,
        Anchor::Before("core:setup_reflect_value"),
        Anchor::After("core:after_update"),
    ),
    (
        Verb::Delete,
        Anchor::Before("core:before_delete"),
        Anchor::After("core:after_delete"),
    ),
    (Verb::Row, Anchor::Before("core:row"), Anchor::After("core:row")),
    (Verb::Raw, Anchor::Before("core:raw"), Anchor::After("core:raw")),
];

/// The tracer could not be attached to a registry.
#[derive(Debug, Error)]
#[error("failed to register the {phase} trace callback for {verb} operations")]
pub struct AttachError {
    pub verb: Verb,
    pub phase: Phase,
    #[source]
    pub source: RegisterError,
}

/// State carried by an operation from its before callback to its after callback.
pub(crate) struct CallScratch {
    start_time: Instant,
    active_span: Option<tracing::Span>,
    caller_context: tracing::Span,
}

/// Emits a span, a log event and a metric observation per relational operation.
#[derive(Debug, Clone, Default)]
pub struct RelationalTracer {
    options: TraceOptions,
}

impl RelationalTracer {
    pub fn new(options: TraceOptions) -> Self {
        Self { options }
    }

    /// Registers the before and after callbacks for every verb.
    ///
    /// If any registration fails, the callbacks registered so far are removed
    /// again so the registry never holds half a pair.
    ///
    /// # Errors
    ///
    /// Returns the verb and phase whose registration failed.
    pub fn attach<R>(&self, registry: &mut R) -> Result<(), AttachError>
    where
        R: HookRegistry + ?Sized,
    {
        let tracer = Arc::new(self.clone());
        let mut registered: Vec<(Verb, &'static str)> = Vec::with_capacity(ANCHORS.len() * 2);

        for (verb, before, after) in ANCHORS {
            for (phase, anchor, name) in [
                (Phase::Before, before, BEFORE_CALLBACK),
                (Phase::After, after, AFTER_CALLBACK),
            ] {
                let tracer = Arc::clone(&tracer);
                let hook: Hook = match phase {
                    Phase::Before => Arc::new(move |op: &mut Operation| tracer.before(op)),
                    Phase::After => Arc::new(move |op: &mut Operation| tracer.after(op)),
                };

                if let Err(source) = registry.register(verb, anchor, name, hook) {
                    for (done_verb, done_name) in &registered {
                        registry.remove(*done_verb, done_name);
                    }
                    return Err(AttachError {
                        verb,
                        phase,
                        source,
                    });
                }
                registered.push((verb, name));
            }
        }

        tracing::debug!("relational trace callbacks registered");
        Ok(())
    }

    /// Before callback: records the start time and opens the operation span.
    pub fn before(&self, op: &mut Operation) {
        let start_time = Instant::now();
        let caller_context = op.context().clone();

        let active_span = self.options.tracing_enabled().then(|| {
            let verb = hint_verb_pre_execution(op.target_bound());
            let span = tracing::info_span!(
                parent: &caller_context,
                "db_operation",
                otel.name = %generate_span_name("db", verb.as_str()),
                otel.kind = "client",
                otel.status_code = Empty,
                otel.status_description = Empty,
                db.system = "sql",
                db.operation = %verb,
                db.table = op.table(),
                db.statement = Empty,
                db.duration_ms = Empty,
                error = Empty,
                error.message = Empty,
            );
            op.set_context(span.clone());
            span
        });

        op.scratch = Some(CallScratch {
            start_time,
            active_span,
            caller_context,
        });
    }

    /// After callback: closes the span and reports the finished operation.
    ///
    /// Does nothing if the before callback has not run for this operation.
    pub fn after(&self, op: &mut Operation) {
        let Some(scratch) = op.scratch.take() else {
            return;
        };

        let duration = scratch.start_time.elapsed();
        let operation = classify_verb_post_execution(op.sql(), op.target_bound());
        let status = OperationStatus::from_failed(op.error().is_some());
        let sql = render_statement(op.sql(), op.params());

        if let Some(span) = &scratch.active_span {
            span.record("db.statement", sql.as_str());
            span.record("db.operation", operation.as_str());
            span.record("db.duration_ms", duration_ms(duration));
            match op.error() {
                Some(err) => record_error_on_span(span, err),
                None => record_ok_on_span(span),
            }
        }

        op.context().in_scope(|| {
            tracing::info!(
                cost_ms = duration_ms(duration),
                sql = %sql,
                operation = %operation,
                status = %status,
                error = op.error().map(tracing::field::display),
                "SQL cost time"
            );
        });

        let metrics = self.options.metrics();
        if metrics.enabled() {
            metrics.observe(&Observation {
                store: Store::Relational,
                operation: operation.as_str(),
                status,
                duration,
            });
        }

        // the span closes once the operation no longer holds it
        op.set_context(scratch.caller_context);
    }
}
