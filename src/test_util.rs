//! A span-recording subscriber for asserting on span lifecycles in tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

#[derive(Debug, Clone)]
pub(crate) struct SpanRecord {
    /// Position in creation order; stable even when the subscriber reuses ids.
    pub(crate) id: usize,
    pub(crate) parent: Option<usize>,
    pub(crate) name: &'static str,
    pub(crate) fields: HashMap<String, String>,
    pub(crate) closed: usize,
}

impl SpanRecord {
    pub(crate) fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Default)]
struct State {
    spans: Vec<SpanRecord>,
    live: HashMap<u64, usize>,
}

#[derive(Clone, Default)]
pub(crate) struct SpanRecorder {
    state: Arc<Mutex<State>>,
}

impl SpanRecorder {
    pub(crate) fn spans(&self) -> Vec<SpanRecord> {
        self.state.lock().unwrap().spans.clone()
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_owned(), value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_owned(), format!("{value:?}"));
    }
}

impl<S> Layer<S> for SpanRecorder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));

        let parent_id = if let Some(parent) = attrs.parent() {
            Some(parent.clone())
        } else if attrs.is_contextual() {
            ctx.current_span().id().cloned()
        } else {
            None
        };

        let mut state = self.state.lock().unwrap();
        let parent = parent_id.and_then(|parent| state.live.get(&parent.into_u64()).copied());
        let index = state.spans.len();
        state.spans.push(SpanRecord {
            id: index,
            parent,
            name: attrs.metadata().name(),
            fields,
            closed: 0,
        });
        state.live.insert(id.into_u64(), index);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.live.get(&id.into_u64()).copied() {
            values.record(&mut FieldVisitor(&mut state.spans[index].fields));
        }
    }

    fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.live.remove(&id.into_u64()) {
            state.spans[index].closed += 1;
        }
    }
}

/// Installs a recording subscriber as this thread's default until the guard drops.
#[cfg(feature = "aio")]
pub(crate) fn install_recorder() -> (SpanRecorder, tracing::subscriber::DefaultGuard) {
    let recorder = SpanRecorder::default();
    let guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder.clone()));
    (recorder, guard)
}

/// Runs `f` under a subscriber that records every span created on this thread.
pub(crate) fn record_spans<R>(f: impl FnOnce() -> R) -> (R, Vec<SpanRecord>) {
    let recorder = SpanRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, recorder.spans())
}
