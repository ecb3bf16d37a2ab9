//! The callback chain a relational access layer runs for every operation.
//!
//! Each [`Verb`] owns an ordered chain of named steps. The host's own steps
//! (`core:*`) mark the points other callbacks are positioned against, and one of
//! them executes the statement. Callbacks are inserted relative to an existing
//! step with an [`Anchor`] and must have a unique name within their chain.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::render::SqlValue;
use super::CallScratch;

/// Error produced by the statement executor and reported back to the caller.
pub type DbError = Box<dyn std::error::Error + Send + Sync>;

/// A registered callback.
pub type Hook = Arc<dyn Fn(&mut Operation) + Send + Sync>;

/// The kind of operation a chain runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Query,
    Update,
    Delete,
    Row,
    Raw,
}

impl Verb {
    pub const ALL: [Verb; 6] = [
        Verb::Create,
        Verb::Query,
        Verb::Update,
        Verb::Delete,
        Verb::Row,
        Verb::Raw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Query => "query",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Row => "row",
            Verb::Raw => "raw",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a callback runs ahead of or behind the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Before => f.write_str("before"),
            Phase::After => f.write_str("after"),
        }
    }
}

/// Insertion point of a new callback, relative to an existing named step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Before(&'static str),
    After(&'static str),
}

impl Anchor {
    pub fn name(&self) -> &'static str {
        match self {
            Anchor::Before(name) | Anchor::After(name) => name,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("a callback named `{0}` is already registered")]
    DuplicateName(String),
    #[error("no step named `{0}` to register against")]
    MissingAnchor(String),
}

/// Registration surface of a relational lifecycle host.
pub trait HookRegistry {
    /// Inserts `hook` into the chain of `verb` at `anchor` under `name`.
    ///
    /// # Errors
    ///
    /// Fails when `name` is already taken in that chain or the anchor step does
    /// not exist. The chain is left unchanged in both cases.
    fn register(
        &mut self,
        verb: Verb,
        anchor: Anchor,
        name: &'static str,
        hook: Hook,
    ) -> Result<(), RegisterError>;

    /// Removes the callback `name` from the chain of `verb`, returning whether it existed.
    fn remove(&mut self, verb: Verb, name: &str) -> bool;
}

/// Everything the callbacks can see about one in-flight operation.
///
/// The SQL text and bound parameters are filled in by the executor, so hooks
/// that run before the statement usually see them empty. The terminal error is
/// only meaningful once the executor has run.
pub struct Operation {
    verb: Verb,
    table: Option<String>,
    unreflected_table: Option<String>,
    sql: String,
    params: Vec<SqlValue>,
    error: Option<DbError>,
    context: tracing::Span,
    pub(crate) scratch: Option<CallScratch>,
}

impl Operation {
    /// A new operation running in the caller's current span.
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            table: None,
            unreflected_table: None,
            sql: String::new(),
            params: Vec::new(),
            error: None,
            context: tracing::Span::current(),
            scratch: None,
        }
    }

    /// Sets the table the operation targets.
    ///
    /// Updates only bind their target once the chain reflects the updated value
    /// (`core:setup_reflect_value`); until then [`Operation::target_bound`] is false.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        match self.verb {
            Verb::Update => self.unreflected_table = Some(table),
            _ => self.table = Some(table),
        }
        self
    }

    /// Sets statement text known up front, as raw and row operations have.
    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        self.set_sql(sql, params);
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Whether a target table is bound to the statement.
    pub fn target_bound(&self) -> bool {
        self.table.is_some()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Replaces the statement text and its bound parameters.
    pub fn set_sql(&mut self, sql: impl Into<String>, params: Vec<SqlValue>) {
        self.sql = sql.into();
        self.params = params;
    }

    pub fn error(&self) -> Option<&DbError> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: DbError) {
        self.error = Some(error);
    }

    /// The span the operation executes in.
    pub fn context(&self) -> &tracing::Span {
        &self.context
    }

    pub fn set_context(&mut self, context: tracing::Span) {
        self.context = context;
    }

    fn reflect_target(&mut self) {
        if let Some(table) = self.unreflected_table.take() {
            self.table = Some(table);
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("verb", &self.verb)
            .field("table", &self.table)
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
enum Step {
    /// A fixed point in the chain that does nothing itself.
    Marker,
    /// Binds a pending update target.
    ReflectTarget,
    /// Runs the executor.
    Execute,
    Callback(Hook),
}

#[derive(Clone)]
struct NamedStep {
    name: &'static str,
    step: Step,
}

impl NamedStep {
    const fn new(name: &'static str, step: Step) -> Self {
        Self { name, step }
    }
}

fn default_chain(verb: Verb) -> Vec<NamedStep> {
    match verb {
        Verb::Create => vec![
            NamedStep::new("core:before_create", Step::Marker),
            NamedStep::new("core:create", Step::Execute),
            NamedStep::new("core:after_create", Step::Marker),
        ],
        Verb::Query => vec![
            NamedStep::new("core:query", Step::Execute),
            NamedStep::new("core:after_query", Step::Marker),
        ],
        Verb::Update => vec![
            NamedStep::new("core:setup_reflect_value", Step::ReflectTarget),
            NamedStep::new("core:before_update", Step::Marker),
            NamedStep::new("core:update", Step::Execute),
            NamedStep::new("core:after_update", Step::Marker),
        ],
        Verb::Delete => vec![
            NamedStep::new("core:before_delete", Step::Marker),
            NamedStep::new("core:delete", Step::Execute),
            NamedStep::new("core:after_delete", Step::Marker),
        ],
        Verb::Row => vec![NamedStep::new("core:row", Step::Execute)],
        Verb::Raw => vec![NamedStep::new("core:raw", Step::Execute)],
    }
}

/// The callback chains of a relational handle.
#[derive(Clone)]
pub struct Callbacks {
    chains: HashMap<Verb, Vec<NamedStep>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self {
            chains: Verb::ALL
                .iter()
                .map(|verb| (*verb, default_chain(*verb)))
                .collect(),
        }
    }

    /// Step names of the chain for `verb`, in execution order.
    pub fn step_names(&self, verb: Verb) -> Vec<&'static str> {
        self.chains
            .get(&verb)
            .map(|chain| chain.iter().map(|step| step.name).collect())
            .unwrap_or_default()
    }

    /// Runs the chain for `op.verb()`, with `exec` as the statement executor.
    ///
    /// `exec` runs inside the operation's span. An error it returns is stored on
    /// the operation, the remaining steps still run, and the error is then
    /// handed back unchanged.
    ///
    /// # Errors
    ///
    /// Returns exactly the error produced by `exec`.
    pub fn execute<F>(&self, op: &mut Operation, exec: F) -> Result<(), DbError>
    where
        F: FnOnce(&mut Operation) -> Result<(), DbError>,
    {
        let mut exec = Some(exec);
        for named in self.chains.get(&op.verb()).into_iter().flatten() {
            match &named.step {
                Step::Marker => {}
                Step::ReflectTarget => op.reflect_target(),
                Step::Execute => {
                    if let Some(exec) = exec.take() {
                        let context = op.context().clone();
                        if let Err(err) = context.in_scope(|| exec(op)) {
                            op.set_error(err);
                        }
                    }
                }
                Step::Callback(hook) => hook(op),
            }
        }

        match op.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for verb in Verb::ALL {
            map.entry(&verb, &self.step_names(verb));
        }
        map.finish()
    }
}

impl HookRegistry for Callbacks {
    fn register(
        &mut self,
        verb: Verb,
        anchor: Anchor,
        name: &'static str,
        hook: Hook,
    ) -> Result<(), RegisterError> {
        let chain = self.chains.entry(verb).or_default();
        if chain.iter().any(|step| step.name == name) {
            return Err(RegisterError::DuplicateName(name.to_owned()));
        }

        let position = chain
            .iter()
            .position(|step| step.name == anchor.name())
            .ok_or_else(|| RegisterError::MissingAnchor(anchor.name().to_owned()))?;
        let index = match anchor {
            Anchor::Before(_) => position,
            Anchor::After(_) => position + 1,
        };

        chain.insert(index, NamedStep::new(name, Step::Callback(hook)));
        Ok(())
    }

    fn remove(&mut self, verb: Verb, name: &str) -> bool {
        let Some(chain) = self.chains.get_mut(&verb) else {
            return false;
        };
        let before = chain.len();
        chain.retain(|step| !matches!(step.step, Step::Callback(_)) || step.name != name);
        chain.len() != before
    }
}
