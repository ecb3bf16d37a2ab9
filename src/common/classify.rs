//! Operation classification shared by the relational and cache tracers.
//!
//! Classification happens twice for a relational operation: once before it runs,
//! when only structural information is available, and once after, when the SQL
//! text has been built. The two phases are kept as separate functions so the
//! priority rules of each stay readable on their own.

use std::fmt;

/// The kind of data operation a span, log event or metric is labelled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerbLabel {
    Select,
    Insert,
    Update,
    Delete,
    /// A statement with a bound target table whose SQL is not yet known.
    Query,
    /// A batch of cache commands executed as one unit.
    Pipeline,
    /// Non-empty SQL that is not one of the four DML verbs (DDL, `WITH`, `SHOW`, ...).
    Other,
    Unknown,
}

impl VerbLabel {
    /// Returns the lower-case label used in span names, log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerbLabel::Select => "select",
            VerbLabel::Insert => "insert",
            VerbLabel::Update => "update",
            VerbLabel::Delete => "delete",
            VerbLabel::Query => "query",
            VerbLabel::Pipeline => "pipeline",
            VerbLabel::Other => "other",
            VerbLabel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VerbLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SQL_PREFIXES: [(&str, VerbLabel); 4] = [
    ("SELECT", VerbLabel::Select),
    ("INSERT", VerbLabel::Insert),
    ("UPDATE", VerbLabel::Update),
    ("DELETE", VerbLabel::Delete),
];

/// Best-effort label for an operation that has not executed yet.
///
/// The statement text is normally still empty at this point, so only the
/// presence of a bound target table is considered.
pub fn hint_verb_pre_execution(target_bound: bool) -> VerbLabel {
    if target_bound {
        VerbLabel::Query
    } else {
        VerbLabel::Unknown
    }
}

/// Authoritative label for an operation that has executed.
///
/// Non-empty SQL wins over any structural hint: the leading keyword is matched
/// case-insensitively against `SELECT`, `INSERT`, `UPDATE` and `DELETE`, and any
/// other statement is `other`. Without SQL the pre-execution rules apply.
pub fn classify_verb_post_execution(sql: &str, target_bound: bool) -> VerbLabel {
    let sql = sql.trim();
    if sql.is_empty() {
        return hint_verb_pre_execution(target_bound);
    }

    SQL_PREFIXES
        .iter()
        .find(|(prefix, _)| {
            sql.get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
        .map_or(VerbLabel::Other, |(_, verb)| *verb)
}
