//! Display-only substitution of bound parameters into SQL text.
//!
//! The output is meant for log lines and span attributes. It is never parsed
//! again and never sent to a database.

use std::fmt::{self, Write as _};

use chrono::{DateTime, NaiveDateTime, Utc};

const PLACEHOLDER: char = '?';
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl fmt::Display for SqlValue {
    /// Formats the value as a SQL literal.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(v) => write!(f, "{v}"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::UInt(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write_quoted(f, v),
            SqlValue::Bytes(v) => write_quoted(f, &String::from_utf8_lossy(v)),
            SqlValue::Timestamp(v) => write!(f, "'{}'", v.format(TIMESTAMP_FORMAT)),
            SqlValue::TimestampTz(v) => write!(f, "'{}'", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_char('\'')?;
    f.write_str(&text.replace('\'', "''"))?;
    f.write_char('\'')
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(value: $ty) -> Self {
                    SqlValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => UInt,
    u16 => UInt,
    u32 => UInt,
    u64 => UInt,
    f32 => Float,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// Replaces each `?` in `template`, left to right, with the next parameter.
///
/// Surplus parameters are ignored and surplus placeholders are kept as they
/// are. Without parameters the template is returned without being scanned.
///
/// ```rust
/// use otel_instrumentation_datastore::relational::{render_statement, SqlValue};
///
/// let sql = render_statement(
///     "SELECT * FROM t WHERE id=? AND name=?",
///     &[SqlValue::from(42i64), SqlValue::from("o'brien")],
/// );
/// assert_eq!(sql, "SELECT * FROM t WHERE id=42 AND name='o''brien'");
/// ```
pub fn render_statement(template: &str, params: &[SqlValue]) -> String {
    if params.is_empty() {
        return template.to_owned();
    }

    let mut out = String::with_capacity(template.len() + params.len() * 8);
    let mut params = params.iter();
    let mut rest = template;

    while let Some(pos) = rest.find(PLACEHOLDER) {
        let Some(param) = params.next() else {
            break;
        };
        out.push_str(&rest[..pos]);
        // writing into a String cannot fail
        let _ = write!(out, "{param}");
        rest = &rest[pos + PLACEHOLDER.len_utf8()..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;

    #[test]
    fn test_no_params_returns_template() {
        assert_eq!(render_statement("SELECT ? FROM t", &[]), "SELECT ? FROM t");
        assert_eq!(render_statement("", &[]), "");
    }

    #[test]
    fn test_quote_doubling_and_unquoted_numbers() {
        let sql = render_statement(
            "SELECT * FROM t WHERE id=? AND name=?",
            &[SqlValue::from(42i64), SqlValue::from("o'brien")],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE id=42 AND name='o''brien'");
    }

    #[test]
    fn test_null_and_float() {
        assert_eq!(
            render_statement("? ?", &[SqlValue::Null, SqlValue::from(3.5f64)]),
            "NULL 3.5"
        );
        assert_eq!(
            render_statement("?", &[SqlValue::from(None::<i64>)]),
            "NULL"
        );
    }

    #[test]
    fn test_bytes_are_quoted_as_text() {
        assert_eq!(
            render_statement("?", &[SqlValue::from(b"it's".as_slice())]),
            "'it''s'"
        );
        // invalid UTF-8 degrades instead of failing
        assert_eq!(
            render_statement("?", &[SqlValue::Bytes(vec![b'a', 0xff])]),
            "'a\u{fffd}'"
        );
    }

    #[test]
    fn test_timestamps_drop_fraction_and_zone() {
        let naive = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(13, 4, 5, 678_901)
            .unwrap();
        assert_eq!(
            render_statement("created_at > ?", &[SqlValue::from(naive)]),
            "created_at > '2024-02-29 13:04:05'"
        );

        let utc = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 58).unwrap();
        assert_eq!(render_statement("?", &[SqlValue::from(utc)]), "'2023-12-31 23:59:58'");
    }

    #[test]
    fn test_surplus_params_are_ignored() {
        assert_eq!(
            render_statement("id = ?", &[SqlValue::from(1i64), SqlValue::from(2i64)]),
            "id = 1"
        );
    }

    #[test]
    fn test_surplus_placeholders_are_kept() {
        assert_eq!(
            render_statement("a = ? AND b = ? AND c = ?", &[SqlValue::from(true)]),
            "a = true AND b = ? AND c = ?"
        );
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        assert_eq!(
            render_statement("? = ?", &[SqlValue::from("?"), SqlValue::from(7u8)]),
            "'?' = 7"
        );
    }

    #[test]
    fn test_multibyte_template() {
        assert_eq!(
            render_statement("name = ? -- ünïcode", &[SqlValue::from("zoë")]),
            "name = 'zoë' -- ünïcode"
        );
    }
}
