//! Common utilities and types shared by the relational and cache tracers

pub mod classify;

use std::fmt;
use std::time::Duration;

pub use classify::{classify_verb_post_execution, hint_verb_pre_execution, VerbLabel};

/// Outcome label attached to log events and metric observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    Success,
    Error,
}

impl OperationStatus {
    /// `Error` when the wrapped operation reported an error, `Success` otherwise.
    pub fn from_failed(failed: bool) -> Self {
        if failed {
            OperationStatus::Error
        } else {
            OperationStatus::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts a duration to fractional milliseconds for `db.duration_ms` and `cost_ms`.
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Extracts the upper-cased name of a Redis command from its first argument.
///
/// Cursor arguments only appear in the SCAN family, so a leading cursor maps to
/// `"SCAN"`. A name that is not valid UTF-8 is logged and reported as `None`.
pub fn get_command_name(cmd: &redis::Cmd) -> Option<String> {
    let first_arg = cmd.args_iter().next()?;
    let arg_bytes = match first_arg {
        redis::Arg::Simple(bytes) => bytes,
        redis::Arg::Cursor => return Some("SCAN".to_string()),
    };

    match std::str::from_utf8(arg_bytes) {
        Ok(cmd_name) => Some(cmd_name.to_uppercase()),
        Err(_) => {
            tracing::warn!("Failed to parse Redis command name as UTF-8");
            None
        }
    }
}

/// Renders a Redis command as its arguments joined by single spaces.
///
/// Binary arguments are decoded lossily so the result is always printable.
pub fn format_command(cmd: &redis::Cmd) -> String {
    let mut out = String::new();
    for arg in cmd.args_iter() {
        if !out.is_empty() {
            out.push(' ');
        }
        match arg {
            redis::Arg::Simple(bytes) => out.push_str(&String::from_utf8_lossy(bytes)),
            redis::Arg::Cursor => out.push('0'),
        }
    }
    out
}

/// Builds a span name of the form `<prefix>.<operation>` with a lower-case operation.
///
/// ```rust
/// use otel_instrumentation_datastore::common::generate_span_name;
///
/// assert_eq!(generate_span_name("cache", "GET"), "cache.get");
/// assert_eq!(generate_span_name("db", "select"), "db.select");
/// ```
pub fn generate_span_name(prefix: &str, operation: &str) -> String {
    format!("{prefix}.{}", operation.to_lowercase())
}

/// Marks a span as successful.
pub fn record_ok_on_span(span: &tracing::Span) {
    span.record("otel.status_code", "OK");
}

/// Marks a span as failed and attaches the error message.
pub fn record_error_on_span(span: &tracing::Span, err: &dyn fmt::Display) {
    span.record("error", true);
    span.record("error.message", tracing::field::display(err));
    span.record("otel.status_code", "ERROR");
    span.record("otel.status_description", tracing::field::display(err));
}

/// Records the outcome of a Redis call on its span, including a coarse error category.
pub fn record_command_result<T>(span: &tracing::Span, result: &Result<T, redis::RedisError>) {
    match result {
        Ok(_) => record_ok_on_span(span),
        Err(err) => {
            record_error_on_span(span, err);
            span.record("error.type", redis_error_type(err));
        }
    }
}

/// Maps a Redis error kind onto the value recorded in `error.type`.
pub fn redis_error_type(err: &redis::RedisError) -> &'static str {
    match err.kind() {
        redis::ErrorKind::ResponseError => "response_error",
        redis::ErrorKind::AuthenticationFailed => "authentication_failed",
        redis::ErrorKind::TypeError => "type_error",
        redis::ErrorKind::ExecAbortError => "exec_abort_error",
        redis::ErrorKind::BusyLoadingError => "busy_loading_error",
        redis::ErrorKind::NoScriptError => "no_script_error",
        redis::ErrorKind::InvalidClientConfig => "invalid_client_config",
        redis::ErrorKind::Moved => "moved",
        redis::ErrorKind::Ask => "ask",
        redis::ErrorKind::TryAgain => "try_again",
        redis::ErrorKind::ClusterDown => "cluster_down",
        redis::ErrorKind::CrossSlot => "cross_slot",
        redis::ErrorKind::MasterDown => "master_down",
        redis::ErrorKind::IoError => "io_error",
        redis::ErrorKind::ClientError => "client_error",
        redis::ErrorKind::ExtensionError => "extension_error",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Cmd;

    #[test]
    fn test_get_command_name_uppercases() {
        let mut cmd = Cmd::new();
        cmd.arg("get").arg("test_key");
        assert_eq!(get_command_name(&cmd).as_deref(), Some("GET"));
    }

    #[test]
    fn test_get_command_name_empty_and_binary() {
        assert_eq!(get_command_name(&Cmd::new()), None);

        let mut cmd = Cmd::new();
        cmd.arg(vec![0u8, 159, 146, 150]);
        assert_eq!(get_command_name(&cmd), None);
    }

    #[test]
    fn test_format_command() {
        let mut cmd = Cmd::new();
        cmd.arg("SET").arg("user:1").arg(42);
        assert_eq!(format_command(&cmd), "SET user:1 42");
        assert_eq!(format_command(&Cmd::new()), "");
    }

    #[test]
    fn test_generate_span_name() {
        assert_eq!(generate_span_name("cache", "HGET"), "cache.hget");
        assert_eq!(generate_span_name("cache", "pipeline"), "cache.pipeline");
        assert_eq!(generate_span_name("db", "unknown"), "db.unknown");
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(OperationStatus::from_failed(true).as_str(), "error");
        assert_eq!(OperationStatus::from_failed(false).to_string(), "success");
    }

    #[test]
    fn test_redis_error_type() {
        let error = redis::RedisError::from((redis::ErrorKind::ResponseError, "Test error"));
        assert_eq!(redis_error_type(&error), "response_error");

        let error = redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        assert_eq!(redis_error_type(&error), "io_error");
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(duration_ms(Duration::from_micros(1500)), 1.5);
        assert_eq!(duration_ms(Duration::ZERO), 0.0);
    }
}
