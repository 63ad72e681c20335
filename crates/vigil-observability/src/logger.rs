//! Structured logging with field redaction
//!
//! This module provides:
//! - Global subscriber bootstrap (JSON output in production, pretty
//!   output everywhere else)
//! - A `StructuredLogger` that stamps every record with base context
//!   (environment, version, service name) and an ISO-8601 timestamp
//! - Recursive redaction of sensitive field names before any record
//!   leaves the logger
//!
//! Logging must never throw: subscriber installation failures and
//! malformed field payloads are swallowed, not propagated.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;
use vigil_core::Environment;

/// Replacement written over denylisted field values.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Field names whose values never leave the logger.
const REDACTED_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "authorization",
    "cookie",
    "apikey",
    "api_key",
];

/// Logger configuration, read once at process start.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level (trace, debug, info, warn, error)
    pub level: String,
    /// Deployment environment (selects JSON vs pretty output)
    pub environment: Environment,
    /// Service name stamped on every record
    pub service_name: String,
    /// Application version stamped on every record
    pub version: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            environment: Environment::default(),
            service_name: "vigil".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Safe to call more than once; a second installation attempt is a
/// no-op. The level is fixed for the process lifetime.
pub fn init_logging(config: &LoggerConfig) {
    let filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.environment.is_production() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if result.is_err() {
        tracing::debug!("Logging subscriber already installed");
    }
}

/// Record level accepted by [`StructuredLogger::log`].
///
/// `Fatal` has no `tracing` equivalent; it is emitted at error level
/// with a `severity=fatal` field, matching the original record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Leveled logger carrying base context, applying redaction to every
/// record before emission.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    base: Map<String, Value>,
}

impl StructuredLogger {
    pub fn new(config: &LoggerConfig) -> Self {
        let mut base = Map::new();
        base.insert("env".to_string(), Value::from(config.environment.as_str()));
        base.insert("version".to_string(), Value::from(config.version.clone()));
        base.insert(
            "service".to_string(),
            Value::from(config.service_name.clone()),
        );
        Self { base }
    }

    /// Emit one structured record: base context + redacted call-site
    /// fields + ISO-8601 timestamp.
    pub fn log(&self, level: LogLevel, fields: Value, message: &str) {
        let record = self.build_record(fields);
        match level {
            LogLevel::Trace => tracing::trace!(fields = %record, "{}", message),
            LogLevel::Debug => tracing::debug!(fields = %record, "{}", message),
            LogLevel::Info => tracing::info!(fields = %record, "{}", message),
            LogLevel::Warn => tracing::warn!(fields = %record, "{}", message),
            LogLevel::Error => tracing::error!(fields = %record, "{}", message),
            LogLevel::Fatal => {
                tracing::error!(severity = "fatal", fields = %record, "{}", message)
            }
        }
    }

    /// Log an error with its message and optional context fields.
    pub fn log_error(&self, error: &dyn std::fmt::Display, context: Value) {
        let message = error.to_string();
        let mut fields = match context {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("context".to_string(), other);
                map
            }
        };
        fields.insert(
            "err".to_string(),
            serde_json::json!({ "message": message }),
        );
        self.log(LogLevel::Error, Value::Object(fields), &message);
    }

    /// Log an operation duration, at warn level when it exceeds one
    /// second.
    pub fn log_performance(&self, operation: &str, duration_ms: u64, context: Value) {
        let mut fields = match context {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        fields.insert("operation".to_string(), Value::from(operation));
        fields.insert("durationMs".to_string(), Value::from(duration_ms));
        self.log(
            performance_level(duration_ms),
            Value::Object(fields),
            &format!("Operation {} completed in {}ms", operation, duration_ms),
        );
    }

    fn build_record(&self, fields: Value) -> Value {
        let mut record = self.base.clone();
        record.insert(
            "timestamp".to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        let mut fields = fields;
        redact_fields(&mut fields);
        if let Value::Object(map) = fields {
            for (key, value) in map {
                record.insert(key, value);
            }
        } else if !fields.is_null() {
            record.insert("fields".to_string(), fields);
        }
        Value::Object(record)
    }
}

/// Warn once an operation crosses one second, info below.
fn performance_level(duration_ms: u64) -> LogLevel {
    if duration_ms > 1000 {
        LogLevel::Warn
    } else {
        LogLevel::Info
    }
}

/// Replace values of denylisted field names with [`REDACTION_MARKER`],
/// recursively through nested objects and arrays.
pub fn redact_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_redacted_field(key) {
                    *entry = Value::from(REDACTION_MARKER);
                } else {
                    redact_fields(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_fields(item);
            }
        }
        _ => {}
    }
}

fn is_redacted_field(name: &str) -> bool {
    let lowered = name.to_lowercase();
    REDACTED_FIELDS.contains(&lowered.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_top_level_field() {
        let mut value = json!({"password": "hunter2", "user": "alice"});
        redact_fields(&mut value);
        assert_eq!(value["password"], REDACTION_MARKER);
        assert_eq!(value["user"], "alice");
    }

    #[test]
    fn test_redacts_nested_fields() {
        let mut value = json!({
            "request": {
                "headers": {
                    "authorization": "Bearer abc",
                    "cookie": "session=xyz"
                },
                "body": {"data": {"apiKey": "k-123"}}
            }
        });
        redact_fields(&mut value);
        assert_eq!(value["request"]["headers"]["authorization"], REDACTION_MARKER);
        assert_eq!(value["request"]["headers"]["cookie"], REDACTION_MARKER);
        assert_eq!(value["request"]["body"]["data"]["apiKey"], REDACTION_MARKER);
    }

    #[test]
    fn test_redacts_inside_arrays() {
        let mut value = json!({"items": [{"token": "t-1"}, {"token": "t-2"}]});
        redact_fields(&mut value);
        assert_eq!(value["items"][0]["token"], REDACTION_MARKER);
        assert_eq!(value["items"][1]["token"], REDACTION_MARKER);
    }

    #[test]
    fn test_redaction_is_case_insensitive() {
        let mut value = json!({"Password": "x", "API_KEY": "y", "Secret": "z"});
        redact_fields(&mut value);
        assert_eq!(value["Password"], REDACTION_MARKER);
        assert_eq!(value["API_KEY"], REDACTION_MARKER);
        assert_eq!(value["Secret"], REDACTION_MARKER);
    }

    #[test]
    fn test_non_denylisted_values_untouched() {
        let mut value = json!({"tokens_used": 42, "description": "secret garden"});
        redact_fields(&mut value);
        assert_eq!(value["tokens_used"], 42);
        assert_eq!(value["description"], "secret garden");
    }

    #[test]
    fn test_build_record_contains_base_context() {
        let config = LoggerConfig {
            level: "debug".to_string(),
            environment: Environment::Development,
            service_name: "vigil-test".to_string(),
            version: "1.2.3".to_string(),
        };
        let logger = StructuredLogger::new(&config);
        let record = logger.build_record(json!({"operation": "probe", "secret": "s"}));
        assert_eq!(record["env"], "development");
        assert_eq!(record["version"], "1.2.3");
        assert_eq!(record["service"], "vigil-test");
        assert_eq!(record["operation"], "probe");
        assert_eq!(record["secret"], REDACTION_MARKER);
        assert!(record["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_performance_level_switches_at_one_second() {
        assert_eq!(performance_level(0), LogLevel::Info);
        assert_eq!(performance_level(1000), LogLevel::Info);
        assert_eq!(performance_level(1001), LogLevel::Warn);
    }

    #[test]
    fn test_performance_and_error_helpers_never_panic() {
        let logger = StructuredLogger::new(&LoggerConfig::default());
        logger.log_performance("fast-op", 5, json!({"route": "/api/health"}));
        logger.log_performance("slow-op", 1500, Value::Null);
        logger.log_error(&"probe failed", json!({"component": "health"}));
        logger.log_error(&"bare error", Value::Null);
    }

    #[test]
    fn test_log_never_panics_on_scalar_fields() {
        let logger = StructuredLogger::new(&LoggerConfig::default());
        logger.log(LogLevel::Info, json!("just a string"), "scalar fields");
        logger.log(LogLevel::Fatal, Value::Null, "null fields");
    }
}
