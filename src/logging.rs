//! Query log events
//!
//! Every statement sent through [`PgConnection`](crate::PgConnection) with a
//! logger attached produces one [`QueryLogEvent`] carrying the query text and
//! its wall-clock duration. Loggers are plain trait objects; the default
//! [`TracingQueryLogger`] forwards events to `tracing` under the target
//! [`QueryLogEvent::NAME`].

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Column type of a field in the query log schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFieldType {
    /// Variable-length text
    Varchar,
    /// 64-bit signed integer
    BigInt,
}

/// One field of the query log schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogField {
    /// Field name as it appears in the rendered message
    pub name: &'static str,
    /// Field type
    pub kind: LogFieldType,
}

/// A statement that was sent to the server and how long it took
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLogEvent {
    query: String,
    duration_ms: i64,
}

impl QueryLogEvent {
    /// Event name, also used as the `tracing` target
    pub const NAME: &'static str = "PostgresQueryLog";

    /// Level at which query events are emitted
    pub const LEVEL: tracing::Level = tracing::Level::DEBUG;

    const SCHEMA: [LogField; 2] = [
        LogField {
            name: "query",
            kind: LogFieldType::Varchar,
        },
        LogField {
            name: "duration_ms",
            kind: LogFieldType::BigInt,
        },
    ];

    /// New event; negative durations are clamped to zero
    pub fn new(query: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            query: query.into(),
            duration_ms: duration_ms.max(0),
        }
    }

    /// Query text exactly as sent
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Elapsed milliseconds from send to completion
    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Fields of the rendered message
    pub fn log_type() -> &'static [LogField] {
        &Self::SCHEMA
    }

    /// Render as a JSON object: `{"query":"...","duration_ms":N}`
    pub fn construct_log_message(&self) -> String {
        serde_json::json!({
            "query": self.query,
            "duration_ms": self.duration_ms,
        })
        .to_string()
    }
}

/// Sink for query log events
pub trait QueryLogger: Send + Sync {
    /// Record one event
    fn log_query(&self, event: &QueryLogEvent);
}

impl<F> QueryLogger for F
where
    F: Fn(&QueryLogEvent) + Send + Sync,
{
    fn log_query(&self, event: &QueryLogEvent) {
        self(event)
    }
}

/// Emits each event as a `tracing` debug event with target `PostgresQueryLog`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingQueryLogger;

impl QueryLogger for TracingQueryLogger {
    fn log_query(&self, event: &QueryLogEvent) {
        tracing::debug!(
            target: "PostgresQueryLog",
            query = %event.query,
            duration_ms = event.duration_ms,
            "{}",
            event.construct_log_message()
        );
    }
}

/// Milliseconds elapsed since `start`
pub(crate) fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_log_message_is_json() {
        let event = QueryLogEvent::new("SELECT \"a\" FROM t", 12);
        let parsed: serde_json::Value =
            serde_json::from_str(&event.construct_log_message()).unwrap();
        assert_eq!(parsed["query"], "SELECT \"a\" FROM t");
        assert_eq!(parsed["duration_ms"], 12);
    }

    #[test]
    fn test_event_round_trips_through_serde() {
        let event = QueryLogEvent::new("SELECT 1", 3);
        let back: QueryLogEvent =
            serde_json::from_str(&event.construct_log_message()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_negative_duration_clamped() {
        assert_eq!(QueryLogEvent::new("q", -5).duration_ms(), 0);
    }

    #[test]
    fn test_schema() {
        let schema = QueryLogEvent::log_type();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema[0].name, "query");
        assert_eq!(schema[0].kind, LogFieldType::Varchar);
        assert_eq!(schema[1].name, "duration_ms");
        assert_eq!(schema[1].kind, LogFieldType::BigInt);
        assert_eq!(QueryLogEvent::NAME, "PostgresQueryLog");
        assert_eq!(QueryLogEvent::LEVEL, tracing::Level::DEBUG);
    }

    #[test]
    fn test_closure_logger() {
        let seen = Mutex::new(Vec::new());
        let logger = |event: &QueryLogEvent| seen.lock().unwrap().push(event.clone());
        logger.log_query(&QueryLogEvent::new("SELECT 1", 1));
        TracingQueryLogger.log_query(&QueryLogEvent::new("SELECT 2", 2));
        assert_eq!(seen.lock().unwrap()[0].query(), "SELECT 1");
    }

    #[test]
    fn test_elapsed_ms_non_negative() {
        assert!(elapsed_ms(Instant::now()) >= 0);
    }
}
