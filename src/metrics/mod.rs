//! Metrics emitted through the `metrics` facade
//!
//! Nothing is recorded unless the host installs a recorder.

/// Label values
pub mod labels {
    /// Statement succeeded
    pub const STATUS_OK: &str = "ok";
    /// Statement failed
    pub const STATUS_ERROR: &str = "error";

    /// Single statement via `try_query`
    pub const KIND_SINGLE: &str = "single";
    /// Multi-result batch via `execute_queries`
    pub const KIND_BATCH: &str = "batch";
    /// COPY handshake via `begin_copy`
    pub const KIND_COPY: &str = "copy";

    /// Cleartext password authentication
    pub const MECHANISM_CLEARTEXT: &str = "cleartext";
    /// SCRAM-SHA-256 authentication
    pub const MECHANISM_SCRAM: &str = "scram-sha-256";
    /// Trust / no password exchange
    pub const MECHANISM_TRUST: &str = "trust";
}

/// Counters
pub mod counters {
    /// A statement finished
    pub fn query_completed(kind: &'static str, status: &'static str) {
        metrics::counter!("pgbridge_queries_total", "kind" => kind, "status" => status)
            .increment(1);
    }

    /// A connection was opened (or failed to open)
    pub fn connection_opened(status: &'static str) {
        metrics::counter!("pgbridge_connections_opened_total", "status" => status).increment(1);
    }

    /// A connection handle was released
    pub fn connection_closed() {
        metrics::counter!("pgbridge_connections_closed_total").increment(1);
    }

    /// A COPY handshake finished, reaching the expected status or not
    pub fn copy_started(status: &'static str) {
        metrics::counter!("pgbridge_copy_started_total", "status" => status).increment(1);
    }

    /// An abandoned COPY had to be unwound before the next statement
    pub fn copy_recovered() {
        metrics::counter!("pgbridge_copy_recovered_total").increment(1);
    }

    /// Authentication succeeded
    pub fn auth_successful(mechanism: &'static str) {
        metrics::counter!("pgbridge_auth_successful_total", "mechanism" => mechanism)
            .increment(1);
    }

    /// Authentication failed
    pub fn auth_failed(mechanism: &'static str) {
        metrics::counter!("pgbridge_auth_failed_total", "mechanism" => mechanism).increment(1);
    }
}

/// Histograms
pub mod histograms {
    /// Wall-clock duration of one logged statement or batch
    pub fn query_duration(kind: &'static str, duration_ms: i64) {
        metrics::histogram!("pgbridge_query_duration_ms", "kind" => kind)
            .record(duration_ms.max(0) as f64);
    }

    /// Time spent in startup and authentication
    pub fn connect_duration(duration_ms: u64) {
        metrics::histogram!("pgbridge_connect_duration_ms").record(duration_ms as f64);
    }
}
