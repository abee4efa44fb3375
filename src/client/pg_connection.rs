//! Shared connection wrapper and statement executors

use super::connection_string::{ConnectionInfo, TransportType};
use super::copy::CopyTransfer;
use crate::connection::{Connection, Transport};
use crate::logging::{elapsed_ms, QueryLogEvent, QueryLogger};
use crate::metrics::{counters, histograms, labels};
use crate::result::{PgResult, ResultStatus};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::Instrument;

static PRINT_QUERIES: AtomicBool = AtomicBool::new(false);

const CLOSED_MESSAGE: &str = "connection is closed";
const NO_RESPONSE_MESSAGE: &str = "no response from server";

/// Sole owner of one live session.
///
/// Dropping the handle closes the session: Terminate is sent from a task on
/// the current tokio runtime, or the socket is simply dropped when no runtime
/// is available.
#[derive(Debug, Default)]
pub struct OwnedConnection {
    connection: Option<Connection>,
}

impl OwnedConnection {
    /// Take ownership of a session that finished startup
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    /// Whether the session is still held
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// The held session
    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.connection.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Close the session now. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => {
                counters::connection_closed();
                connection.close().await
            }
            None => Ok(()),
        }
    }
}

impl Drop for OwnedConnection {
    fn drop(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        counters::connection_closed();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = connection.terminate().await {
                        tracing::debug!(error = %e, "graceful close failed");
                    }
                });
            }
            Err(_) => tracing::debug!("no tokio runtime, dropping session without Terminate"),
        }
    }
}

/// Clonable handle to one Postgres session.
///
/// Clones share the session and the lock that serializes statements on it.
/// The session is released when the last clone is closed or dropped.
/// `PgConnection::default()` is a closed wrapper, so
/// `std::mem::take(&mut conn)` moves a wrapper out and leaves the source
/// closed.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> pgbridge::Result<()> {
/// use pgbridge::{PgConnection, TracingQueryLogger};
///
/// let conn = PgConnection::open("postgres://localhost/mydb", "mydb").await?;
/// let result = conn.query(Some(&TracingQueryLogger), "SELECT 1").await?;
/// assert_eq!(result.get_int64(0, 0)?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct PgConnection {
    connection: Option<Arc<Mutex<OwnedConnection>>>,
    dsn: String,
}

impl PgConnection {
    /// Wrap a session that is already open. The DSN is left empty.
    pub fn new(connection: OwnedConnection) -> Self {
        Self {
            connection: Some(Arc::new(Mutex::new(connection))),
            dsn: String::new(),
        }
    }

    /// Connect to the server described by `dsn`.
    ///
    /// `attach_path` names the attachment in the error message; the DSN is
    /// used when it is empty.
    pub async fn open(dsn: &str, attach_path: &str) -> Result<Self> {
        let started = Instant::now();
        match connect(dsn).await {
            Ok(connection) => {
                counters::connection_opened(labels::STATUS_OK);
                histograms::connect_duration(started.elapsed().as_millis() as u64);
                let mut wrapper = Self::new(OwnedConnection::new(connection));
                wrapper.dsn = dsn.to_string();
                Ok(wrapper)
            }
            Err(e) => {
                counters::connection_opened(labels::STATUS_ERROR);
                let target = if attach_path.is_empty() {
                    dsn
                } else {
                    attach_path
                };
                Err(Error::Connect {
                    target: target.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Whether this wrapper still references a session
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Release this wrapper's reference. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.connection = None;
    }

    /// Connection string the wrapper was opened with
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Print every query to stdout before it is sent (process-wide)
    pub fn debug_set_print_queries(print: bool) {
        PRINT_QUERIES.store(print, Ordering::Relaxed);
    }

    /// Whether queries are printed before they are sent
    pub fn debug_print_queries() -> bool {
        PRINT_QUERIES.load(Ordering::Relaxed)
    }

    pub(crate) fn session(&self) -> Result<&Arc<Mutex<OwnedConnection>>> {
        self.connection.as_ref().ok_or(Error::ConnectionClosed)
    }

    /// Run one query and return its result, or the formatted failure message.
    ///
    /// A result counts as successful when its status is `CommandOk` or
    /// `TuplesOk`. The message has the form
    /// `Failed to execute query "<query>": <server error>`.
    ///
    /// One log event is emitted per statement sent, on success and failure
    /// alike. A closed wrapper sends nothing and so logs nothing.
    pub async fn try_query(
        &self,
        logger: Option<&dyn QueryLogger>,
        query: &str,
    ) -> std::result::Result<PgResult, String> {
        async {
            let session = self
                .session()
                .map_err(|_| query_failure(query, CLOSED_MESSAGE))?;
            let mut owned = session.lock().await;
            let connection = owned
                .connection()
                .map_err(|_| query_failure(query, CLOSED_MESSAGE))?;

            let response = exec_logged(connection, logger, query, labels::KIND_SINGLE).await;
            let outcome = match response {
                Ok(Some(result)) if result.status().is_success() => Ok(result),
                Ok(Some(result)) => Err(query_failure(query, &failure_detail(&result))),
                Ok(None) => Err(query_failure(query, NO_RESPONSE_MESSAGE)),
                Err(e) => Err(query_failure(query, &e.to_string())),
            };

            // a statement that left the session in COPY mode is unwound now
            if outcome.is_err() && connection.state().is_copy() {
                if let Err(e) = connection.discard_pending().await {
                    tracing::debug!(error = %e, "failed to leave COPY mode");
                }
            }

            let status = if outcome.is_ok() {
                labels::STATUS_OK
            } else {
                labels::STATUS_ERROR
            };
            counters::query_completed(labels::KIND_SINGLE, status);
            outcome
        }
        .instrument(tracing::debug_span!("query", query = %query))
        .await
    }

    /// Run one query; failure becomes [`Error::Query`]
    pub async fn query(&self, logger: Option<&dyn QueryLogger>, query: &str) -> Result<PgResult> {
        self.try_query(logger, query).await.map_err(Error::Query)
    }

    /// Run one query and discard its result
    pub async fn execute(&self, logger: Option<&dyn QueryLogger>, query: &str) -> Result<()> {
        self.query(logger, query).await.map(drop)
    }

    /// Run a multi-statement batch and collect the row sets it produced.
    ///
    /// All or nothing: if any statement fails, the remaining results are
    /// drained so the session stays usable and [`Error::Query`] is returned.
    /// Results without rows (`CommandOk`) are skipped. One log event covers
    /// the whole batch.
    pub async fn execute_queries(
        &self,
        logger: Option<&dyn QueryLogger>,
        queries: &str,
    ) -> Result<Vec<PgResult>> {
        async {
            let session = self.session()?;
            let mut owned = session.lock().await;
            let connection = owned.connection()?;

            print_query(queries);
            let started = Instant::now();
            let outcome = collect_batch(connection, queries).await;
            let duration_ms = elapsed_ms(started);

            if let Some(logger) = logger {
                logger.log_query(&QueryLogEvent::new(queries, duration_ms));
            }
            histograms::query_duration(labels::KIND_BATCH, duration_ms);
            let status = if outcome.is_ok() {
                labels::STATUS_OK
            } else {
                labels::STATUS_ERROR
            };
            counters::query_completed(labels::KIND_BATCH, status);
            outcome
        }
        .instrument(tracing::debug_span!("execute_queries", queries = %queries))
        .await
    }

    /// Start a COPY and hand back the transfer handle.
    ///
    /// The server must answer `query` with exactly the `expected` status
    /// (`CopyOut`, `CopyIn` or `CopyBoth`); anything else fails with
    /// [`Error::Copy`]. An `expected` status outside those three is rejected
    /// before anything is sent. The transfer keeps the session locked until
    /// it is finished or dropped.
    pub async fn begin_copy(
        &self,
        logger: Option<&dyn QueryLogger>,
        query: &str,
        expected: ResultStatus,
    ) -> Result<CopyTransfer> {
        async {
            if !expected.is_copy() {
                return Err(Error::Copy(copy_failure(
                    query,
                    &format!("{} is not a COPY status", expected),
                )));
            }
            let session = Arc::clone(self.session()?);
            let mut guard = session.lock_owned().await;

            let response = exec_logged(guard.connection()?, logger, query, labels::KIND_COPY).await;
            let failure = match response {
                Ok(Some(result)) if result.status() == expected => {
                    counters::copy_started(labels::STATUS_OK);
                    return Ok(CopyTransfer::new(guard, result));
                }
                Ok(Some(result)) => copy_failure(query, &failure_detail(&result)),
                Ok(None) => copy_failure(query, NO_RESPONSE_MESSAGE),
                Err(e) => copy_failure(query, &e.to_string()),
            };

            counters::copy_started(labels::STATUS_ERROR);
            if let Ok(connection) = guard.connection() {
                if connection.state().is_copy() {
                    if let Err(e) = connection.discard_pending().await {
                        tracing::debug!(error = %e, "failed to leave unexpected COPY mode");
                    }
                }
            }
            Err(Error::Copy(failure))
        }
        .instrument(tracing::debug_span!("begin_copy", query = %query, expected = %expected))
        .await
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Parse `dsn`, connect the transport and run startup
async fn connect(dsn: &str) -> Result<Connection> {
    let info = ConnectionInfo::parse(dsn)?;
    let config = info.to_config();
    let tls = info.to_tls_config()?;

    let establish = async {
        let transport = match info.transport {
            TransportType::Tcp => {
                let host = info
                    .host
                    .as_deref()
                    .ok_or_else(|| Error::Config("TCP connection requires a host".into()))?;
                Transport::connect_tcp(host, info.port).await?
            }
            TransportType::Unix => {
                let path = info.unix_socket.as_ref().ok_or_else(|| {
                    Error::Config("Unix socket connection requires a socket path".into())
                })?;
                Transport::connect_unix(path).await?
            }
        };

        let mut connection = Connection::new(transport);
        connection
            .startup(&config, tls.as_ref(), info.host.as_deref())
            .await?;
        Ok(connection)
    };

    match config.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, establish)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => establish.await,
    }
}

/// Send one query with optional printing, timing and logging
pub(crate) async fn exec_logged(
    connection: &mut Connection,
    logger: Option<&dyn QueryLogger>,
    query: &str,
    kind: &'static str,
) -> Result<Option<PgResult>> {
    print_query(query);
    let started = Instant::now();
    let response = connection.exec(query).await;
    let duration_ms = elapsed_ms(started);

    if let Some(logger) = logger {
        logger.log_query(&QueryLogEvent::new(query, duration_ms));
    }
    histograms::query_duration(kind, duration_ms);
    response
}

async fn collect_batch(connection: &mut Connection, queries: &str) -> Result<Vec<PgResult>> {
    connection
        .send_query(queries)
        .await
        .map_err(|e| Error::Query(query_failure(queries, &e.to_string())))?;

    let mut results = Vec::new();
    while let Some(result) = connection.next_result().await? {
        match result.status() {
            ResultStatus::TuplesOk => results.push(result),
            ResultStatus::CommandOk => {}
            _ => {
                let message = query_failure(queries, &failure_detail(&result));
                drop(result);
                if let Err(e) = connection.discard_pending().await {
                    tracing::debug!(error = %e, "failed to drain batch after error");
                }
                return Err(Error::Query(message));
            }
        }
    }
    Ok(results)
}

/// Server error text, or the unexpected status when the server sent none
fn failure_detail(result: &PgResult) -> String {
    let message = result.error_message();
    if message.is_empty() {
        format!("unexpected result status {}", result.status())
    } else {
        message
    }
}

fn print_query(query: &str) {
    if PRINT_QUERIES.load(Ordering::Relaxed) {
        println!("{}", query);
    }
}

fn query_failure(query: &str, detail: &str) -> String {
    format!("Failed to execute query \"{}\": {}", query, detail)
}

fn copy_failure(query: &str, detail: &str) -> String {
    format!("Failed to prepare COPY \"{}\": {}", query, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wrapper_is_closed() {
        let conn = PgConnection::default();
        assert!(!conn.is_open());
        assert_eq!(conn.dsn(), "");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut conn = PgConnection::new(OwnedConnection::default());
        assert!(conn.is_open());
        conn.close();
        conn.close();
        assert!(!conn.is_open());
    }

    #[test]
    fn test_take_moves_handle_and_dsn() {
        let mut source = PgConnection::new(OwnedConnection::default());
        source.dsn = "host=h".to_string();

        let moved = std::mem::take(&mut source);
        assert!(moved.is_open());
        assert_eq!(moved.dsn(), "host=h");
        assert!(!source.is_open());
        assert_eq!(source.dsn(), "");
    }

    #[test]
    fn test_clone_shares_session() {
        let conn = PgConnection::new(OwnedConnection::default());
        let other = conn.clone();
        assert!(Arc::ptr_eq(
            conn.session().unwrap(),
            other.session().unwrap()
        ));
    }

    #[tokio::test]
    async fn test_closed_wrapper_reports_query_failure() {
        let conn = PgConnection::default();
        let err = conn.try_query(None, "SELECT 1").await.unwrap_err();
        assert_eq!(err, "Failed to execute query \"SELECT 1\": connection is closed");

        let err = conn.execute(None, "SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(matches!(
            conn.execute_queries(None, "SELECT 1").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_empty_owned_connection_reports_closed() {
        let conn = PgConnection::new(OwnedConnection::default());
        let err = conn.try_query(None, "SELECT 1").await.unwrap_err();
        assert!(err.ends_with("connection is closed"));
    }

    #[test]
    fn test_owned_close_twice_without_runtime() {
        let mut owned = OwnedConnection::default();
        tokio_test::block_on(async {
            owned.close().await.unwrap();
            owned.close().await.unwrap();
        });
        assert!(!owned.is_open());
    }

    #[tokio::test]
    async fn test_open_failure_names_attach_path() {
        let err = PgConnection::open("host=127.0.0.1 port=1 connect_timeout=2", "my_attachment")
            .await
            .unwrap_err();
        match err {
            Error::Connect { target, .. } => assert_eq!(target, "my_attachment"),
            other => panic!("unexpected error: {other}"),
        }

        let err = PgConnection::open("postgres://127.0.0.1:1/db", "").await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("unable to connect to Postgres at \"postgres://127.0.0.1:1/db\""));
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            query_failure("SELEC 1", "ERROR:  syntax error"),
            "Failed to execute query \"SELEC 1\": ERROR:  syntax error"
        );
        assert_eq!(
            copy_failure("COPY t TO STDOUT", "boom"),
            "Failed to prepare COPY \"COPY t TO STDOUT\": boom"
        );
    }

    #[tokio::test]
    async fn test_begin_copy_rejects_non_copy_status() {
        for expected in [ResultStatus::CommandOk, ResultStatus::TuplesOk, ResultStatus::EmptyQuery] {
            let conn = PgConnection::new(OwnedConnection::default());
            match conn.begin_copy(None, "SELECT 1", expected).await {
                Err(Error::Copy(message)) => {
                    assert!(message.starts_with("Failed to prepare COPY \"SELECT 1\": "));
                    assert!(message.ends_with("is not a COPY status"));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn test_failure_detail_names_status() {
        let result = PgResult::empty_query();
        assert_eq!(
            failure_detail(&result),
            format!("unexpected result status {}", ResultStatus::EmptyQuery)
        );
    }

    #[test]
    fn test_debug_flag_round_trip() {
        let before = PgConnection::debug_print_queries();
        PgConnection::debug_set_print_queries(true);
        assert!(PgConnection::debug_print_queries());
        PgConnection::debug_set_print_queries(before);
    }
}
