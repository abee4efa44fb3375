//! Single-connection Postgres session management for host query engines.
//!
//! The crate owns one physical connection per [`PgConnection`], serializes
//! statements on it, runs single statements, multi-statement batches and
//! COPY handshakes over the simple query protocol, detects the server
//! variant, and reports every statement to an optional [`QueryLogger`].
//!
//! ```no_run
//! # async fn example() -> pgbridge::Result<()> {
//! use pgbridge::{PgConnection, ResultStatus, TracingQueryLogger};
//!
//! let conn = PgConnection::open("host=localhost dbname=sales", "sales").await?;
//! let logger = TracingQueryLogger;
//!
//! let rows = conn
//!     .execute_queries(Some(&logger), "SELECT 1; SELECT 'a', 'b'")
//!     .await?;
//! assert_eq!(rows.len(), 2);
//!
//! let copy = conn
//!     .begin_copy(Some(&logger), "COPY orders TO STDOUT (FORMAT binary)", ResultStatus::CopyOut)
//!     .await?;
//! let copied = copy.finish().await?;
//! println!("{} rows", copied);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod connection;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod result;

pub use client::{
    ConnectionInfo, CopyTransfer, IndexInfo, OwnedConnection, PgConnection, PgInstanceType,
    PgVersion,
};
pub use error::{Error, Result};
pub use logging::{QueryLogEvent, QueryLogger, TracingQueryLogger};
pub use result::{PgResult, ResultStatus};
