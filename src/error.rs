//! Error types

use std::io;
use thiserror::Error;

/// Result type for pgbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Opening a connection failed; no wrapper was constructed
    #[error("unable to connect to Postgres at \"{target}\": {source}")]
    Connect {
        /// Attachment path, or the DSN when no path was given
        target: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A statement (or a statement inside a batch) failed. The message embeds
    /// the query text and the server's error text.
    #[error("{0}")]
    Query(String),

    /// A COPY handshake did not reach the expected status
    #[error("{0}")]
    Copy(String),

    /// Server error reported outside of a statement context
    #[error("server error: {0}")]
    Sql(String),

    /// Transport failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or unexpected protocol traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication rejected or unsupported
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Invalid configuration or connection string
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The connection was closed (locally or by the server)
    #[error("connection closed")]
    ConnectionClosed,

    /// A statement is already in progress on the raw connection
    #[error("connection busy: {0}")]
    ConnectionBusy(String),

    /// Invalid protocol state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state description
        expected: String,
        /// Actual state description
        actual: String,
    },

    /// A result value could not be read as the requested type
    #[error("decode error: {0}")]
    Decode(String),

    /// Connect timeout elapsed
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl Error {
    /// Whether this error means the session is no longer usable
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::Connect { .. } => true,
            Error::Protocol(_) => true,
            _ => false,
        }
    }
}
