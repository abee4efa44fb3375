//! Session-level API
//!
//! [`PgConnection`] is the handle a host query engine keeps per attached
//! database. It serializes statements on one physical session and layers
//! logging, error formatting and COPY handshakes over the raw
//! [`Connection`](crate::connection::Connection).

mod connection_string;
mod copy;
mod index;
mod pg_connection;
mod version;

pub use connection_string::{ConnectionInfo, TransportType};
pub use copy::CopyTransfer;
pub use index::IndexInfo;
pub use pg_connection::{OwnedConnection, PgConnection};
pub use version::{PgInstanceType, PgVersion};
