//! Connection management
//!
//! This module handles:
//! * Transport abstraction (TCP, TLS, Unix socket)
//! * Connection lifecycle (startup, auth, statement execution, COPY)
//! * State machine enforcement
//! * TLS configuration and support

mod config;
mod conn;
mod state;
mod tls;
mod transport;

pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use conn::Connection;
pub use state::ConnectionState;
pub use tls::{parse_server_name, SslMode, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
