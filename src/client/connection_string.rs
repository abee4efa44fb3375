//! Connection string parsing
//!
//! Supports formats:
//! * postgres://[user[:password]@][host][:port][/database][?param=value&...]
//! * postgres:///database (Unix socket, local)
//! * postgres:///database?host=/path/to/socket (Unix socket, custom directory)
//! * host=localhost port=5432 dbname=mydb user=me password='secret value'
//!
//! Recognized parameters: `host`, `port`, `dbname`, `user`, `password`,
//! `sslmode`, `sslrootcert`, `connect_timeout` (seconds), `application_name`
//! and `options`. Other parameters are ignored.

use crate::connection::{ConnectionConfig, SslMode, TlsConfig};
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PORT: u16 = 5432;

/// Parsed connection info
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Transport type
    pub transport: TransportType,
    /// Host (for TCP)
    pub host: Option<String>,
    /// Port; also selects the Unix socket file
    pub port: u16,
    /// Unix socket path
    pub unix_socket: Option<PathBuf>,
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password
    pub password: Option<String>,
    /// SSL/TLS mode
    pub sslmode: SslMode,
    /// Path to custom CA certificate (from sslrootcert param)
    pub sslrootcert: Option<String>,
    /// Bound on connect plus startup
    pub connect_timeout: Option<Duration>,
    /// Reported as `application_name`
    pub application_name: Option<String>,
    /// Command-line options sent to the server (`options` startup parameter)
    pub options: Option<String>,
}

/// Transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// TCP socket
    Tcp,
    /// Unix domain socket
    Unix,
}

/// Resolve the default Unix socket directory
fn resolve_default_socket_dir() -> Option<String> {
    for dir in &["/run/postgresql", "/var/run/postgresql", "/tmp"] {
        if Path::new(dir).is_dir() {
            return Some(dir.to_string());
        }
    }
    None
}

/// Construct the full Unix socket path
fn construct_socket_path(socket_dir: &str, port: u16) -> PathBuf {
    PathBuf::from(format!("{}/.s.PGSQL.{}", socket_dir, port))
}

/// Decode `%XX` escapes in a URL component
fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| Error::Config(format!("invalid percent-encoding in '{}'", s)))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| Error::Config(format!("percent-decoded value is not UTF-8: '{}'", s)))
}

/// Split a URL connection string into libpq keywords
fn url_params(rest: &str) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();

    let (rest, query_string) = rest.split_once('?').unwrap_or((rest, ""));

    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (rest, ""),
    };

    let (auth, host_port) = match authority.rfind('@') {
        Some(pos) => (Some(&authority[..pos]), &authority[pos + 1..]),
        None => (None, authority),
    };

    if let Some(auth) = auth {
        let (user, password) = match auth.split_once(':') {
            Some((user, password)) => (user, Some(password)),
            None => (auth, None),
        };
        if !user.is_empty() {
            params.insert("user".to_string(), percent_decode(user)?);
        }
        if let Some(password) = password {
            params.insert("password".to_string(), percent_decode(password)?);
        }
    }

    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        // IPv6 literal: [::1]:5432
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| Error::Config("unterminated IPv6 address in connection string".into()))?;
        (host, after.strip_prefix(':'))
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };
    if !host.is_empty() {
        params.insert("host".to_string(), percent_decode(host)?);
    }
    if let Some(port) = port.filter(|p| !p.is_empty()) {
        params.insert("port".to_string(), port.to_string());
    }
    if !path.is_empty() {
        params.insert("dbname".to_string(), percent_decode(path)?);
    }

    for pair in query_string.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            Error::Config(format!("missing '=' after '{}' in connection string", pair))
        })?;
        params.insert(percent_decode(key)?, percent_decode(value)?);
    }

    Ok(params)
}

/// Split a `key=value key='quoted value'` connection string into keywords
fn keyword_params(s: &str) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    let mut chars = s.chars().peekable();

    loop {
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(Error::Config(format!(
                "missing \"=\" after \"{}\" in connection string",
                key
            )));
        }
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => break,
                    },
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::Config(
                            "unterminated quoted string in connection string".into(),
                        ))
                    }
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                chars.next();
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
        }

        params.insert(key, value);
    }

    Ok(params)
}

impl ConnectionInfo {
    /// Parse connection string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let params = match s
            .strip_prefix("postgres://")
            .or_else(|| s.strip_prefix("postgresql://"))
        {
            Some(rest) => url_params(rest)?,
            None if s.contains("://") => {
                return Err(Error::Config(
                    "connection string must start with postgres:// or postgresql://".into(),
                ));
            }
            None => keyword_params(s)?,
        };
        Self::from_params(params)
    }

    fn from_params(mut params: HashMap<String, String>) -> Result<Self> {
        let port = match params.remove("port") {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port: '{}'", p)))?,
            None => DEFAULT_PORT,
        };

        let user = params
            .remove("user")
            .filter(|u| !u.is_empty())
            .unwrap_or_else(whoami::username);
        let database = params
            .remove("dbname")
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| user.clone());

        let sslmode = match params.remove("sslmode") {
            Some(mode) => mode.parse()?,
            None => SslMode::default(),
        };

        let connect_timeout = match params.remove("connect_timeout") {
            Some(secs) => {
                let secs: i64 = secs.trim().parse().map_err(|_| {
                    Error::Config(format!("invalid connect_timeout: '{}'", secs))
                })?;
                // zero or negative means wait forever
                (secs > 0).then(|| Duration::from_secs(secs as u64))
            }
            None => None,
        };

        let host = params.remove("host").filter(|h| !h.is_empty());
        let (transport, host, unix_socket, sslmode) = match host {
            Some(host) if !host.starts_with('/') => (TransportType::Tcp, Some(host), None, sslmode),
            custom_dir => {
                let socket_dir = match custom_dir {
                    Some(dir) => dir,
                    None => resolve_default_socket_dir().ok_or_else(|| {
                        Error::Config(
                            "could not locate Unix socket directory. Set host explicitly.".into(),
                        )
                    })?,
                };
                // TLS is never negotiated over Unix sockets
                (
                    TransportType::Unix,
                    None,
                    Some(construct_socket_path(&socket_dir, port)),
                    SslMode::Disable,
                )
            }
        };

        let info = Self {
            transport,
            host,
            port,
            unix_socket,
            database,
            user,
            password: params.remove("password"),
            sslmode,
            sslrootcert: params.remove("sslrootcert"),
            connect_timeout,
            application_name: params.remove("application_name"),
            options: params.remove("options"),
        };

        for key in params.keys() {
            tracing::debug!(parameter = %key, "ignoring unsupported connection parameter");
        }

        Ok(info)
    }

    /// Build a `TlsConfig` from parsed connection parameters.
    ///
    /// Returns `None` if `sslmode` is `Disable`.
    pub fn to_tls_config(&self) -> Result<Option<TlsConfig>> {
        if self.sslmode == SslMode::Disable {
            return Ok(None);
        }
        TlsConfig::for_mode(self.sslmode, self.sslrootcert.as_deref()).map(Some)
    }

    /// Convert to ConnectionConfig
    pub fn to_config(&self) -> ConnectionConfig {
        let mut builder =
            ConnectionConfig::builder(&self.database, &self.user).sslmode(self.sslmode);
        if let Some(ref password) = self.password {
            builder = builder.password(password);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(ref name) = self.application_name {
            builder = builder.application_name(name);
        }
        if let Some(ref options) = self.options {
            builder = builder.param("options", options);
        }
        builder.build()
    }
}
