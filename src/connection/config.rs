//! Startup configuration for a raw connection

use super::tls::SslMode;
use std::collections::HashMap;
use std::time::Duration;

/// Connection configuration
///
/// Stores connection parameters including database, credentials, and optional timeouts.
/// Use `ConnectionConfig::builder()` for advanced configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password (optional)
    pub password: Option<String>,
    /// Additional startup parameters sent verbatim
    pub params: HashMap<String, String>,
    /// Bound on transport connect plus startup and authentication
    pub connect_timeout: Option<Duration>,
    /// Server-side `statement_timeout`
    pub statement_timeout: Option<Duration>,
    /// Application name reported in `pg_stat_activity`
    pub application_name: Option<String>,
    /// Postgres extra_float_digits setting
    pub extra_float_digits: Option<i32>,
    /// SSL/TLS mode
    pub sslmode: SslMode,
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    ///
    /// Timeouts, application name and float digits are unset; `sslmode` is
    /// `disable`.
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self::builder(database, user).build()
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use pgbridge::connection::ConnectionConfig;
    /// use std::time::Duration;
    ///
    /// let config = ConnectionConfig::builder("mydb", "user")
    ///     .connect_timeout(Duration::from_secs(10))
    ///     .statement_timeout(Duration::from_secs(30))
    ///     .build();
    /// assert_eq!(config.database, "mydb");
    /// ```
    pub fn builder(
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                database: database.into(),
                user: user.into(),
                password: None,
                params: HashMap::new(),
                connect_timeout: None,
                statement_timeout: None,
                application_name: None,
                extra_float_digits: None,
                sslmode: SslMode::default(),
            },
        }
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add connection parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Parameters of the StartupMessage, in the order they are sent
    pub(crate) fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            ("database".to_string(), self.database.clone()),
            ("client_encoding".to_string(), "UTF8".to_string()),
        ];

        if let Some(ref app_name) = self.application_name {
            params.push(("application_name".to_string(), app_name.clone()));
        }
        if let Some(timeout) = self.statement_timeout {
            params.push((
                "statement_timeout".to_string(),
                timeout.as_millis().to_string(),
            ));
        }
        if let Some(digits) = self.extra_float_digits {
            params.push(("extra_float_digits".to_string(), digits.to_string()));
        }

        let mut extra: Vec<_> = self.params.iter().collect();
        extra.sort();
        params.extend(extra.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

/// Builder for creating `ConnectionConfig` with advanced options
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Add a connection parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.params.insert(key.into(), value.into());
        self
    }

    /// Bound transport connect plus startup. Default: none.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set the server-side statement timeout. Default: server setting.
    pub fn statement_timeout(mut self, duration: Duration) -> Self {
        self.config.statement_timeout = Some(duration);
        self
    }

    /// Set application name for Postgres logs
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = Some(name.into());
        self
    }

    /// Set extra_float_digits for float precision
    pub fn extra_float_digits(mut self, digits: i32) -> Self {
        self.config.extra_float_digits = Some(digits);
        self
    }

    /// Set SSL/TLS mode
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.config.sslmode = mode;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}
