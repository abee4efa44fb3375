//! Core connection type

use super::config::ConnectionConfig;
use super::state::ConnectionState;
use super::tls::{SslMode, TlsConfig};
use super::transport::Transport;
use crate::auth::{ScramClient, SCRAM_SHA_256};
use crate::metrics::{counters, labels};
use crate::protocol::constants::{tx_status, PROTOCOL_VERSION};
use crate::protocol::{
    decode_message, encode_message, AuthenticationMessage, BackendMessage, FieldDescription,
    FrontendMessage,
};
use crate::result::{PgResult, ResultStatus};
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use tracing::Instrument;

/// Postgres connection
///
/// Speaks the simple query protocol. A query string may hold several
/// statements; each statement yields one [`PgResult`] from
/// [`next_result`](Self::next_result) until the server reports it is ready
/// again. Statements that switch the server into COPY mode hand control to
/// the copy methods until the copy is finished or abandoned.
pub struct Connection {
    transport: Option<Transport>,
    state: ConnectionState,
    read_buf: BytesMut,
    process_id: Option<i32>,
    secret_key: Option<i32>,
    parameters: HashMap<String, String>,
    transaction_status: u8,
    pending: Option<PgResult>,
    write_in_flight: bool,
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            process_id: None,
            secret_key: None,
            parameters: HashMap::new(),
            transaction_status: tx_status::IDLE,
            pending: None,
            write_in_flight: false,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the session is gone (closed locally, by the server, after a
    /// transport failure, or after a message was cut off mid-write)
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed || self.write_in_flight
    }

    /// Whether the transport is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().map_or(false, Transport::is_tls)
    }

    /// Backend process id reported at startup
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// Latest value of a server-reported parameter such as `server_version`
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Transaction status byte from the last ReadyForQuery (`I`, `T` or `E`)
    pub fn transaction_status(&self) -> u8 {
        self.transaction_status
    }

    /// Negotiate TLS upgrade with the server via the SSLRequest protocol.
    ///
    /// Returns `false` when the server declined and `sslmode` allows
    /// continuing in plaintext.
    async fn negotiate_tls(
        &mut self,
        tls_config: &TlsConfig,
        hostname: &str,
        sslmode: SslMode,
    ) -> Result<bool> {
        self.state.transition(ConnectionState::NegotiatingTls)?;
        self.send_message(&FrontendMessage::SslRequest).await?;

        // Single-byte response: S = proceed with TLS, N = reject
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        let n = transport.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        let response = self.read_buf[0];
        self.read_buf.advance(1);

        match response {
            b'S' => {
                if !self.read_buf.is_empty() {
                    return Err(Error::Protocol(
                        "received unencrypted data after SSL response".into(),
                    ));
                }
                tracing::debug!("server accepted TLS, upgrading connection");
                let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                self.transport = Some(transport.upgrade_to_tls(tls_config, hostname).await?);
                tracing::info!("TLS connection established");
                Ok(true)
            }
            b'N' if !sslmode.requires_tls() => {
                tracing::debug!("server rejected TLS, continuing without encryption");
                Ok(false)
            }
            b'N' => Err(Error::Config(format!(
                "server does not support TLS (sslmode={})",
                sslmode
            ))),
            other => Err(Error::Protocol(format!(
                "unexpected SSLRequest response byte: 0x{:02X}",
                other
            ))),
        }
    }

    /// Perform startup and authentication
    pub async fn startup(
        &mut self,
        config: &ConnectionConfig,
        tls_config: Option<&TlsConfig>,
        hostname: Option<&str>,
    ) -> Result<()> {
        async {
            if config.sslmode != SslMode::Disable {
                let tls = tls_config.ok_or_else(|| {
                    Error::Config(format!(
                        "sslmode={} requires TlsConfig but none was provided",
                        config.sslmode
                    ))
                })?;
                let host = hostname
                    .ok_or_else(|| Error::Config("TLS negotiation requires a hostname".into()))?;
                self.negotiate_tls(tls, host, config.sslmode).await?;
            }

            self.state.transition(ConnectionState::AwaitingAuth)?;

            let startup = FrontendMessage::Startup {
                version: PROTOCOL_VERSION,
                params: config.startup_params(),
            };
            self.send_message(&startup).await?;

            self.state.transition(ConnectionState::Authenticating)?;
            self.authenticate(config).await?;

            self.state.transition(ConnectionState::Idle)?;
            tracing::info!(pid = ?self.process_id, "startup complete");
            Ok(())
        }
        .instrument(tracing::info_span!(
            "startup",
            user = %config.user,
            database = %config.database
        ))
        .await
    }

    /// Handle authentication
    async fn authenticate(&mut self, config: &ConnectionConfig) -> Result<()> {
        let mut mechanism = labels::MECHANISM_TRUST;

        loop {
            let msg = self.receive_message().await?;

            match msg {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        tracing::debug!(mechanism, "authentication successful");
                        counters::auth_successful(mechanism);
                        // ParameterStatus and BackendKeyData follow until ReadyForQuery
                    }
                    AuthenticationMessage::CleartextPassword => {
                        mechanism = labels::MECHANISM_CLEARTEXT;
                        let password = config.password.as_ref().ok_or_else(|| {
                            counters::auth_failed(mechanism);
                            Error::Authentication("password required".into())
                        })?;
                        self.send_message(&FrontendMessage::Password(password.clone()))
                            .await?;
                    }
                    AuthenticationMessage::Md5Password { .. } => {
                        return Err(Error::Authentication(
                            "MD5 authentication not supported. Use SCRAM-SHA-256 or cleartext password".into(),
                        ));
                    }
                    AuthenticationMessage::Sasl { mechanisms } => {
                        mechanism = labels::MECHANISM_SCRAM;
                        if let Err(e) = self.handle_sasl(&mechanisms, config).await {
                            counters::auth_failed(mechanism);
                            return Err(e);
                        }
                    }
                    AuthenticationMessage::SaslContinue { .. }
                    | AuthenticationMessage::SaslFinal { .. } => {
                        return Err(Error::Protocol(
                            "unexpected SASL message outside of SASL flow".into(),
                        ));
                    }
                },
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = Some(process_id);
                    self.secret_key = Some(secret_key);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::debug!("parameter status: {} = {}", name, value);
                    self.parameters.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!("notice during startup: {}", notice);
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    break;
                }
                BackendMessage::ErrorResponse(err) => {
                    counters::auth_failed(mechanism);
                    return Err(Error::Authentication(err.to_string()));
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during auth: {:?}",
                        msg
                    )));
                }
            }
        }

        Ok(())
    }

    /// Handle SASL authentication (SCRAM-SHA-256)
    async fn handle_sasl(&mut self, mechanisms: &[String], config: &ConnectionConfig) -> Result<()> {
        if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
            return Err(Error::Authentication(format!(
                "server does not support SCRAM-SHA-256. Available: {}",
                mechanisms.join(", ")
            )));
        }

        let password = config.password.as_ref().ok_or_else(|| {
            Error::Authentication("password required for SCRAM authentication".into())
        })?;

        let scram = ScramClient::new(config.user.clone(), password.clone());
        tracing::debug!("initiating SCRAM-SHA-256 authentication");

        self.send_message(&FrontendMessage::SaslInitialResponse {
            mechanism: SCRAM_SHA_256.to_string(),
            data: scram.client_first().into_bytes(),
        })
        .await?;

        let server_first = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(Error::Authentication(format!("SASL server error: {}", err)));
            }
            _ => {
                return Err(Error::Protocol(
                    "expected SaslContinue message during SASL authentication".into(),
                ));
            }
        };
        let server_first = String::from_utf8(server_first).map_err(|e| {
            Error::Authentication(format!("invalid UTF-8 in server first message: {}", e))
        })?;

        let (client_final, scram_state) = scram
            .client_final(&server_first)
            .map_err(|e| Error::Authentication(format!("SCRAM error: {}", e)))?;

        self.send_message(&FrontendMessage::SaslResponse {
            data: client_final.into_bytes(),
        })
        .await?;

        let server_final = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(Error::Authentication(format!("SASL server error: {}", err)));
            }
            _ => {
                return Err(Error::Protocol(
                    "expected SaslFinal message during SASL authentication".into(),
                ));
            }
        };
        let server_final = String::from_utf8(server_final).map_err(|e| {
            Error::Authentication(format!("invalid UTF-8 in server final message: {}", e))
        })?;

        scram
            .verify_server_final(&server_final, &scram_state)
            .map_err(|e| Error::Authentication(format!("SCRAM verification failed: {}", e)))?;

        tracing::debug!("SCRAM-SHA-256 authentication successful");
        Ok(())
    }

    /// Run `query` and return the result of its last statement.
    ///
    /// Stops early when a statement enters COPY mode; the returned result then
    /// carries the copy status and the connection stays in that mode.
    /// `Ok(None)` means the server produced no result at all.
    pub async fn exec(&mut self, query: &str) -> Result<Option<PgResult>> {
        self.send_query(query).await?;

        let mut last = None;
        while let Some(result) = self.next_result().await? {
            let entered_copy = result.status().is_copy();
            last = Some(result);
            if entered_copy {
                break;
            }
        }
        Ok(last)
    }

    /// Send a simple query without reading any results.
    ///
    /// Leftovers from an earlier statement (unread results, an abandoned
    /// COPY) are discarded first.
    pub async fn send_query(&mut self, query: &str) -> Result<()> {
        self.recover().await?;

        self.state.transition(ConnectionState::QueryInProgress)?;
        self.send_message(&FrontendMessage::Query(query.to_string()))
            .await?;
        self.state.transition(ConnectionState::ReadingResults)?;
        Ok(())
    }

    /// Next statement result of the query in flight.
    ///
    /// Returns `Ok(None)` once the server is ready for a new query.
    pub async fn next_result(&mut self) -> Result<Option<PgResult>> {
        match self.state {
            ConnectionState::Idle => return Ok(None),
            ConnectionState::ReadingResults => {}
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            state if state.is_copy() => {
                return Err(Error::ConnectionBusy(format!("COPY in progress ({})", state)));
            }
            state => {
                return Err(Error::InvalidState {
                    expected: "reading_results".into(),
                    actual: state.to_string(),
                });
            }
        }

        if let Some(result) = self.pending.take() {
            return Ok(Some(result));
        }

        let mut fields: Option<Vec<FieldDescription>> = None;
        let mut rows = Vec::new();

        loop {
            match self.receive_message().await? {
                BackendMessage::RowDescription(desc) => fields = Some(desc),
                BackendMessage::DataRow(values) => {
                    if fields.is_none() {
                        return Err(self.protocol_violation("DataRow before RowDescription"));
                    }
                    rows.push(values);
                }
                BackendMessage::CommandComplete(tag) => {
                    let result = match fields.take() {
                        Some(fields) => PgResult::tuples(fields, std::mem::take(&mut rows), tag),
                        None => PgResult::command(tag),
                    };
                    return Ok(Some(result));
                }
                BackendMessage::EmptyQueryResponse => return Ok(Some(PgResult::empty_query())),
                BackendMessage::ErrorResponse(err) => {
                    tracing::debug!("Postgres error response: {}", err);
                    return Ok(Some(PgResult::error(err)));
                }
                BackendMessage::CopyInResponse(response) => {
                    self.state.transition(ConnectionState::CopyIn)?;
                    return Ok(Some(PgResult::copy(ResultStatus::CopyIn, response)));
                }
                BackendMessage::CopyOutResponse(response) => {
                    self.state.transition(ConnectionState::CopyOut)?;
                    return Ok(Some(PgResult::copy(ResultStatus::CopyOut, response)));
                }
                BackendMessage::CopyBothResponse(response) => {
                    self.state.transition(ConnectionState::CopyBoth)?;
                    return Ok(Some(PgResult::copy(ResultStatus::CopyBoth, response)));
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    self.state.transition(ConnectionState::Idle)?;
                    return Ok(None);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!("Postgres notice: {}", notice);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                other => {
                    return Err(self.protocol_violation(&format!(
                        "unexpected message while reading results: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Next chunk of COPY TO STDOUT data; `Ok(None)` once the server is done.
    ///
    /// A server error during the transfer ends the copy as well; it is
    /// reported by the following [`finish_copy`](Self::finish_copy) or
    /// [`next_result`](Self::next_result).
    pub async fn read_copy_data(&mut self) -> Result<Option<Bytes>> {
        if !matches!(
            self.state,
            ConnectionState::CopyOut | ConnectionState::CopyBoth
        ) {
            return Err(self.wrong_state("copy_out"));
        }

        loop {
            match self.receive_message().await? {
                BackendMessage::CopyData(data) => return Ok(Some(data)),
                BackendMessage::CopyDone => {
                    self.state.transition(ConnectionState::ReadingResults)?;
                    return Ok(None);
                }
                BackendMessage::ErrorResponse(err) => {
                    self.state.transition(ConnectionState::ReadingResults)?;
                    self.pending = Some(PgResult::error(err));
                    return Ok(None);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!("Postgres notice: {}", notice);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                other => {
                    return Err(self.protocol_violation(&format!(
                        "unexpected message during COPY: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Send one chunk of COPY FROM STDIN data
    pub async fn write_copy_data(&mut self, data: Bytes) -> Result<()> {
        self.check_frame_boundary()?;
        if !matches!(
            self.state,
            ConnectionState::CopyIn | ConnectionState::CopyBoth
        ) {
            return Err(self.wrong_state("copy_in"));
        }
        self.send_message(&FrontendMessage::CopyData(data)).await
    }

    /// Complete the current COPY and return its CommandComplete result.
    ///
    /// For COPY FROM STDIN this sends CopyDone; for COPY TO STDOUT any unread
    /// data is skipped. A server error comes back as [`Error::Sql`]. The
    /// connection is ready for a new query afterwards.
    pub async fn finish_copy(&mut self) -> Result<PgResult> {
        match self.state {
            ConnectionState::CopyIn => {
                self.send_message(&FrontendMessage::CopyDone).await?;
                self.state.transition(ConnectionState::ReadingResults)?;
            }
            ConnectionState::CopyOut => self.skip_copy_data().await?,
            ConnectionState::CopyBoth => {
                self.send_message(&FrontendMessage::CopyDone).await?;
                self.skip_copy_data().await?;
            }
            ConnectionState::ReadingResults => {}
            _ => return Err(self.wrong_state("copy")),
        }

        let mut outcome = None;
        while let Some(result) = self.next_result().await? {
            if result.status().is_copy() {
                self.discard_pending().await?;
                break;
            }
            if outcome.is_none() {
                outcome = Some(result);
            }
        }

        match outcome {
            Some(result) if result.status() == ResultStatus::FatalError => {
                Err(Error::Sql(result.error_message()))
            }
            Some(result) => Ok(result),
            None => Err(Error::Protocol("COPY finished without a command tag".into())),
        }
    }

    /// Abort the current COPY. The connection is ready for a new query afterwards.
    ///
    /// COPY FROM STDIN is cancelled with CopyFail; a COPY TO STDOUT cannot be
    /// cancelled from the client, so its remaining data is skipped.
    pub async fn fail_copy(&mut self, reason: &str) -> Result<()> {
        match self.state {
            ConnectionState::CopyIn => self.abort_copy_in(reason).await?,
            ConnectionState::CopyOut | ConnectionState::CopyBoth | ConnectionState::ReadingResults => {}
            _ => return Err(self.wrong_state("copy")),
        }
        self.discard_pending().await
    }

    /// Drop every remaining result of the query in flight, leaving any COPY
    /// mode on the way, until the server is ready for a new query.
    pub async fn discard_pending(&mut self) -> Result<()> {
        self.check_frame_boundary()?;
        loop {
            match self.state {
                ConnectionState::Idle => return Ok(()),
                ConnectionState::ReadingResults => {
                    self.next_result().await?;
                }
                ConnectionState::CopyIn => {
                    self.abort_copy_in("COPY abandoned by client").await?;
                }
                ConnectionState::CopyOut => self.skip_copy_data().await?,
                ConnectionState::CopyBoth => {
                    self.send_message(&FrontendMessage::CopyDone).await?;
                    self.skip_copy_data().await?;
                }
                ConnectionState::Closed => return Err(Error::ConnectionClosed),
                _ => return Err(self.wrong_state("idle")),
            }
        }
    }

    /// Bring the session back to idle after an interrupted statement
    async fn recover(&mut self) -> Result<()> {
        self.check_frame_boundary()?;
        match self.state {
            ConnectionState::Idle => Ok(()),
            ConnectionState::QueryInProgress => {
                // a query message may have been cut off mid-write
                Err(self.protocol_violation("query interrupted while being sent"))
            }
            ConnectionState::ReadingResults => {
                tracing::debug!("discarding unread results of previous query");
                self.discard_pending().await
            }
            state if state.is_copy() => {
                tracing::debug!(state = %state, "recovering from unfinished COPY");
                counters::copy_recovered();
                self.discard_pending().await
            }
            ConnectionState::Closed => Err(Error::ConnectionClosed),
            _ => Err(self.wrong_state("idle")),
        }
    }

    async fn abort_copy_in(&mut self, reason: &str) -> Result<()> {
        self.send_message(&FrontendMessage::CopyFail(reason.to_string()))
            .await?;
        self.state.transition(ConnectionState::ReadingResults)
    }

    async fn skip_copy_data(&mut self) -> Result<()> {
        while self.read_copy_data().await?.is_some() {}
        Ok(())
    }

    /// A write dropped before completion leaves a partial frame on the wire;
    /// nothing can follow it.
    fn check_frame_boundary(&mut self) -> Result<()> {
        if self.write_in_flight {
            return Err(self.protocol_violation("previous message was cut off mid-write"));
        }
        Ok(())
    }

    /// Send a frontend message
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        self.check_frame_boundary()?;
        let buf = encode_message(msg)?;
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        self.write_in_flight = true;
        if let Err(e) = transport.write_all(&buf).await {
            self.mark_closed();
            return Err(e);
        }
        self.write_in_flight = false;
        Ok(())
    }

    /// Receive a backend message
    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            match decode_message(&mut self.read_buf) {
                Ok(Some((msg, consumed))) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Ok(None) => {}
                Err(e) => return Err(self.protocol_violation(&e.to_string())),
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            match transport.read_buf(&mut self.read_buf).await {
                Ok(0) => {
                    self.mark_closed();
                    return Err(Error::ConnectionClosed);
                }
                Ok(_) => {}
                Err(e) => {
                    self.mark_closed();
                    return Err(e);
                }
            }
        }
    }

    fn mark_closed(&mut self) {
        // every state may transition to Closed
        let _ = self.state.transition(ConnectionState::Closed);
        self.pending = None;
        self.write_in_flight = false;
    }

    fn protocol_violation(&mut self, detail: &str) -> Error {
        self.mark_closed();
        Error::Protocol(detail.to_string())
    }

    fn wrong_state(&self, expected: &str) -> Error {
        if self.is_closed() {
            return Error::ConnectionClosed;
        }
        Error::InvalidState {
            expected: expected.to_string(),
            actual: self.state.to_string(),
        }
    }

    /// Send Terminate and shut the transport down. Safe to call more than once.
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };
        // a Terminate behind a partial frame would be read as part of it
        let was_open = !self.is_closed();
        self.mark_closed();

        if was_open {
            if let Ok(buf) = encode_message(&FrontendMessage::Terminate) {
                let _ = transport.write_all(&buf).await;
            }
        }
        transport.shutdown().await
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.terminate().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("process_id", &self.process_id)
            .field("transport", &self.transport)
            .finish()
    }
}
