//! TLS configuration for connections negotiated through SSLRequest.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;

/// SSL/TLS connection mode matching the libpq `sslmode` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// No TLS
    #[default]
    Disable,
    /// Try TLS, fall back to plaintext if the server refuses; certificate not verified
    Prefer,
    /// TLS required, certificate not verified
    Require,
    /// TLS required, certificate must chain to a trusted CA
    VerifyCa,
    /// TLS required, certificate must chain to a trusted CA and match the host
    VerifyFull,
}

impl SslMode {
    /// Whether this mode verifies the server certificate
    pub fn requires_verification(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether a server refusing TLS is fatal
    pub fn requires_tls(&self) -> bool {
        !matches!(self, Self::Disable | Self::Prefer)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        })
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, prefer, require, verify-ca, or verify-full",
                s
            ))),
        }
    }
}

/// Compiled TLS client settings.
#[derive(Clone)]
pub struct TlsConfig {
    verify: bool,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Start a builder. Certificates are verified against system roots by default.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Settings appropriate for `mode`, optionally trusting the CA bundle at `root_cert`.
    pub fn for_mode(mode: SslMode, root_cert: Option<&str>) -> Result<Self> {
        let mut builder = Self::builder().verify_certificates(mode.requires_verification());
        if let Some(path) = root_cert {
            builder = builder.ca_cert_path(path);
        }
        builder.build()
    }

    /// rustls client config handed to the connector
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Whether the server certificate is verified
    pub fn verifies_certificates(&self) -> bool {
        self.verify
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("verify", &self.verify)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for [`TlsConfig`].
#[derive(Debug, Clone)]
pub struct TlsConfigBuilder {
    ca_cert_path: Option<String>,
    verify: bool,
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self {
            ca_cert_path: None,
            verify: true,
        }
    }
}

impl TlsConfigBuilder {
    /// Trust the PEM bundle at `path` instead of the system roots
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Verify the server certificate chain and host name (default: true)
    pub fn verify_certificates(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<TlsConfig> {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("TLS setup failed: {}", e)))?;

        let client_config = if self.verify {
            builder
                .with_root_certificates(self.root_store()?)
                .with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
                .with_no_client_auth()
        };

        Ok(TlsConfig {
            verify: self.verify,
            client_config: Arc::new(client_config),
        })
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();

        if let Some(ref path) = self.ca_cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                Error::Config(format!("failed to read CA certificate file '{}': {}", path, e))
            })?;
            let certs = rustls_pemfile::certs(&mut pem.as_slice())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| {
                    Error::Config(format!("failed to parse CA certificate from '{}'", path))
                })?;
            let (added, _) = store.add_parsable_certificates(certs);
            if added == 0 {
                return Err(Error::Config(format!(
                    "no valid certificates found in '{}'",
                    path
                )));
            }
            return Ok(store);
        }

        let native = rustls_native_certs::load_native_certs();
        let _ = store.add_parsable_certificates(native.certs);
        if store.is_empty() {
            tracing::debug!("no system root certificates found, using bundled webpki roots");
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        Ok(store)
    }
}

/// Verifier for `sslmode=require`/`prefer`: encryption without authentication.
/// Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Validate a host name (or IP literal) for TLS server name indication.
pub fn parse_server_name(hostname: &str) -> Result<String> {
    let hostname = hostname.trim_end_matches('.');

    let valid = !hostname.is_empty()
        && hostname.len() <= 253
        && hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ':');
    if !valid {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    Ok(hostname.to_string())
}
