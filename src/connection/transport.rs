//! Transport abstraction (TCP with optional TLS vs Unix socket)

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::BytesMut;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;

/// Transport layer abstraction
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// Plain TCP
    Tcp(TcpStream),
    /// TCP upgraded to TLS after SSLRequest negotiation
    Tls(TlsStream<TcpStream>),
    /// Unix domain socket
    Unix(UnixStream),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp(_) => f.write_str("Transport::Tcp"),
            Transport::Tls(_) => f.write_str("Transport::Tls"),
            Transport::Unix(_) => f.write_str("Transport::Unix"),
        }
    }
}

macro_rules! with_stream {
    ($self:expr, $stream:ident => $body:expr) => {
        match $self {
            Transport::Tcp($stream) => $body,
            Transport::Tls($stream) => $body,
            Transport::Unix($stream) => $body,
        }
    };
}

impl Transport {
    /// Connect via plain TCP
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Tcp(stream))
    }

    /// Connect via Unix socket
    pub async fn connect_unix(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Transport::Unix(stream))
    }

    /// Write bytes to the transport and flush them
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        with_stream!(self, s => write_flush(s, buf).await)
    }

    /// Read bytes into buffer; `Ok(0)` means the peer closed the socket
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = with_stream!(self, s => s.read_buf(buf).await?);
        Ok(n)
    }

    /// Whether the stream is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Upgrade a plain TCP transport to TLS after SSLRequest negotiation.
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, hostname: &str) -> Result<Self> {
        match self {
            Transport::Tcp(tcp) => {
                let server_name = rustls_pki_types::ServerName::try_from(
                    parse_server_name(hostname)?,
                )
                .map_err(|_| Error::Config(format!("invalid hostname for TLS: {}", hostname)))?;

                let connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
                let tls = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::Config(format!("TLS handshake failed: {}", e)))?;
                Ok(Transport::Tls(tls))
            }
            Transport::Tls(_) => Err(Error::Config("transport is already TLS-encrypted".into())),
            Transport::Unix(_) => Err(Error::Config("cannot upgrade Unix socket to TLS".into())),
        }
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        with_stream!(self, s => s.shutdown().await?);
        Ok(())
    }
}

async fn write_flush<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, buf: &[u8]) -> Result<()> {
    stream.write_all(buf).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        let result = Transport::connect_tcp("127.0.0.1", 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unix_connect_failure() {
        let result = Transport::connect_unix(Path::new("/nonexistent/.s.PGSQL.5432")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_and_read_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let mut transport = Transport::connect_tcp("127.0.0.1", port).await.unwrap();
        assert!(!transport.is_tls());
        transport.write_all(b"ping").await.unwrap();

        let mut buf = BytesMut::new();
        while buf.len() < 4 {
            assert!(transport.read_buf(&mut buf).await.unwrap() > 0);
        }
        assert_eq!(&buf[..], b"ping");
        server.await.unwrap();
    }
}
