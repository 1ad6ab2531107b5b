//! Quinn-based QUIC transport.
//!
//! Production transport for the notification protocol: encrypted, multiplexed
//! streams over UDP with TLS 1.3. Certificates come from PEM files in
//! production; a self-signed certificate is generated when none are given so
//! local runs need no setup.
//!
//! ALPN is pinned to "vibe" so mismatched peers fail the handshake instead of
//! exchanging garbage frames.

use std::{net::SocketAddr, sync::Arc};

use quinn::{Endpoint, RecvStream, SendStream, ServerConfig};
use vibe_proto::ALPN_PROTOCOL;

use crate::error::ServerError;

/// QUIC endpoint accepting client connections.
///
/// # Security
///
/// Self-signed certificates (from `bind(addr, None, None)`) log a warning and
/// are for local testing only. Production deployments need certificates from
/// a trusted CA, otherwise clients cannot distinguish the server from a
/// man-in-the-middle.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind a new QUIC transport.
    ///
    /// When `cert_path` and `key_path` are both given they are loaded as PEM;
    /// otherwise a self-signed certificate is generated.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` for bad addresses or TLS material
    /// - `ServerError::Transport` when the endpoint cannot bind
    pub fn bind(
        address: &str,
        cert_path: Option<String>,
        key_path: Option<String>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("bad bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => pem_config(&cert, &key)?,
            _ => self_signed_config()?,
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("endpoint setup on {addr}: {e}")))?;

        tracing::info!("QUIC transport listening on {}", addr);

        Ok(Self { endpoint })
    }

    /// Accept the next connection, waiting for its QUIC/TLS handshake.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the endpoint is closed or the handshake
    ///   fails
    pub async fn accept(&self) -> Result<QuinnConnection, ServerError> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| ServerError::Transport("endpoint closed".to_string()))?;

        let connection =
            incoming.await.map_err(|e| ServerError::Transport(format!("handshake: {e}")))?;

        Ok(QuinnConnection { connection })
    }

    /// Local address the transport is bound to.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the socket address cannot be read
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("local address lookup: {e}")))
    }
}

/// One live QUIC connection.
///
/// Clients open bidirectional streams for requests; the server opens a single
/// unidirectional stream per session for pushes (presence updates and
/// notifications), which keeps server-to-client delivery ordered.
///
/// Clones are cheap, share the underlying connection, and can be used from
/// multiple tasks.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Accept a client-initiated bidirectional stream.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` when the connection is gone
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_bi: {e}")))
    }

    /// Open a unidirectional stream towards the client.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` when the connection is gone
    pub async fn open_uni(&self) -> Result<SendStream, ServerError> {
        self.connection
            .open_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("open_uni: {e}")))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection with an error code and reason.
    pub fn close(&self, error_code: quinn::VarInt, reason: &[u8]) {
        self.connection.close(error_code, reason);
    }
}

/// Build a server config from PEM certificate and key files.
fn pem_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("reading cert '{cert_path}': {e}")))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("reading key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("parsing certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("parsing private key: {e}")))?
        .ok_or_else(|| ServerError::Config(format!("no private key in '{key_path}'")))?;

    let tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("TLS material rejected: {e}")))?;

    quic_config(tls)
}

/// Build a server config around a freshly generated self-signed certificate.
fn self_signed_config() -> Result<ServerConfig, ServerError> {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("self-signed generation: {e}")))?;

    let chain = vec![generated.cert.der().clone()];
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der());

    let tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key.into())
        .map_err(|e| ServerError::Config(format!("TLS material rejected: {e}")))?;

    tracing::warn!("running with a self-signed certificate, local testing only");

    quic_config(tls)
}

/// Pin ALPN and wrap a rustls config for Quinn.
fn quic_config(mut tls: rustls::ServerConfig) -> Result<ServerConfig, ServerError> {
    tls.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls)
        .map_err(|e| ServerError::Config(format!("QUIC crypto config: {e}")))?;

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_with_a_generated_certificate() {
        let transport = QuinnTransport::bind("127.0.0.1:0", None, None).unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn rejects_a_malformed_bind_address() {
        assert!(QuinnTransport::bind("not-an-address", None, None).is_err());
    }
}
