//! QUIC transport for the client.
//!
//! A thin I/O layer bridging the sans-IO [`Client`](crate::Client) to a live
//! connection: frames go in and out over mpsc channels, an internal task owns
//! the QUIC streams.
//!
//! Wire shape: the client opens one bidirectional stream per request and
//! finishes it after a single frame. The server pushes replies and events
//! over one long-lived unidirectional stream per session.

use std::{net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream};
use thiserror::Error;
use tokio::sync::mpsc;
use vibe_proto::{ALPN_PROTOCOL, Frame, FrameHeader};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Channel pair bound to a live connection.
///
/// Push outgoing frames into `outbound`, read server frames off `inbound`.
/// The QUIC I/O runs in a background task until [`stop`](Self::stop) or the
/// connection drops.
pub struct ConnectedClient {
    /// Frames headed for the server.
    pub outbound: mpsc::Sender<Frame>,
    /// Frames pushed by the server.
    pub inbound: mpsc::Receiver<Frame>,
    abort_handle: tokio::task::AbortHandle,
}

impl ConnectedClient {
    /// Tear down the connection task.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

/// Connect to a server and spawn the I/O task.
///
/// # Errors
///
/// - `TransportError::Connection` when the address does not parse or the
///   QUIC handshake fails
pub async fn connect(server_addr: &str) -> Result<ConnectedClient, TransportError> {
    let addr: SocketAddr = server_addr
        .parse()
        .map_err(|e| TransportError::Connection(format!("bad address '{server_addr}': {e}")))?;

    let bind_addr: SocketAddr = "0.0.0.0:0"
        .parse()
        .map_err(|e| TransportError::Connection(format!("bad bind address: {e}")))?;
    let mut endpoint = Endpoint::client(bind_addr)
        .map_err(|e| TransportError::Connection(format!("endpoint setup: {e}")))?;
    endpoint.set_default_client_config(dev_client_config()?);

    let connection = endpoint
        .connect(addr, "localhost")
        .map_err(|e| TransportError::Connection(format!("connect: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("handshake: {e}")))?;

    let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(32);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Frame>(32);

    let handle = tokio::spawn(drive_connection(connection, outbound_rx, inbound_tx));

    Ok(ConnectedClient {
        outbound: outbound_tx,
        inbound: inbound_rx,
        abort_handle: handle.abort_handle(),
    })
}

/// Bridge channels and QUIC streams until the outbound channel closes.
async fn drive_connection(
    connection: quinn::Connection,
    mut outbound: mpsc::Receiver<Frame>,
    inbound: mpsc::Sender<Frame>,
) {
    // The server opens one persistent push stream per session. Accept it
    // (and any replacement) and drain frames until the connection dies.
    let push_conn = connection.clone();
    let push_handle = tokio::spawn(async move {
        loop {
            match push_conn.accept_uni().await {
                Ok(stream) => {
                    let tx = inbound.clone();
                    tokio::spawn(async move {
                        if let Err(e) = drain_push_stream(stream, tx).await {
                            tracing::debug!("push stream ended: {e}");
                        }
                    });
                },
                Err(e) => {
                    tracing::debug!("connection lost: {e}");
                    break;
                },
            }
        }
    });

    // One bi-stream per request, finished after the single frame.
    while let Some(frame) = outbound.recv().await {
        match connection.open_bi().await {
            Ok((send, _recv)) => {
                if let Err(e) = write_request(send, &frame).await {
                    tracing::warn!("request send failed: {e}");
                }
            },
            Err(e) => {
                tracing::warn!("open_bi failed: {e}");
                break;
            },
        }
    }

    push_handle.abort();
}

/// Read frames off the server's push stream until it closes.
async fn drain_push_stream(
    mut recv: RecvStream,
    tx: mpsc::Sender<Frame>,
) -> Result<(), TransportError> {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        buf.resize(FrameHeader::SIZE, 0);
        recv.read_exact(&mut buf[..FrameHeader::SIZE])
            .await
            .map_err(|e| TransportError::Stream(format!("header read: {e}")))?;

        let payload_size = {
            let header = FrameHeader::from_bytes(&buf[..FrameHeader::SIZE])
                .map_err(|e| TransportError::Protocol(format!("bad header: {e}")))?;
            header.payload_size() as usize
        };

        if payload_size > 0 {
            buf.resize(FrameHeader::SIZE + payload_size, 0);
            recv.read_exact(&mut buf[FrameHeader::SIZE..])
                .await
                .map_err(|e| TransportError::Stream(format!("payload read: {e}")))?;
        }

        let frame =
            Frame::decode(&buf).map_err(|e| TransportError::Protocol(format!("decode: {e}")))?;

        tx.send(frame).await.map_err(|e| TransportError::Stream(format!("channel send: {e}")))?;
    }
}

/// Write one frame and finish the stream.
async fn write_request(mut send: SendStream, frame: &Frame) -> Result<(), TransportError> {
    let mut buf = Vec::new();
    frame.encode(&mut buf).map_err(|e| TransportError::Protocol(format!("encode: {e}")))?;

    send.write_all(&buf).await.map_err(|e| TransportError::Stream(format!("write: {e}")))?;
    send.finish().map_err(|e| TransportError::Stream(format!("finish: {e}")))?;

    Ok(())
}

/// Client config that skips certificate verification.
///
/// Matches the server's self-signed default for local development. Deploying
/// against real certificates needs a verifying config instead.
fn dev_client_config() -> Result<ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();

    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("crypto config: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(quic));

    let idle = quinn::IdleTimeout::try_from(std::time::Duration::from_secs(30))
        .map_err(|e| TransportError::Connection(format!("idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Verifier that trusts any server certificate. Development only.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
