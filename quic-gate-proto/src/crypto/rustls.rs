use std::{any::Any, io, sync::Arc};

pub use rustls::Error;
use rustls::{
    self,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    quic::{Connection, Version},
    RootCertStore,
};
use tracing::trace;

use crate::{
    crypto,
    endpoint::ConnectError,
    transport_parameters::TransportParameters,
    version::{self, VersionNumber},
    Side, TransportError, TransportErrorCode,
};

/// A rustls TLS session
pub struct TlsSession {
    inner: Connection,
}

impl TlsSession {
    fn side(&self) -> Side {
        match self.inner {
            Connection::Client(_) => Side::Client,
            Connection::Server(_) => Side::Server,
        }
    }
}

impl crypto::Session for TlsSession {
    fn read_handshake(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.inner.read_hs(buf).map_err(|e| {
            if let Some(alert) = self.inner.alert() {
                TransportError {
                    code: TransportErrorCode::crypto(alert.into()),
                    reason: e.to_string(),
                }
            } else {
                TransportError::PROTOCOL_VIOLATION(format!("TLS error: {e}"))
            }
        })
    }

    fn write_handshake(&mut self, buf: &mut Vec<u8>) -> bool {
        let key_change = self.inner.write_hs(buf).is_some();
        if key_change {
            trace!(side = %self.side(), "handshake keys advanced");
        }
        key_change
    }

    fn is_handshaking(&self) -> bool {
        self.inner.is_handshaking()
    }

    fn transport_parameters(&self) -> Result<Option<TransportParameters>, TransportError> {
        match self.inner.quic_transport_parameters() {
            None => Ok(None),
            Some(buf) => TransportParameters::read(!self.side(), &mut io::Cursor::new(buf))
                .map(Some)
                .map_err(Into::into),
        }
    }

    fn handshake_data(&self) -> Option<Box<dyn Any>> {
        if self.inner.is_handshaking() {
            return None;
        }
        Some(Box::new(HandshakeData {
            protocol: self.inner.alpn_protocol().map(|x| x.into()),
            server_name: match self.inner {
                Connection::Client(_) => None,
                Connection::Server(ref session) => session.server_name().map(|x| x.into()),
            },
        }))
    }
}

/// Authentication data for a rustls TLS session
pub struct HandshakeData {
    /// The negotiated application protocol, if ALPN is in use
    pub protocol: Option<Vec<u8>>,
    /// The server name specified by the client, if any
    ///
    /// Always `None` for outgoing connections
    pub server_name: Option<String>,
}

/// A QUIC-compatible TLS client configuration
///
/// Can be constructed from any [`rustls::ClientConfig`] that enables TLS 1.3.
pub struct QuicClientConfig {
    inner: Arc<rustls::ClientConfig>,
}

impl QuicClientConfig {
    /// Trust the certificate authorities in `roots`, using the *ring* provider
    pub fn with_root_certificates(roots: impl Into<Arc<RootCertStore>>) -> Result<Self, Error> {
        let inner = rustls::ClientConfig::builder_with_provider(configured_provider())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

impl crypto::ClientConfig for QuicClientConfig {
    fn start_session(
        self: Arc<Self>,
        version: VersionNumber,
        server_name: &str,
        params: &TransportParameters,
    ) -> Result<Box<dyn crypto::Session>, ConnectError> {
        let server_name = ServerName::try_from(server_name)
            .map_err(|_| ConnectError::InvalidServerName(server_name.into()))?
            .to_owned();
        let session = rustls::quic::ClientConnection::new(
            self.inner.clone(),
            interpret_version(version),
            server_name,
            to_vec(params),
        )
        .map_err(|e| ConnectError::CryptoConfig(e.to_string()))?;
        Ok(Box::new(TlsSession {
            inner: Connection::Client(session),
        }))
    }
}

impl From<Arc<rustls::ClientConfig>> for QuicClientConfig {
    fn from(inner: Arc<rustls::ClientConfig>) -> Self {
        Self { inner }
    }
}

impl From<rustls::ClientConfig> for QuicClientConfig {
    fn from(inner: rustls::ClientConfig) -> Self {
        Arc::new(inner).into()
    }
}

/// A QUIC-compatible TLS server configuration
///
/// Any [`rustls::ServerConfig`] that enables TLS 1.3 and sets `max_early_data_size` to either 0
/// or `u32::MAX` will do.
pub struct QuicServerConfig {
    inner: Arc<rustls::ServerConfig>,
}

impl QuicServerConfig {
    /// Serve `cert_chain` authenticated by `key`, without client authentication
    pub fn new(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, Error> {
        let inner = rustls::ServerConfig::builder_with_provider(configured_provider())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

impl crypto::ServerConfig for QuicServerConfig {
    fn start_session(
        self: Arc<Self>,
        version: VersionNumber,
        params: &TransportParameters,
    ) -> Result<Box<dyn crypto::Session>, TransportError> {
        let session = rustls::quic::ServerConnection::new(
            self.inner.clone(),
            interpret_version(version),
            to_vec(params),
        )
        .map_err(|e| TransportError::INTERNAL_ERROR(format!("TLS configuration: {e}")))?;
        Ok(Box::new(TlsSession {
            inner: Connection::Server(session),
        }))
    }
}

impl From<Arc<rustls::ServerConfig>> for QuicServerConfig {
    fn from(inner: Arc<rustls::ServerConfig>) -> Self {
        Self { inner }
    }
}

impl From<rustls::ServerConfig> for QuicServerConfig {
    fn from(inner: rustls::ServerConfig) -> Self {
        Arc::new(inner).into()
    }
}

fn to_vec(params: &TransportParameters) -> Vec<u8> {
    let mut bytes = Vec::new();
    params.write(&mut bytes);
    bytes
}

/// Label rustls uses for QUIC-specific key derivation
///
/// Versions without their own key schedule reuse version 1's labels.
fn interpret_version(version: VersionNumber) -> Version {
    match version {
        version::V2 => Version::V2,
        _ => Version::V1,
    }
}

pub(crate) fn configured_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
