use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use proto::{ClientConfig, ConnectError, ConnectionError, ServerConfig, TransportErrorCode};
use thiserror::Error;
use tracing::debug;

use crate::{connection::Connection, endpoint::Endpoint};

/// Accepts incoming connections on a bound UDP socket
///
/// Closing the listener, explicitly or by dropping it, refuses handshakes in progress, closes
/// every connection it admitted, and fails pending [`accept`](Self::accept) calls with
/// [`ConnectionError::ListenerClosed`].
#[derive(Debug)]
pub struct Listener {
    endpoint: Endpoint,
}

/// Bind `addr` and start accepting connections according to `config`
///
/// Must be called from within a tokio runtime context.
pub fn listen_addr(addr: SocketAddr, config: ServerConfig) -> io::Result<Listener> {
    let endpoint = Endpoint::server(config, addr)?;
    debug!(addr = %endpoint.local_addr()?, "listening");
    Ok(Listener { endpoint })
}

impl Listener {
    /// Wait for the oldest connection that completed its handshake and was admitted
    pub async fn accept(&self) -> Result<Connection, ConnectionError> {
        self.endpoint.accept().await
    }

    /// Stop accepting connections
    pub fn close(&self) {
        self.endpoint.inner.close_listener();
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// The endpoint underlying this listener, which may also be used to dial out
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect to `addr` from a fresh ephemeral socket and wait until the server admits us
///
/// `server_name` is checked against the server's certificate unless
/// [`ClientConfig::server_name`] overrides it.
pub async fn dial(
    addr: SocketAddr,
    server_name: &str,
    config: ClientConfig,
) -> Result<Connection, DialError> {
    let local = match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let endpoint = Endpoint::client(local)?;
    let connecting = endpoint.connect(config, addr, server_name)?;
    Ok(connecting.await?)
}

/// Resolve a `host:port` string and [`dial`] the first address found, using `host` as the
/// server name
pub async fn dial_addr(addr: &str, config: ClientConfig) -> Result<Connection, DialError> {
    let remote = tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| DialError::UnresolvedAddress(addr.to_owned()))?;
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    dial(remote, host, config).await
}

/// Reasons a [`dial`] can fail
#[derive(Debug, Error)]
pub enum DialError {
    /// The local socket could not be set up, or the address could not be resolved
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The address resolved to nothing
    #[error("no addresses found for {0}")]
    UnresolvedAddress(String),
    /// The connection parameters were rejected before anything was sent
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// The handshake failed, or the server refused to admit us
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl DialError {
    /// The transport error code describing the failure, if the peer or handshake produced one
    ///
    /// Admission rejection reports [`TransportErrorCode::PEER_GOING_AWAY`].
    pub fn code(&self) -> Option<TransportErrorCode> {
        match self {
            Self::Connection(e) => e.code(),
            _ => None,
        }
    }
}
