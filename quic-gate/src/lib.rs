//! Asynchronous QUIC connection establishment with bounded admission
//!
//! This crate drives the protocol logic of `quic-gate-proto` over tokio UDP sockets. A
//! [`Listener`] accepts connections that have negotiated a version, proven their address and
//! completed the TLS handshake, holding at most
//! [`ServerConfig::max_accept_queue_size`] of them until the application takes them with
//! [`Listener::accept`]. Clients beyond that bound are turned away with
//! [`ConnectionError::AdmissionRejected`] rather than left waiting.
//!
//! [`dial`] connects from an ephemeral socket; [`Endpoint`] gives control over the socket and
//! lets one socket serve both roles.
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

macro_rules! ready {
    ($e:expr $(,)?) => {
        match $e {
            std::task::Poll::Ready(t) => t,
            std::task::Poll::Pending => return std::task::Poll::Pending,
        }
    };
}

mod accept_queue;
mod connection;
mod endpoint;
mod listener;
mod mutex;

pub use proto::{
    crypto, token, version, ClientConfig, ConfigError, ConnectError, ConnectionError,
    EndpointConfig, ServerConfig, Side, TransportError, TransportErrorCode, VersionNumber,
};
pub use rustls;

pub use crate::connection::{Connecting, Connection};
pub use crate::endpoint::Endpoint;
pub use crate::listener::{dial, dial_addr, listen_addr, DialError, Listener};

/// Large enough for any datagram
const RECV_BUF_SIZE: usize = 64 * 1024;
