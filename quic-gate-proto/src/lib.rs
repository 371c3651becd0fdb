//! Low-level protocol logic for QUIC connection establishment and admission control
//!
//! quic-gate-proto contains a fully deterministic implementation of the part of a QUIC transport
//! that decides whether, and under which version and cryptographic identity, a session comes into
//! existence: version negotiation, stateless address validation through retry tokens, the TLS 1.3
//! handshake driven through [`crypto::Session`], and the bookkeeping that feeds completed sessions
//! to a bounded accept queue. It performs no I/O; callers feed received datagrams to
//! [`Endpoint::handle`] and send whatever [`Endpoint::poll_transmit`] hands back.
//!
//! The main entry point is [`Endpoint`].
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

use std::{fmt, net::SocketAddr, ops};

use bytes::Bytes;

mod coding;
pub use crate::coding::UnexpectedEnd;

mod config;
pub use crate::config::{ClientConfig, ConfigError, EndpointConfig, ServerConfig};

pub mod crypto;

mod endpoint;
pub use crate::endpoint::{ConnectError, Endpoint, Event};

mod packet;
pub use crate::packet::{Header, PacketDecodeError, PacketKind};

mod session;
pub use crate::session::{ConnectionError, State};

mod shared;
pub use crate::shared::{ConnectionHandle, ConnectionId};

pub mod token;

mod transport_error;
pub use crate::transport_error::{Code as TransportErrorCode, Error as TransportError};

mod transport_parameters;
pub use crate::transport_parameters::{TransportParameters, VersionInformation};

pub mod version;
pub use crate::version::{Negotiation, VersionNumber};

#[cfg(test)]
mod tests;

/// Whether an endpoint was the initiator of a connection
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    /// The initiator of a connection
    Client = 0,
    /// The acceptor of a connection
    Server = 1,
}

impl Side {
    #[inline]
    /// Shorthand for `self == Side::Client`
    pub fn is_client(self) -> bool {
        self == Self::Client
    }

    #[inline]
    /// Shorthand for `self == Side::Server`
    pub fn is_server(self) -> bool {
        self == Self::Server
    }
}

impl ops::Not for Side {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// An outgoing packet
#[derive(Debug)]
pub struct Transmit {
    /// The socket this datagram should be sent to
    pub destination: SocketAddr,
    /// Contents of the datagram
    pub contents: Bytes,
}

//
// Useful internal constants
//

/// Maximum length of a connection identifier
pub const MAX_CID_SIZE: usize = 20;
/// Length of the connection identifiers this implementation issues
const LOC_CID_LEN: usize = 8;
/// Datagrams carrying an Initial packet shorter than this are dropped unread
pub const MIN_INITIAL_SIZE: usize = 1200;
/// Default bound on completed sessions waiting to be accepted
pub const MAX_ACCEPT_QUEUE_SIZE: usize = 32;
