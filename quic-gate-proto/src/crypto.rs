//! Traits and implementations for the TLS handshake collaborator
//!
//! Sessions only need to drive the handshake: consume the peer's handshake bytes, produce their
//! own, and report completion or failure. Packet protection is not modelled here.

use std::{any::Any, str, sync::Arc};

use crate::{endpoint::ConnectError, transport_parameters::TransportParameters, TransportError};

/// Cryptographic primitives provided by *ring*
pub(crate) mod ring;
/// TLS interface based on rustls
pub mod rustls;

/// A cryptographic handshake in progress
pub trait Session: Send + Sync + 'static {
    /// Consume handshake bytes received from the peer
    ///
    /// `buf` must hold exactly the bytes the peer produced for a single key epoch.
    fn read_handshake(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    /// Emit outgoing handshake bytes into `buf`
    ///
    /// Returns `true` if the key epoch advanced, in which case callers must delimit what has been
    /// written so far before calling again.
    fn write_handshake(&mut self, buf: &mut Vec<u8>) -> bool;

    /// Returns `true` until the handshake completes or fails
    fn is_handshaking(&self) -> bool;

    /// The peer's QUIC transport parameters
    ///
    /// Returns `Ok(None)` if they are not yet available.
    fn transport_parameters(&self) -> Result<Option<TransportParameters>, TransportError>;

    /// Information negotiated during the handshake, if any is available yet
    ///
    /// The dynamic type depends on the implementation; see [`rustls::HandshakeData`].
    fn handshake_data(&self) -> Option<Box<dyn Any>>;
}

/// Client-side configuration for the crypto protocol
pub trait ClientConfig: Send + Sync {
    /// Start a client session with this configuration
    fn start_session(
        self: Arc<Self>,
        version: u32,
        server_name: &str,
        params: &TransportParameters,
    ) -> Result<Box<dyn Session>, ConnectError>;
}

/// Server-side configuration for the crypto protocol
pub trait ServerConfig: Send + Sync {
    /// Start a server session with this configuration
    fn start_session(
        self: Arc<Self>,
        version: u32,
        params: &TransportParameters,
    ) -> Result<Box<dyn Session>, TransportError>;
}

/// A key for signing with HMAC-based algorithms
pub trait HmacKey: Send + Sync {
    /// Method for signing a message
    fn sign(&self, data: &[u8], signature_out: &mut [u8]);
    /// Length of `sign`'s output
    fn signature_len(&self) -> usize;
    /// Method for verifying a message
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError>;
}

/// Generic crypto errors
#[derive(Debug)]
pub struct CryptoError;
