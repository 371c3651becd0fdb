use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    crypto::{self, HmacKey},
    token::{self, AcceptCookie, AddressValidator, Cookie, StatelessRetry},
    version::{self, VersionNumber},
    MAX_ACCEPT_QUEUE_SIZE,
};

/// Global configuration for the endpoint, affecting all connections
///
/// Default values should be suitable for most internet applications.
#[derive(Clone)]
pub struct EndpointConfig {
    pub(crate) supported_versions: Vec<VersionNumber>,
    /// Optional seed to be used internally for random number generation
    pub(crate) rng_seed: Option<[u8; 32]>,
}

impl EndpointConfig {
    /// Versions this endpoint will serve, most preferred first
    ///
    /// Also advertised in Version Negotiation packets. Must be non-empty and free of reserved
    /// values.
    pub fn supported_versions(
        &mut self,
        versions: Vec<VersionNumber>,
    ) -> Result<&mut Self, ConfigError> {
        check_versions(&versions)?;
        self.supported_versions = versions;
        Ok(self)
    }

    /// Get the current value of `supported_versions`
    pub fn get_supported_versions(&self) -> &[VersionNumber] {
        &self.supported_versions
    }

    /// Optional seed to be used internally for random number generation
    ///
    /// By default, quic-gate-proto initializes an endpoint-specific rng from system entropy.
    pub fn rng_seed(&mut self, seed: Option<[u8; 32]>) -> &mut Self {
        self.rng_seed = seed;
        self
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("EndpointConfig")
            .field("supported_versions", &self.supported_versions)
            .field("rng_seed", &self.rng_seed.map(|_| "[ elided ]"))
            .finish()
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            supported_versions: version::DEFAULT_SUPPORTED_VERSIONS.to_vec(),
            rng_seed: None,
        }
    }
}

/// Parameters governing incoming connections
///
/// Default values should be suitable for most internet applications.
#[derive(Clone)]
pub struct ServerConfig {
    /// TLS configuration used for incoming connections.
    ///
    /// Must be set to use TLS 1.3 only.
    pub crypto: Arc<dyn crypto::ServerConfig>,

    /// Used to authenticate retry tokens
    pub(crate) token_key: Arc<dyn HmacKey>,
    pub(crate) use_retry: bool,
    pub(crate) retry_token_lifetime: Duration,
    pub(crate) accept_cookie: Option<Arc<token::CookiePredicate>>,
    /// Built from the three fields above whenever one of them changes
    pub(crate) address_validator: Arc<dyn AddressValidator>,

    pub(crate) max_accept_queue_size: usize,
    pub(crate) handshake_timeout: Duration,
}

impl ServerConfig {
    /// Create a default config with a particular retry token key
    pub fn new(crypto: Arc<dyn crypto::ServerConfig>, token_key: Arc<dyn HmacKey>) -> Self {
        let retry_token_lifetime = Duration::from_secs(15);
        Self {
            crypto,
            address_validator: Arc::new(StatelessRetry::new(
                token_key.clone(),
                retry_token_lifetime,
            )),
            token_key,
            use_retry: true,
            retry_token_lifetime,
            accept_cookie: None,

            max_accept_queue_size: MAX_ACCEPT_QUEUE_SIZE,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Create a server config with the given [`crypto::ServerConfig`]
    ///
    /// Uses a randomized retry token key.
    pub fn with_crypto(crypto: Arc<dyn crypto::ServerConfig>) -> Self {
        Self::new(crypto, Arc::new(crypto::ring::random_hmac_key()))
    }

    /// Create a server config with the given certificate chain to be presented to clients
    ///
    /// Uses a randomized retry token key.
    pub fn with_single_cert(
        cert_chain: Vec<rustls::pki_types::CertificateDer<'static>>,
        key: rustls::pki_types::PrivateKeyDer<'static>,
    ) -> Result<Self, rustls::Error> {
        let crypto = crypto::rustls::QuicServerConfig::new(cert_chain, key)?;
        Ok(Self::with_crypto(Arc::new(crypto)))
    }

    /// Private key used to authenticate retry tokens
    pub fn token_key(&mut self, value: Arc<dyn HmacKey>) -> &mut Self {
        self.token_key = value;
        self.rebuild_address_validator();
        self
    }

    /// Whether to require clients to prove ownership of an address before committing resources.
    ///
    /// Introduces an additional round-trip to the handshake to make denial of service attacks
    /// more difficult. Enabled by default. Disabling it also bypasses any
    /// [`accept_cookie`](Self::accept_cookie) predicate.
    pub fn use_retry(&mut self, value: bool) -> &mut Self {
        self.use_retry = value;
        self
    }

    /// Duration after a retry token was issued for which it's considered valid
    ///
    /// Ignored while an [`accept_cookie`](Self::accept_cookie) predicate is installed.
    pub fn retry_token_lifetime(&mut self, value: Duration) -> &mut Self {
        self.retry_token_lifetime = value;
        self.rebuild_address_validator();
        self
    }

    /// Let `predicate` decide whether a client must be retried
    ///
    /// The predicate receives the client's address and, if it presented a valid token, what that
    /// token says. Returning `true` lets the handshake proceed without a Retry. Installing a
    /// predicate re-enables [`use_retry`](Self::use_retry).
    pub fn accept_cookie<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&SocketAddr, Option<&Cookie>) -> bool + Send + Sync + 'static,
    {
        self.accept_cookie = Some(Arc::new(predicate));
        self.use_retry = true;
        self.rebuild_address_validator();
        self
    }

    /// Maximum number of completed sessions waiting to be accepted
    ///
    /// Sessions completing their handshake while this many are queued are rejected with
    /// `PEER_GOING_AWAY`. Must be at least 1.
    pub fn max_accept_queue_size(&mut self, value: usize) -> Result<&mut Self, ConfigError> {
        if value == 0 {
            return Err(ConfigError::OutOfBounds);
        }
        self.max_accept_queue_size = value;
        Ok(self)
    }

    /// Get the current value of `max_accept_queue_size`
    pub fn get_max_accept_queue_size(&self) -> usize {
        self.max_accept_queue_size
    }

    /// How long an incoming handshake may take before it is abandoned
    pub fn handshake_timeout(&mut self, value: Duration) -> &mut Self {
        self.handshake_timeout = value;
        self
    }

    fn rebuild_address_validator(&mut self) {
        self.address_validator = match self.accept_cookie {
            Some(ref predicate) => Arc::new(AcceptCookie::new(
                self.token_key.clone(),
                predicate.clone(),
            )),
            None => Arc::new(StatelessRetry::new(
                self.token_key.clone(),
                self.retry_token_lifetime,
            )),
        };
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ServerConfig")
            .field("crypto", &"ServerConfig { elided }")
            .field("token_key", &"[ elided ]")
            .field("use_retry", &self.use_retry)
            .field("retry_token_lifetime", &self.retry_token_lifetime)
            .field("accept_cookie", &self.accept_cookie.as_ref().map(|_| "Fn { elided }"))
            .field("max_accept_queue_size", &self.max_accept_queue_size)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

/// Configuration for outgoing connections
///
/// Default values should be suitable for most internet applications.
#[derive(Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Cryptographic configuration to use
    pub(crate) crypto: Arc<dyn crypto::ClientConfig>,
    /// Versions to offer, most preferred first
    pub(crate) versions: Vec<VersionNumber>,
    /// Name to authenticate the server as, overriding the one passed when dialing
    pub(crate) server_name: Option<String>,
    pub(crate) handshake_timeout: Duration,
}

impl ClientConfig {
    /// Create a default config with a particular cryptographic config
    pub fn new(crypto: Arc<dyn crypto::ClientConfig>) -> Self {
        Self {
            crypto,
            versions: version::DEFAULT_SUPPORTED_VERSIONS.to_vec(),
            server_name: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Create a client configuration that trusts the certificate authorities in `roots`
    pub fn with_root_certificates(
        roots: impl Into<Arc<rustls::RootCertStore>>,
    ) -> Result<Self, rustls::Error> {
        Ok(Self::new(Arc::new(
            crypto::rustls::QuicClientConfig::with_root_certificates(roots)?,
        )))
    }

    /// Versions to offer, most preferred first
    ///
    /// The first one is used for the initial attempt; the rest are only used if the server asks
    /// for a different version. Must be non-empty and free of reserved values.
    pub fn versions(&mut self, versions: Vec<VersionNumber>) -> Result<&mut Self, ConfigError> {
        check_versions(&versions)?;
        self.versions = versions;
        Ok(self)
    }

    /// Authenticate the server under `name` rather than the name passed when dialing
    pub fn server_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.server_name = Some(name.into());
        self
    }

    /// Get the current value of `server_name`
    pub fn get_server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// How long to wait for the server to admit a connection before giving up
    pub fn handshake_timeout(&mut self, value: Duration) -> &mut Self {
        self.handshake_timeout = value;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ClientConfig")
            .field("crypto", &"ClientConfig { elided }")
            .field("versions", &self.versions)
            .field("server_name", &self.server_name)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

fn check_versions(versions: &[VersionNumber]) -> Result<(), ConfigError> {
    if versions.is_empty() || versions.len() > u8::MAX as usize {
        return Err(ConfigError::OutOfBounds);
    }
    if let Some(&v) = versions.iter().find(|&&v| version::is_reserved(v)) {
        return Err(ConfigError::ReservedVersion(v));
    }
    Ok(())
}

/// Errors in the configuration of an endpoint
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Value exceeds supported bounds
    #[error("value exceeds supported bounds")]
    OutOfBounds,
    /// A version list named a value that may never be negotiated
    #[error("version {0:#010x} is reserved")]
    ReservedVersion(VersionNumber),
}
