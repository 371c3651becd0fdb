//! Stateless address validation
//!
//! A server that wants proof that a client can receive datagrams at its claimed address answers
//! the first Initial with a Retry carrying a token. The token is authenticated with a key only the
//! server knows, so validating it later needs no per-client state.

use std::{
    fmt, io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::{Buf, BufMut};

use crate::{
    coding::{BufExt, BufMutExt},
    crypto::HmacKey,
    shared::ConnectionId,
};

/// Contents of a retry token
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RetryToken {
    /// The address the token was issued to
    pub remote_address: SocketAddr,
    /// When the token was issued, at one-second granularity
    pub issued: SystemTime,
    /// Destination connection ID of the client's first Initial
    pub orig_dst_cid: ConnectionId,
}

impl RetryToken {
    /// Serialize and authenticate the token under `key`
    pub fn encode(&self, key: &dyn HmacKey) -> Vec<u8> {
        let mut buf = Vec::new();
        match self.remote_address.ip() {
            IpAddr::V4(x) => {
                buf.write(4u8);
                buf.put_slice(&x.octets());
            }
            IpAddr::V6(x) => {
                buf.write(6u8);
                buf.put_slice(&x.octets());
            }
        }
        buf.write(self.remote_address.port());
        buf.write::<u64>(
            self.issued
                .duration_since(UNIX_EPOCH)
                .map(|x| x.as_secs())
                .unwrap_or(0),
        );
        self.orig_dst_cid.encode_long(&mut buf);

        let signature_pos = buf.len();
        buf.resize(signature_pos + key.signature_len(), 0);
        let (data, signature) = buf.split_at_mut(signature_pos);
        key.sign(data, signature);
        buf
    }

    /// Check the authenticator of `data` and decode it
    ///
    /// Returns `None` if the token was not produced under `key` or is malformed.
    pub fn decode(key: &dyn HmacKey, data: &[u8]) -> Option<Self> {
        let signature_pos = data.len().checked_sub(key.signature_len())?;
        let (body, signature) = data.split_at(signature_pos);
        key.verify(body, signature).ok()?;

        let mut reader = io::Cursor::new(body);
        let ip = match reader.get::<u8>().ok()? {
            4 if reader.remaining() >= 4 => {
                let mut octets = [0; 4];
                reader.copy_to_slice(&mut octets);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            6 if reader.remaining() >= 16 => {
                let mut octets = [0; 16];
                reader.copy_to_slice(&mut octets);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => return None,
        };
        let port = reader.get::<u16>().ok()?;
        let issued = UNIX_EPOCH + Duration::from_secs(reader.get::<u64>().ok()?);
        let orig_dst_cid = ConnectionId::decode_long(&mut reader)?;
        if reader.has_remaining() {
            return None;
        }
        Some(Self {
            remote_address: SocketAddr::new(ip, port),
            issued,
            orig_dst_cid,
        })
    }
}

/// Outcome of checking the token carried by a client Initial
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Validation {
    /// The client may proceed with the handshake
    Valid {
        /// Destination connection ID of the client's first Initial, if it was retried
        orig_dst_cid: Option<ConnectionId>,
    },
    /// No token was presented; the client must first be retried
    Required,
    /// A token was presented but did not check out
    Invalid,
}

/// Strategy deciding whether a client has proven ownership of its address
pub trait AddressValidator: Send + Sync {
    /// Produce a token to send in a Retry to `remote`
    fn issue(&self, remote: &SocketAddr, orig_dst_cid: &ConnectionId, now: SystemTime) -> Vec<u8>;

    /// Judge `token` received from `remote`; an empty token means none was presented
    fn validate(&self, remote: &SocketAddr, token: &[u8], now: SystemTime) -> Validation;
}

/// Require a Retry round trip, accepting tokens that are fresh and come from their issuee
pub struct StatelessRetry {
    key: Arc<dyn HmacKey>,
    lifetime: Duration,
}

impl StatelessRetry {
    /// Validate tokens under `key` that are at most `lifetime` old
    pub fn new(key: Arc<dyn HmacKey>, lifetime: Duration) -> Self {
        Self { key, lifetime }
    }
}

impl AddressValidator for StatelessRetry {
    fn issue(&self, remote: &SocketAddr, orig_dst_cid: &ConnectionId, now: SystemTime) -> Vec<u8> {
        RetryToken {
            remote_address: *remote,
            issued: now,
            orig_dst_cid: *orig_dst_cid,
        }
        .encode(&*self.key)
    }

    fn validate(&self, remote: &SocketAddr, token: &[u8], now: SystemTime) -> Validation {
        if token.is_empty() {
            return Validation::Required;
        }
        match RetryToken::decode(&*self.key, token) {
            Some(token)
                if token.remote_address == *remote && token.issued + self.lifetime > now =>
            {
                Validation::Valid {
                    orig_dst_cid: Some(token.orig_dst_cid),
                }
            }
            _ => Validation::Invalid,
        }
    }
}

impl fmt::Debug for StatelessRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatelessRetry")
            .field("key", &"[ elided ]")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// What an [`AcceptCookie`] predicate learns from a client's token
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Cookie {
    /// The address the token was issued to, which may differ from the current one
    pub remote_address: SocketAddr,
    /// When the token was issued
    pub issued: SystemTime,
}

/// Signature of the application-supplied decision used by [`AcceptCookie`]
pub type CookiePredicate = dyn Fn(&SocketAddr, Option<&Cookie>) -> bool + Send + Sync;

/// Defer the decision entirely to an application predicate
///
/// The predicate sees the client's current address and the authenticated contents of its token,
/// if it presented one that decodes. Returning `false` sends a Retry.
pub struct AcceptCookie {
    key: Arc<dyn HmacKey>,
    predicate: Arc<CookiePredicate>,
}

impl AcceptCookie {
    /// Construct a validator authenticating tokens under `key`
    pub fn new(key: Arc<dyn HmacKey>, predicate: Arc<CookiePredicate>) -> Self {
        Self { key, predicate }
    }
}

impl AddressValidator for AcceptCookie {
    fn issue(&self, remote: &SocketAddr, orig_dst_cid: &ConnectionId, now: SystemTime) -> Vec<u8> {
        RetryToken {
            remote_address: *remote,
            issued: now,
            orig_dst_cid: *orig_dst_cid,
        }
        .encode(&*self.key)
    }

    fn validate(&self, remote: &SocketAddr, token: &[u8], _now: SystemTime) -> Validation {
        let decoded = match token.is_empty() {
            true => None,
            false => RetryToken::decode(&*self.key, token),
        };
        let cookie = decoded.as_ref().map(|t| Cookie {
            remote_address: t.remote_address,
            issued: t.issued,
        });
        if (self.predicate)(remote, cookie.as_ref()) {
            return Validation::Valid {
                orig_dst_cid: decoded.map(|t| t.orig_dst_cid),
            };
        }
        match token.is_empty() {
            true => Validation::Required,
            false => Validation::Invalid,
        }
    }
}

impl fmt::Debug for AcceptCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptCookie")
            .field("key", &"[ elided ]")
            .finish_non_exhaustive()
    }
}
