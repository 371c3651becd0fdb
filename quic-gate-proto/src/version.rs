//! Version numbers and the version negotiation decision
//!
//! Negotiation is a pure function of the client's offer and the server's configuration: the
//! client's first choice is taken when the server supports it, otherwise the server advertises
//! its own list and the client restarts with the most preferred version it finds there.

use tracing::trace;

/// 32-bit QUIC version tag
pub type VersionNumber = u32;

/// Marks a Version Negotiation packet; never a real version
pub const VERSION_NEGOTIATION: VersionNumber = 0x0000_0000;
/// Placeholder for a version that is not known
pub const UNKNOWN: VersionNumber = 0xffff_ffff;
/// QUIC version 1 (RFC 9000)
pub const V1: VersionNumber = 0x0000_0001;
/// QUIC version 2 (RFC 9369)
pub const V2: VersionNumber = 0x6b33_43cf;

/// Versions used when none are configured, most preferred first
pub const DEFAULT_SUPPORTED_VERSIONS: &[VersionNumber] = &[V1, V2];

/// Reserved version advertised alongside the real ones so clients keep tolerating unknown values
pub(crate) const GREASE: VersionNumber = 0x0a1a_2a3a;

/// Whether `version` follows the `0x?a?a?a?a` pattern reserved for greasing
pub fn is_grease(version: VersionNumber) -> bool {
    version & 0x0f0f_0f0f == 0x0a0a_0a0a
}

/// Whether `version` may never be negotiated
pub fn is_reserved(version: VersionNumber) -> bool {
    version == VERSION_NEGOTIATION || version == UNKNOWN || is_grease(version)
}

/// Outcome of comparing a client's offer against the versions a server supports
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Negotiation {
    /// The client's first choice is supported; the handshake proceeds with it
    Accept(VersionNumber),
    /// Another offered version is supported; answer with a Version Negotiation packet
    Negotiate,
    /// Nothing offered is supported
    Reject,
}

/// Decide how a server answers `client_offered`, listed in client preference order
pub fn negotiate(client_offered: &[VersionNumber], server_supported: &[VersionNumber]) -> Negotiation {
    let usable = |v: &VersionNumber| !is_reserved(*v) && server_supported.contains(v);
    let result = match client_offered.first() {
        Some(first) if usable(first) => Negotiation::Accept(*first),
        _ if client_offered.iter().any(usable) => Negotiation::Negotiate,
        _ => Negotiation::Reject,
    };
    trace!(?client_offered, ?server_supported, ?result, "negotiated");
    result
}

/// Client half of negotiation: its most preferred version that the server advertised
pub fn select(
    client_offered: &[VersionNumber],
    server_advertised: &[VersionNumber],
) -> Option<VersionNumber> {
    client_offered
        .iter()
        .copied()
        .find(|v| !is_reserved(*v) && server_advertised.contains(v))
}
