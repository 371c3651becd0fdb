//! Wire format of connection-establishment packets
//!
//! Every packet starts with a long-header-style prefix: a type byte with the high bit set, a
//! 32-bit version, then length-prefixed destination and source connection IDs. A version of zero
//! marks a Version Negotiation packet regardless of the type bits. Payloads are not protected.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

use crate::{
    coding::{BufExt, BufMutExt, UnexpectedEnd},
    shared::ConnectionId,
    transport_error::Code,
    version::{VersionNumber, VERSION_NEGOTIATION},
    MIN_INITIAL_SIZE,
};

const LONG_HEADER_FORM: u8 = 0x80;

/// Type of a decoded packet
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PacketKind {
    /// First flight of a client, carrying its offered versions and optionally a retry token
    Initial = 0x0,
    /// Handshake records after the first flight
    Handshake = 0x1,
    /// Server request for address validation
    Retry = 0x2,
    /// Server confirmation that a completed session was admitted
    HandshakeDone = 0x3,
    /// Termination of a session, with a transport error code
    Close = 0x4,
    /// List of versions a server supports
    VersionNegotiate = 0xff,
}

impl PacketKind {
    fn from_byte(x: u8) -> Option<Self> {
        Some(match x & !LONG_HEADER_FORM {
            0x0 => Self::Initial,
            0x1 => Self::Handshake,
            0x2 => Self::Retry,
            0x3 => Self::HandshakeDone,
            0x4 => Self::Close,
            _ => return None,
        })
    }
}

/// Addressing information common to every packet
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Header {
    /// Version the sender is using; [`VERSION_NEGOTIATION`] for Version Negotiation packets
    pub version: VersionNumber,
    /// Connection ID chosen by the receiver, used to route the packet
    pub dst_cid: ConnectionId,
    /// Connection ID chosen by the sender
    pub src_cid: ConnectionId,
}

/// A decoded packet
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum Packet {
    Initial {
        header: Header,
        token: Bytes,
        /// Every version the client is willing to use, most preferred first
        offered: Vec<VersionNumber>,
        records: Vec<Bytes>,
    },
    Handshake {
        header: Header,
        records: Vec<Bytes>,
    },
    Retry {
        header: Header,
        token: Bytes,
    },
    HandshakeDone {
        header: Header,
    },
    Close {
        header: Header,
        code: Code,
        reason: Bytes,
    },
    VersionNegotiate {
        header: Header,
        versions: Vec<VersionNumber>,
    },
}

impl Packet {
    pub(crate) fn header(&self) -> &Header {
        match self {
            Self::Initial { header, .. }
            | Self::Handshake { header, .. }
            | Self::Retry { header, .. }
            | Self::HandshakeDone { header }
            | Self::Close { header, .. }
            | Self::VersionNegotiate { header, .. } => header,
        }
    }

    pub(crate) fn kind(&self) -> PacketKind {
        match self {
            Self::Initial { .. } => PacketKind::Initial,
            Self::Handshake { .. } => PacketKind::Handshake,
            Self::Retry { .. } => PacketKind::Retry,
            Self::HandshakeDone { .. } => PacketKind::HandshakeDone,
            Self::Close { .. } => PacketKind::Close,
            Self::VersionNegotiate { .. } => PacketKind::VersionNegotiate,
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        let header = self.header();
        let first = match self.kind() {
            // Type bits carry no meaning on Version Negotiation packets
            PacketKind::VersionNegotiate => LONG_HEADER_FORM | 0x7f,
            kind => LONG_HEADER_FORM | kind as u8,
        };
        buf.write(first);
        buf.write(header.version);
        header.dst_cid.encode_long(buf);
        header.src_cid.encode_long(buf);

        match self {
            Self::Initial {
                token,
                offered,
                records,
                ..
            } => {
                buf.write_len16_bytes(token);
                buf.write(offered.len() as u8);
                for &version in offered {
                    buf.write(version);
                }
                encode_records(records, buf);
                if buf.len() < MIN_INITIAL_SIZE {
                    buf.resize(MIN_INITIAL_SIZE, 0);
                }
            }
            Self::Handshake { records, .. } => encode_records(records, buf),
            Self::Retry { token, .. } => buf.write_len16_bytes(token),
            Self::HandshakeDone { .. } => {}
            Self::Close { code, reason, .. } => {
                buf.write(*code);
                buf.write_len16_bytes(reason);
            }
            Self::VersionNegotiate { versions, .. } => {
                for &version in versions {
                    buf.write(version);
                }
            }
        }
    }

    pub(crate) fn decode(mut buf: impl Buf) -> Result<Self, PacketDecodeError> {
        let first = buf.get::<u8>()?;
        if first & LONG_HEADER_FORM == 0 {
            return Err(PacketDecodeError::InvalidHeader("short header"));
        }
        let version = buf.get::<u32>()?;
        let dst_cid = ConnectionId::decode_long(&mut buf)
            .ok_or(PacketDecodeError::InvalidHeader("malformed destination CID"))?;
        let src_cid = ConnectionId::decode_long(&mut buf)
            .ok_or(PacketDecodeError::InvalidHeader("malformed source CID"))?;
        let header = Header {
            version,
            dst_cid,
            src_cid,
        };

        if version == VERSION_NEGOTIATION {
            if buf.remaining() % 4 != 0 {
                return Err(PacketDecodeError::InvalidHeader(
                    "version list is not a multiple of 4 bytes",
                ));
            }
            let mut versions = Vec::with_capacity(buf.remaining() / 4);
            while buf.has_remaining() {
                versions.push(buf.get::<u32>()?);
            }
            return Ok(Self::VersionNegotiate { header, versions });
        }

        let kind = PacketKind::from_byte(first)
            .ok_or(PacketDecodeError::InvalidHeader("unknown packet type"))?;
        Ok(match kind {
            PacketKind::Initial => {
                let token = buf.get_len16_bytes()?;
                let count = buf.get::<u8>()? as usize;
                let mut offered = Vec::with_capacity(count);
                for _ in 0..count {
                    offered.push(buf.get::<u32>()?);
                }
                let records = decode_records(&mut buf)?;
                // Anything left is padding
                Self::Initial {
                    header,
                    token,
                    offered,
                    records,
                }
            }
            PacketKind::Handshake => Self::Handshake {
                header,
                records: decode_records(&mut buf)?,
            },
            PacketKind::Retry => {
                let token = buf.get_len16_bytes()?;
                if token.is_empty() {
                    return Err(PacketDecodeError::InvalidHeader("empty retry token"));
                }
                Self::Retry { header, token }
            }
            PacketKind::HandshakeDone => Self::HandshakeDone { header },
            PacketKind::Close => Self::Close {
                header,
                code: buf.get()?,
                reason: buf.get_len16_bytes()?,
            },
            PacketKind::VersionNegotiate => unreachable!("identified by version"),
        })
    }
}

fn encode_records(records: &[Bytes], buf: &mut Vec<u8>) {
    debug_assert!(records.len() <= u8::MAX as usize);
    buf.write(records.len() as u8);
    for record in records {
        buf.write_len16_bytes(record);
    }
}

fn decode_records(buf: &mut impl Buf) -> Result<Vec<Bytes>, PacketDecodeError> {
    let count = buf.get::<u8>()? as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(buf.get_len16_bytes()?);
    }
    Ok(records)
}

/// Errors encountered while decoding a packet
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketDecodeError {
    /// The packet ended before all of its fields could be read
    #[error("truncated packet")]
    Truncated,
    /// The header is malformed
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
}

impl From<UnexpectedEnd> for PacketDecodeError {
    fn from(_: UnexpectedEnd) -> Self {
        Self::Truncated
    }
}
