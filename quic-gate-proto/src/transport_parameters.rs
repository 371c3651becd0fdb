//! Transport parameters exchanged inside the TLS handshake
//!
//! Each parameter is encoded as a 16-bit identifier, a 16-bit length and the value. Unknown
//! identifiers are skipped so peers can extend the set.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::{
    coding::{BufExt, BufMutExt, UnexpectedEnd},
    shared::ConnectionId,
    version::VersionNumber,
    Side, TransportError, MAX_CID_SIZE,
};

const ORIGINAL_DST_CID: u16 = 0x00;
const RETRY_SRC_CID: u16 = 0x10;
const VERSION_INFORMATION: u16 = 0x11;

/// Version information carried for downgrade protection
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VersionInformation {
    /// The version the sender is using for this handshake
    pub chosen: VersionNumber,
    /// All versions the sender is willing to use, most preferred first
    pub available: Vec<VersionNumber>,
}

/// Parameters advertised by one side of a connection
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TransportParameters {
    /// Destination connection ID of the client's first Initial; server only
    pub(crate) original_dst_cid: Option<ConnectionId>,
    /// Source connection ID of the Retry the server sent, if any; server only
    pub(crate) retry_src_cid: Option<ConnectionId>,
    pub(crate) version_information: Option<VersionInformation>,
}

impl TransportParameters {
    pub(crate) fn new(chosen: VersionNumber, available: &[VersionNumber]) -> Self {
        Self {
            original_dst_cid: None,
            retry_src_cid: None,
            version_information: Some(VersionInformation {
                chosen,
                available: available.to_vec(),
            }),
        }
    }

    /// Encode `TransportParameters` into buffer
    pub(crate) fn write<W: BufMut>(&self, w: &mut W) {
        if let Some(ref cid) = self.original_dst_cid {
            w.write(ORIGINAL_DST_CID);
            w.write_len16_bytes(cid);
        }
        if let Some(ref cid) = self.retry_src_cid {
            w.write(RETRY_SRC_CID);
            w.write_len16_bytes(cid);
        }
        if let Some(ref info) = self.version_information {
            w.write(VERSION_INFORMATION);
            w.write((4 + 4 * info.available.len()) as u16);
            w.write(info.chosen);
            for &v in &info.available {
                w.write(v);
            }
        }
    }

    /// Decode `TransportParameters` sent by the `side` peer from buffer
    pub(crate) fn read<R: Buf>(side: Side, r: &mut R) -> Result<Self, Error> {
        let mut params = Self::default();
        while r.has_remaining() {
            let id = r.get::<u16>()?;
            let mut value = r.get_len16_bytes()?;
            match id {
                ORIGINAL_DST_CID | RETRY_SRC_CID => {
                    if side.is_client() || value.len() > MAX_CID_SIZE {
                        return Err(Error::IllegalValue);
                    }
                    let slot = match id {
                        ORIGINAL_DST_CID => &mut params.original_dst_cid,
                        _ => &mut params.retry_src_cid,
                    };
                    if slot.replace(ConnectionId::new(&value)).is_some() {
                        return Err(Error::Malformed);
                    }
                }
                VERSION_INFORMATION => {
                    if params.version_information.is_some()
                        || value.len() < 4
                        || value.len() % 4 != 0
                    {
                        return Err(Error::Malformed);
                    }
                    let chosen = value.get::<u32>()?;
                    let mut available = Vec::with_capacity(value.remaining() / 4);
                    while value.has_remaining() {
                        available.push(value.get::<u32>()?);
                    }
                    params.version_information = Some(VersionInformation { chosen, available });
                }
                _ => {}
            }
        }
        Ok(params)
    }
}

/// Errors encountered while decoding `TransportParameters`
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum Error {
    /// Parameters that are semantically invalid
    #[error("parameter had illegal value")]
    IllegalValue,
    /// Catch-all error for problems while decoding transport parameters
    #[error("parameters were malformed")]
    Malformed,
}

impl From<Error> for TransportError {
    fn from(e: Error) -> Self {
        match e {
            Error::IllegalValue => Self::TRANSPORT_PARAMETER_ERROR("illegal value"),
            Error::Malformed => Self::TRANSPORT_PARAMETER_ERROR("malformed"),
        }
    }
}

impl From<UnexpectedEnd> for Error {
    fn from(_: UnexpectedEnd) -> Self {
        Self::Malformed
    }
}
