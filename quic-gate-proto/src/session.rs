use std::{any::Any, net::SocketAddr, time::Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

use crate::{
    config::ClientConfig,
    crypto,
    packet::Header,
    shared::ConnectionId,
    transport_parameters::TransportParameters,
    version::{self, VersionNumber},
    Side, TransportError, TransportErrorCode,
};

/// Admission state of a session
///
/// Server sessions come into existence in `Handshaking`, after the version and retry gates have
/// passed statelessly. `Queued` is only used by servers; clients move from `Completed` to
/// `Accepted` once the server confirms admission.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum State {
    /// First Initial sent, nothing heard back
    Initial,
    /// Initial resent with the token from a Retry
    Retrying,
    /// TLS handshake in progress
    Handshaking,
    /// TLS handshake finished, admission not yet decided
    Completed,
    /// Waiting in the accept queue
    Queued,
    /// Handed to the application
    Accepted,
    /// Terminated after or during use
    Closed,
    /// Terminated before it could be used
    Rejected,
}

impl State {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Rejected)
    }

    fn can_become(self, next: Self) -> bool {
        use State::*;
        matches!(
            (self, next),
            (Initial, Retrying)
                | (Initial | Retrying, Handshaking)
                | (Handshaking, Completed)
                | (Completed, Queued | Accepted)
                | (Queued, Accepted)
                | (Handshaking | Queued | Accepted, Closed)
                | (Initial | Retrying | Handshaking | Completed, Rejected)
        )
    }
}

/// Reasons why a connection might be lost
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The client and server share no QUIC version
    #[error("no compatible QUIC version")]
    NoCommonVersion,
    /// The TLS handshake or transport parameter validation failed
    #[error("handshake failed: {0}")]
    HandshakeFailed(TransportError),
    /// The server completed the handshake but its accept queue was full
    #[error("server rejected the connection: accept queue full")]
    AdmissionRejected,
    /// The listener was closed
    #[error("listener closed")]
    ListenerClosed,
    /// The peer closed the connection
    #[error("closed by peer: {0}")]
    ConnectionClosed(TransportError),
    /// The local application closed the connection
    #[error("closed")]
    LocallyClosed,
    /// The handshake did not complete in time
    #[error("timed out")]
    TimedOut,
}

impl ConnectionError {
    /// The transport error code that describes this failure on the wire, if any
    pub fn code(&self) -> Option<TransportErrorCode> {
        match self {
            Self::NoCommonVersion => Some(TransportErrorCode::VERSION_NEGOTIATION_ERROR),
            Self::AdmissionRejected => Some(TransportErrorCode::PEER_GOING_AWAY),
            Self::HandshakeFailed(e) | Self::ConnectionClosed(e) => Some(e.code),
            Self::ListenerClosed | Self::LocallyClosed | Self::TimedOut => None,
        }
    }

    /// Interpret a Close received from the server before the client was admitted
    pub(crate) fn from_early_close(error: TransportError) -> Self {
        match error.code {
            TransportErrorCode::PEER_GOING_AWAY => Self::AdmissionRejected,
            TransportErrorCode::VERSION_NEGOTIATION_ERROR => Self::NoCommonVersion,
            code if code.tls_alert().is_some() => Self::HandshakeFailed(error),
            _ => Self::ConnectionClosed(error),
        }
    }
}

/// Client-only bookkeeping
pub(crate) struct ClientState {
    pub(crate) config: ClientConfig,
    pub(crate) server_name: String,
    /// Token from the server's Retry, echoed in every later Initial
    pub(crate) token: Bytes,
    /// The first flight, kept for resending after a Retry
    pub(crate) initial_records: Vec<Bytes>,
    /// Whether a Version Negotiation packet has already been acted upon
    pub(crate) negotiated: bool,
}

/// One side of a connection being established
pub(crate) struct Session {
    pub(crate) side: Side,
    state: State,
    pub(crate) version: VersionNumber,
    pub(crate) remote: SocketAddr,
    /// Connection ID this side chose, routing the peer's packets to us
    pub(crate) loc_cid: ConnectionId,
    /// Connection ID the peer chose
    pub(crate) rem_cid: ConnectionId,
    /// Destination connection ID of the client's first Initial
    pub(crate) orig_dst_cid: ConnectionId,
    /// Source connection ID of the server's Retry, if the client was retried
    pub(crate) retry_src_cid: Option<ConnectionId>,
    /// Destination connection ID of the Initial that created a server session
    pub(crate) init_cid: Option<ConnectionId>,
    tls: Box<dyn crypto::Session>,
    peer_params_checked: bool,
    /// When to give up on a session that has not been admitted yet
    pub(crate) deadline: Option<Instant>,
    pub(crate) client: Option<ClientState>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_server(
        version: VersionNumber,
        remote: SocketAddr,
        loc_cid: ConnectionId,
        rem_cid: ConnectionId,
        init_cid: ConnectionId,
        orig_dst_cid: ConnectionId,
        retry_src_cid: Option<ConnectionId>,
        tls: Box<dyn crypto::Session>,
        deadline: Instant,
    ) -> Self {
        Self {
            side: Side::Server,
            state: State::Handshaking,
            version,
            remote,
            loc_cid,
            rem_cid,
            orig_dst_cid,
            retry_src_cid,
            init_cid: Some(init_cid),
            tls,
            peer_params_checked: false,
            deadline: Some(deadline),
            client: None,
        }
    }

    pub(crate) fn new_client(
        remote: SocketAddr,
        loc_cid: ConnectionId,
        rem_cid: ConnectionId,
        tls: Box<dyn crypto::Session>,
        client: ClientState,
        deadline: Instant,
    ) -> Self {
        Self {
            side: Side::Client,
            state: State::Initial,
            version: client.config.versions[0],
            remote,
            loc_cid,
            rem_cid,
            orig_dst_cid: rem_cid,
            retry_src_cid: None,
            init_cid: None,
            tls,
            peer_params_checked: false,
            deadline: Some(deadline),
            client: Some(client),
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn set_state(&mut self, next: State) {
        debug_assert!(
            self.state.can_become(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(side = %self.side, from = ?self.state, to = ?next, "state change");
        self.state = next;
        // A completed client still waits for the server's admission verdict
        if !matches!(
            next,
            State::Initial | State::Retrying | State::Handshaking | State::Completed
        ) {
            self.deadline = None;
        }
    }

    /// Whether the application has been told about this session
    pub(crate) fn is_surfaced(&self) -> bool {
        self.side.is_client() || matches!(self.state, State::Completed | State::Queued | State::Accepted)
    }

    /// Whether the session had been admitted before terminating
    pub(crate) fn is_established(&self) -> bool {
        matches!(self.state, State::Queued | State::Accepted)
    }

    pub(crate) fn is_handshaking(&self) -> bool {
        self.tls.is_handshaking()
    }

    pub(crate) fn header(&self) -> Header {
        Header {
            version: self.version,
            dst_cid: self.rem_cid,
            src_cid: self.loc_cid,
        }
    }

    pub(crate) fn handshake_data(&self) -> Option<Box<dyn Any>> {
        self.tls.handshake_data()
    }

    /// Start over with a new version and TLS session after Version Negotiation
    pub(crate) fn restart(&mut self, version: VersionNumber) -> Result<(), crate::ConnectError> {
        let client = self
            .client
            .as_mut()
            .expect("only clients restart after version negotiation");
        let params = TransportParameters::new(version, &client.config.versions);
        let mut tls = client
            .config
            .crypto
            .clone()
            .start_session(version, &client.server_name, &params)?;
        client.initial_records = write_records(&mut *tls);
        client.negotiated = true;
        self.tls = tls;
        self.version = version;
        Ok(())
    }

    /// Feed the peer's handshake records to TLS, returning the records to send in response
    ///
    /// `supported` is the local endpoint's version list, used for downgrade detection.
    pub(crate) fn read_records(
        &mut self,
        records: &[Bytes],
        supported: &[VersionNumber],
    ) -> Result<Vec<Bytes>, TransportError> {
        let mut out = Vec::new();
        for record in records {
            self.tls.read_handshake(record)?;
            if !self.peer_params_checked {
                if let Some(params) = self.tls.transport_parameters()? {
                    self.check_peer_params(&params, supported)?;
                    self.peer_params_checked = true;
                }
            }
            out.extend(write_records(&mut *self.tls));
        }
        Ok(out)
    }

    fn check_peer_params(
        &self,
        params: &TransportParameters,
        supported: &[VersionNumber],
    ) -> Result<(), TransportError> {
        let info = params
            .version_information
            .as_ref()
            .ok_or_else(|| TransportError::TRANSPORT_PARAMETER_ERROR("missing version information"))?;
        if info.chosen != self.version {
            return Err(TransportError::VERSION_NEGOTIATION_ERROR(
                "chosen version does not match the version in use",
            ));
        }
        match self.side {
            Side::Server => {
                // A client that was steered away from a version we both prefer was attacked
                if version::select(&info.available, supported) != Some(self.version) {
                    return Err(TransportError::VERSION_NEGOTIATION_ERROR(
                        "client was negotiated down to a less preferred version",
                    ));
                }
            }
            Side::Client => {
                if params.original_dst_cid != Some(self.orig_dst_cid) {
                    return Err(TransportError::TRANSPORT_PARAMETER_ERROR(
                        "original destination connection ID mismatch",
                    ));
                }
                if params.retry_src_cid != self.retry_src_cid {
                    return Err(TransportError::TRANSPORT_PARAMETER_ERROR(
                        "retry source connection ID mismatch",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Drain outgoing handshake bytes, one record per key epoch
pub(crate) fn write_records(tls: &mut dyn crypto::Session) -> Vec<Bytes> {
    let mut records = Vec::new();
    loop {
        let mut buf = Vec::new();
        let key_change = tls.write_handshake(&mut buf);
        if !buf.is_empty() {
            records.push(buf.into());
        }
        if !key_change {
            return records;
        }
    }
}
