use std::{
    any::Any,
    collections::VecDeque,
    net::SocketAddr,
    sync::Arc,
    time::{Instant, SystemTime},
};

use bytes::{Bytes, BytesMut};
use rand::{rngs::StdRng, SeedableRng};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    config::{ClientConfig, EndpointConfig, ServerConfig},
    packet::{Header, Packet},
    session::{write_records, ClientState, ConnectionError, Session, State},
    shared::{ConnectionHandle, ConnectionId},
    token::Validation,
    transport_parameters::{TransportParameters, VersionInformation},
    version::{self, Negotiation, VersionNumber, GREASE},
    Side, Transmit, TransportError, TransportErrorCode, LOC_CID_LEN, MIN_INITIAL_SIZE,
};

/// The main entry point to the library
///
/// This object performs no I/O whatsoever. Instead, it consumes incoming datagrams and generates
/// outgoing datagrams and events. It owns the routing tables that map connection IDs to sessions
/// and every session's state, from the first Initial until the session terminates.
pub struct Endpoint {
    rng: StdRng,
    transmits: VecDeque<Transmit>,
    /// Identifies server sessions by the destination CID of the Initial that created them, so
    /// duplicates of that Initial don't spawn a second session
    connection_ids_initial: FxHashMap<ConnectionId, ConnectionHandle>,
    /// Identifies sessions by the connection ID this endpoint chose for them
    connection_ids: FxHashMap<ConnectionId, ConnectionHandle>,
    sessions: FxHashMap<ConnectionHandle, Session>,
    next_handle: u64,
    config: Arc<EndpointConfig>,
    server_config: Option<Arc<ServerConfig>>,
    /// Whether the endpoint refuses every new incoming session
    reject_new_connections: bool,
}

impl Endpoint {
    /// Create a new endpoint
    ///
    /// Incoming sessions are only accepted if `server_config` is set.
    pub fn new(config: Arc<EndpointConfig>, server_config: Option<Arc<ServerConfig>>) -> Self {
        let rng_seed = config.rng_seed;
        Self {
            rng: rng_seed.map_or_else(StdRng::from_entropy, StdRng::from_seed),
            transmits: VecDeque::new(),
            connection_ids_initial: FxHashMap::default(),
            connection_ids: FxHashMap::default(),
            sessions: FxHashMap::default(),
            next_handle: 0,
            config,
            server_config,
            reject_new_connections: false,
        }
    }

    /// Replace the server configuration, affecting new incoming sessions only
    pub fn set_server_config(&mut self, server_config: Option<Arc<ServerConfig>>) {
        self.server_config = server_config;
    }

    /// Get the next packet to transmit
    #[must_use]
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Process an incoming UDP datagram
    ///
    /// `accept_queue_full` reports whether the application's accept queue is currently at
    /// capacity; clients that still need to be retried are turned away when it is.
    pub fn handle(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        data: BytesMut,
        accept_queue_full: bool,
    ) -> Option<(ConnectionHandle, Event)> {
        let datagram_len = data.len();
        let packet = match Packet::decode(data.freeze()) {
            Ok(x) => x,
            Err(e) => {
                trace!("malformed packet: {}", e);
                return None;
            }
        };

        //
        // Handle packet on existing session, if any
        //

        let dst_cid = packet.header().dst_cid;
        let known_ch = self
            .connection_ids
            .get(&dst_cid)
            .or_else(|| match packet {
                Packet::Initial { .. } => self.connection_ids_initial.get(&dst_cid),
                _ => None,
            })
            .copied();
        if let Some(ch) = known_ch {
            return self.handle_session_packet(ch, remote, packet);
        }

        //
        // Potentially create a new session
        //

        match packet {
            Packet::Initial {
                header,
                token,
                offered,
                records,
            } => self.handle_first_packet(
                now,
                remote,
                datagram_len,
                header,
                &token,
                offered,
                &records,
                accept_queue_full,
            ),
            _ => {
                debug!("{:?} packet for unrecognized connection {}", packet.kind(), dst_cid);
                None
            }
        }
    }

    /// Initiate a connection
    pub fn connect(
        &mut self,
        now: Instant,
        config: ClientConfig,
        remote: SocketAddr,
        server_name: &str,
    ) -> Result<ConnectionHandle, ConnectError> {
        if self.reject_new_connections {
            return Err(ConnectError::EndpointStopping);
        }
        if remote.port() == 0 || remote.ip().is_unspecified() {
            return Err(ConnectError::InvalidRemoteAddress(remote));
        }
        let server_name = config.server_name.as_deref().unwrap_or(server_name).to_owned();
        let version = config.versions[0];
        let params = TransportParameters::new(version, &config.versions);
        let mut tls = config
            .crypto
            .clone()
            .start_session(version, &server_name, &params)?;
        let initial_records = write_records(&mut *tls);

        let loc_cid = self.new_cid();
        let rem_cid = ConnectionId::random(&mut self.rng, LOC_CID_LEN);
        let deadline = now + config.handshake_timeout;
        let session = Session::new_client(
            remote,
            loc_cid,
            rem_cid,
            tls,
            ClientState {
                config,
                server_name,
                token: Bytes::new(),
                initial_records,
                negotiated: false,
            },
            deadline,
        );
        let ch = self.add_session(session);
        trace!(id = %ch, %remote, version, "connecting");
        self.send_initial(ch);
        Ok(ch)
    }

    /// Record whether a session reported by [`Event::HandshakeCompleted`] found room in the
    /// accept queue
    ///
    /// Admitted sessions become `Queued` and the client is told with a HANDSHAKE_DONE; the rest
    /// are closed with `PEER_GOING_AWAY`.
    pub fn admit(&mut self, ch: ConnectionHandle, admitted: bool) {
        let session = match self.sessions.get_mut(&ch) {
            Some(x) if x.state() == State::Completed => x,
            _ => return,
        };
        if admitted {
            session.set_state(State::Queued);
            transmit(
                &mut self.transmits,
                session.remote,
                &Packet::HandshakeDone {
                    header: session.header(),
                },
            );
            trace!(id = %ch, "admitted");
        } else {
            debug!(id = %ch, "accept queue full; rejecting");
            self.terminate(
                ch,
                State::Rejected,
                Some(TransportError::PEER_GOING_AWAY("accept queue full")),
            );
        }
    }

    /// Note that the application has dequeued an admitted session
    pub fn accepted(&mut self, ch: ConnectionHandle) {
        if let Some(session) = self.sessions.get_mut(&ch) {
            if session.state() == State::Queued {
                session.set_state(State::Accepted);
            }
        }
    }

    /// Close a session, notifying the peer
    ///
    /// Stale handles are ignored.
    pub fn close(&mut self, ch: ConnectionHandle, code: TransportErrorCode, reason: Bytes) {
        let state = match self.sessions.get(&ch) {
            Some(x) if x.is_established() => State::Closed,
            Some(_) => State::Rejected,
            None => return,
        };
        let error = TransportError {
            code,
            reason: String::from_utf8_lossy(&reason).into_owned(),
        };
        self.terminate(ch, state, Some(error));
    }

    /// Stop accepting sessions and close every existing one
    ///
    /// Handshakes in progress are refused; admitted sessions are closed without error. Returns
    /// the sessions the application knew about, which are lost with
    /// [`ConnectionError::ListenerClosed`].
    pub fn shutdown(&mut self) -> Vec<(ConnectionHandle, Event)> {
        self.reject_new_connections = true;
        let handles = self.sessions.keys().copied().collect::<Vec<_>>();
        let mut lost = Vec::new();
        for ch in handles {
            let Some(session) = self.sessions.get(&ch) else {
                continue;
            };
            let surfaced = session.is_surfaced();
            let (state, error) = match session.state() {
                State::Queued | State::Accepted => (
                    State::Closed,
                    TransportError::NO_ERROR("listener closed"),
                ),
                State::Handshaking if session.side.is_server() => (
                    State::Closed,
                    TransportError::CONNECTION_REFUSED("listener closed"),
                ),
                _ => (
                    State::Rejected,
                    TransportError::CONNECTION_REFUSED("listener closed"),
                ),
            };
            self.terminate(ch, state, Some(error));
            if surfaced {
                lost.push((ch, Event::ConnectionLost(ConnectionError::ListenerClosed)));
            }
        }
        lost
    }

    /// Earliest time at which [`handle_timeout`](Self::handle_timeout) has work to do
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.sessions.values().filter_map(|s| s.deadline).min()
    }

    /// Abandon sessions that were not admitted in time
    ///
    /// The peer is told, so that it does not wait on a session that no longer exists.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<(ConnectionHandle, Event)> {
        let expired = self
            .sessions
            .iter()
            .filter(|(_, s)| s.deadline.map_or(false, |d| d <= now))
            .map(|(&ch, s)| (ch, s.side))
            .collect::<Vec<_>>();
        let mut lost = Vec::new();
        for (ch, side) in expired {
            debug!(id = %ch, "handshake timed out");
            let error = match side {
                Side::Server => TransportError::CONNECTION_REFUSED("handshake timed out"),
                Side::Client => TransportError::NO_ERROR("handshake timed out"),
            };
            if let Some(event) = self.lose(ch, State::Rejected, ConnectionError::TimedOut, Some(error)) {
                lost.push(event);
            }
        }
        lost
    }

    /// Current state of a session, or `None` once it has terminated
    pub fn state(&self, ch: ConnectionHandle) -> Option<State> {
        self.sessions.get(&ch).map(|s| s.state())
    }

    /// Version a session is using
    pub fn version(&self, ch: ConnectionHandle) -> Option<VersionNumber> {
        self.sessions.get(&ch).map(|s| s.version)
    }

    /// The peer's address
    pub fn remote_address(&self, ch: ConnectionHandle) -> Option<SocketAddr> {
        self.sessions.get(&ch).map(|s| s.remote)
    }

    /// Which side of the session this endpoint is
    pub fn side(&self, ch: ConnectionHandle) -> Option<Side> {
        self.sessions.get(&ch).map(|s| s.side)
    }

    /// Information negotiated by the TLS handshake
    ///
    /// See [`crypto::rustls::HandshakeData`](crate::crypto::rustls::HandshakeData) for the rustls
    /// implementation.
    pub fn handshake_data(&self, ch: ConnectionHandle) -> Option<Box<dyn Any>> {
        self.sessions.get(&ch)?.handshake_data()
    }

    /// Number of sessions tracked, in any state
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Access the configuration used by this endpoint
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Whether the endpoint accepts incoming sessions
    pub fn is_server(&self) -> bool {
        self.server_config.is_some()
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_first_packet(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        datagram_len: usize,
        header: Header,
        token: &[u8],
        offered: Vec<VersionNumber>,
        records: &[Bytes],
        accept_queue_full: bool,
    ) -> Option<(ConnectionHandle, Event)> {
        let server_config = match self.server_config {
            Some(ref x) => x.clone(),
            None => {
                debug!("ignoring Initial for unrecognized connection: not a server");
                return None;
            }
        };

        if datagram_len < MIN_INITIAL_SIZE {
            debug!(
                "ignoring short Initial of {} bytes from {}",
                datagram_len, remote
            );
            return None;
        }

        // Local CID used for stateless packets
        let temp_loc_cid = self.new_cid();

        if self.reject_new_connections {
            debug!("refusing connection from {}: endpoint is closing", remote);
            self.initial_close(
                remote,
                &header,
                &temp_loc_cid,
                TransportError::CONNECTION_REFUSED("listener closed"),
            );
            return None;
        }

        //
        // Version gate
        //

        let mut client_offered = Vec::with_capacity(offered.len() + 1);
        client_offered.push(header.version);
        client_offered.extend(offered.into_iter().filter(|&v| v != header.version));
        let version = match version::negotiate(&client_offered, &self.config.supported_versions) {
            Negotiation::Accept(v) => v,
            Negotiation::Negotiate => {
                trace!("sending version negotiation");
                let mut versions = Vec::with_capacity(self.config.supported_versions.len() + 1);
                // Grease with a reserved version
                versions.push(match header.version {
                    GREASE => 0x0a1a_2a4a,
                    _ => GREASE,
                });
                versions.extend_from_slice(&self.config.supported_versions);
                transmit(
                    &mut self.transmits,
                    remote,
                    &Packet::VersionNegotiate {
                        header: Header {
                            version: version::VERSION_NEGOTIATION,
                            dst_cid: header.src_cid,
                            src_cid: header.dst_cid,
                        },
                        versions,
                    },
                );
                return None;
            }
            Negotiation::Reject => {
                debug!(?client_offered, "no common version with {}", remote);
                self.initial_close(
                    remote,
                    &header,
                    &temp_loc_cid,
                    TransportError::VERSION_NEGOTIATION_ERROR("no common version"),
                );
                return None;
            }
        };

        //
        // Retry gate
        //

        let (orig_dst_cid, retry_src_cid) = if server_config.use_retry {
            let validator = &server_config.address_validator;
            match validator.validate(&remote, token, SystemTime::now()) {
                Validation::Valid {
                    orig_dst_cid: Some(orig_dst_cid),
                } => (orig_dst_cid, Some(header.dst_cid)),
                Validation::Valid { orig_dst_cid: None } => (header.dst_cid, None),
                validation if accept_queue_full => {
                    debug!(?validation, "accept queue full; turning away {}", remote);
                    self.initial_close(
                        remote,
                        &header,
                        &temp_loc_cid,
                        TransportError::PEER_GOING_AWAY("accept queue full"),
                    );
                    return None;
                }
                validation => {
                    trace!(?validation, "sending retry to {}", remote);
                    let token = validator.issue(&remote, &header.dst_cid, SystemTime::now());
                    transmit(
                        &mut self.transmits,
                        remote,
                        &Packet::Retry {
                            header: Header {
                                version,
                                dst_cid: header.src_cid,
                                src_cid: temp_loc_cid,
                            },
                            token: token.into(),
                        },
                    );
                    return None;
                }
            }
        } else {
            (header.dst_cid, None)
        };

        //
        // Allocate the session
        //

        let params = TransportParameters {
            original_dst_cid: Some(orig_dst_cid),
            retry_src_cid,
            version_information: Some(VersionInformation {
                chosen: version,
                available: self.config.supported_versions.clone(),
            }),
        };
        let tls = match server_config.crypto.clone().start_session(version, &params) {
            Ok(x) => x,
            Err(e) => {
                debug!("failed to start TLS session: {}", e);
                self.initial_close(remote, &header, &temp_loc_cid, e);
                return None;
            }
        };
        let loc_cid = self.new_cid();
        let session = Session::new_server(
            version,
            remote,
            loc_cid,
            header.src_cid,
            header.dst_cid,
            orig_dst_cid,
            retry_src_cid,
            tls,
            now + server_config.handshake_timeout,
        );
        let ch = self.add_session(session);
        trace!(id = %ch, icid = %header.dst_cid, %remote, "connection incoming");

        let session = self.sessions.get_mut(&ch)?;
        match session.read_records(records, &self.config.supported_versions) {
            Ok(out) => {
                if !out.is_empty() {
                    transmit(
                        &mut self.transmits,
                        remote,
                        &Packet::Handshake {
                            header: session.header(),
                            records: out,
                        },
                    );
                }
            }
            Err(e) => {
                debug!(id = %ch, "handshake failed: {}", e);
                self.terminate(ch, State::Rejected, Some(e));
            }
        }
        None
    }

    fn handle_session_packet(
        &mut self,
        ch: ConnectionHandle,
        remote: SocketAddr,
        packet: Packet,
    ) -> Option<(ConnectionHandle, Event)> {
        let session = self.sessions.get_mut(&ch)?;
        if session.remote != remote {
            debug!(id = %ch, "dropping packet from unexpected address {}", remote);
            return None;
        }
        let state = session.state();

        match (session.side, packet) {
            (_, Packet::Close { code, reason, .. }) => {
                let error = TransportError {
                    code,
                    reason: String::from_utf8_lossy(&reason).into_owned(),
                };
                debug!(id = %ch, "closed by peer: {}", error);
                let (next, reason) = match session.is_established() {
                    true => (State::Closed, ConnectionError::ConnectionClosed(error)),
                    false if session.side.is_client() => {
                        (State::Rejected, ConnectionError::from_early_close(error))
                    }
                    false => (State::Rejected, ConnectionError::ConnectionClosed(error)),
                };
                self.lose(ch, next, reason, None)
            }

            //
            // Server
            //
            (Side::Server, Packet::Handshake { records, .. }) if state == State::Handshaking => {
                match session.read_records(&records, &self.config.supported_versions) {
                    Ok(out) => {
                        if !out.is_empty() {
                            transmit(
                                &mut self.transmits,
                                remote,
                                &Packet::Handshake {
                                    header: session.header(),
                                    records: out,
                                },
                            );
                        }
                        if session.is_handshaking() {
                            return None;
                        }
                        session.set_state(State::Completed);
                        trace!(id = %ch, "handshake completed");
                        Some((ch, Event::HandshakeCompleted))
                    }
                    Err(e) => {
                        debug!(id = %ch, "handshake failed: {}", e);
                        self.terminate(ch, State::Rejected, Some(e));
                        None
                    }
                }
            }

            //
            // Client
            //
            (Side::Client, Packet::VersionNegotiate { versions, .. }) => {
                let client = session.client.as_ref()?;
                if state != State::Initial || client.negotiated {
                    trace!(id = %ch, "ignoring version negotiation in state {:?}", state);
                    return None;
                }
                if versions.contains(&session.version) {
                    debug!(id = %ch, "ignoring version negotiation listing the attempted version");
                    return None;
                }
                match version::select(&client.config.versions, &versions) {
                    Some(version) => {
                        debug!(id = %ch, "switching to version {:#x}", version);
                        if let Err(e) = session.restart(version) {
                            debug!(id = %ch, "failed to restart handshake: {}", e);
                            return self.lose(ch, State::Rejected, ConnectionError::NoCommonVersion, None);
                        }
                        self.send_initial(ch);
                        None
                    }
                    None => {
                        debug!(id = %ch, ?versions, "server offered no usable version");
                        self.lose(ch, State::Rejected, ConnectionError::NoCommonVersion, None)
                    }
                }
            }
            (Side::Client, Packet::Retry { header, token }) if state == State::Initial => {
                trace!(id = %ch, "retrying");
                let client = session.client.as_mut()?;
                client.token = token;
                session.rem_cid = header.src_cid;
                session.retry_src_cid = Some(header.src_cid);
                session.set_state(State::Retrying);
                self.send_initial(ch);
                None
            }
            (Side::Client, Packet::Handshake { header, records }) => {
                if matches!(state, State::Initial | State::Retrying) {
                    session.rem_cid = header.src_cid;
                    session.set_state(State::Handshaking);
                }
                match session.read_records(&records, &self.config.supported_versions) {
                    Ok(out) => {
                        if !out.is_empty() {
                            transmit(
                                &mut self.transmits,
                                remote,
                                &Packet::Handshake {
                                    header: session.header(),
                                    records: out,
                                },
                            );
                        }
                        if session.state() == State::Handshaking && !session.is_handshaking() {
                            trace!(id = %ch, "handshake completed; awaiting admission");
                            session.set_state(State::Completed);
                        }
                        None
                    }
                    Err(e) => {
                        debug!(id = %ch, "handshake failed: {}", e);
                        let next = match session.is_established() {
                            true => State::Closed,
                            false => State::Rejected,
                        };
                        self.lose(ch, next, ConnectionError::HandshakeFailed(e.clone()), Some(e))
                    }
                }
            }
            (Side::Client, Packet::HandshakeDone { .. }) if state == State::Completed => {
                session.set_state(State::Accepted);
                trace!(id = %ch, "admitted by server");
                Some((ch, Event::Connected))
            }

            (_, packet) => {
                trace!(id = %ch, "ignoring {:?} packet in state {:?}", packet.kind(), state);
                None
            }
        }
    }

    /// (Re)send a client's first flight
    fn send_initial(&mut self, ch: ConnectionHandle) {
        let Some(session) = self.sessions.get(&ch) else {
            return;
        };
        let Some(client) = session.client.as_ref() else {
            return;
        };
        let packet = Packet::Initial {
            header: session.header(),
            token: client.token.clone(),
            offered: client.config.versions.clone(),
            records: client.initial_records.clone(),
        };
        transmit(&mut self.transmits, session.remote, &packet);
    }

    /// Close a session that never existed, answering the Initial described by `header`
    fn initial_close(
        &mut self,
        destination: SocketAddr,
        header: &Header,
        local_id: &ConnectionId,
        reason: TransportError,
    ) {
        let version = match version::is_reserved(header.version) {
            true => self.config.supported_versions[0],
            false => header.version,
        };
        transmit(
            &mut self.transmits,
            destination,
            &Packet::Close {
                header: Header {
                    version,
                    dst_cid: header.src_cid,
                    src_cid: *local_id,
                },
                code: reason.code,
                reason: reason.reason.into(),
            },
        );
    }

    /// Terminate a session, telling the peer why if `error` is set, and report it to the
    /// application if it knew about it
    fn lose(
        &mut self,
        ch: ConnectionHandle,
        state: State,
        reason: ConnectionError,
        error: Option<TransportError>,
    ) -> Option<(ConnectionHandle, Event)> {
        let surfaced = self.sessions.get(&ch)?.is_surfaced();
        self.terminate(ch, state, error);
        surfaced.then_some((ch, Event::ConnectionLost(reason)))
    }

    fn terminate(&mut self, ch: ConnectionHandle, state: State, error: Option<TransportError>) {
        let Some(mut session) = self.sessions.remove(&ch) else {
            return;
        };
        if let Some(error) = error {
            transmit(
                &mut self.transmits,
                session.remote,
                &Packet::Close {
                    header: session.header(),
                    code: error.code,
                    reason: error.reason.into(),
                },
            );
        }
        session.set_state(state);
        self.connection_ids.remove(&session.loc_cid);
        if let Some(ref cid) = session.init_cid {
            self.connection_ids_initial.remove(cid);
        }
        trace!(id = %ch, ?state, "session removed");
    }

    fn add_session(&mut self, session: Session) -> ConnectionHandle {
        let ch = ConnectionHandle(self.next_handle);
        self.next_handle += 1;
        self.connection_ids.insert(session.loc_cid, ch);
        if let Some(cid) = session.init_cid {
            self.connection_ids_initial.insert(cid, ch);
        }
        self.sessions.insert(ch, session);
        ch
    }

    fn new_cid(&mut self) -> ConnectionId {
        loop {
            let cid = ConnectionId::random(&mut self.rng, LOC_CID_LEN);
            if !self.connection_ids.contains_key(&cid) {
                break cid;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn known_cids(&self) -> usize {
        self.connection_ids.len() + self.connection_ids_initial.len()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("rng", &self.rng)
            .field("transmits", &self.transmits.len())
            .field("connection_ids_initial", &self.connection_ids_initial)
            .field("connection_ids", &self.connection_ids)
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .field("server_config", &self.server_config)
            .field("reject_new_connections", &self.reject_new_connections)
            .finish()
    }
}

fn transmit(transmits: &mut VecDeque<Transmit>, destination: SocketAddr, packet: &Packet) {
    let mut buf = Vec::new();
    packet.encode(&mut buf);
    trace!(kind = ?packet.kind(), len = buf.len(), %destination, "queued packet");
    transmits.push_back(Transmit {
        destination,
        contents: buf.into(),
    });
}

/// Event resulting from processing a single datagram or timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A server session finished its TLS handshake and needs an admission decision
    ///
    /// Follow up with [`Endpoint::admit`].
    HandshakeCompleted,
    /// A client session was admitted by the server and is ready for use
    Connected,
    /// A session the application knew about terminated and its state was discarded
    ConnectionLost(ConnectionError),
}

/// Errors in the parameters being used to create a new connection
///
/// These arise before any I/O has been performed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The endpoint can no longer create new connections
    ///
    /// Indicates that a necessary component of the endpoint has been dropped or otherwise
    /// disabled.
    #[error("endpoint stopping")]
    EndpointStopping,
    /// The domain name supplied was malformed
    #[error("invalid DNS name: {0}")]
    InvalidServerName(String),
    /// The remote [`SocketAddr`] supplied was malformed
    ///
    /// Examples include attempting to connect to port 0, or using an inappropriate address family.
    #[error("invalid remote address: {0}")]
    InvalidRemoteAddress(SocketAddr),
    /// The TLS configuration could not be used to start a session
    #[error("unusable TLS configuration: {0}")]
    CryptoConfig(String),
}
