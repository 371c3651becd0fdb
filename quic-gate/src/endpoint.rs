use std::{
    fmt,
    future::pending,
    io, iter,
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use proto::{
    ClientConfig, ConnectError, ConnectionError, ConnectionHandle, EndpointConfig, Event,
    ServerConfig, Side, TransportErrorCode, VersionNumber,
};
use rustc_hash::FxHashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, info_span, trace, Instrument};

use crate::{
    accept_queue::AcceptQueue,
    connection::{Connecting, Connection, ConnectionInner, ConnectionRef},
    mutex::Mutex,
    RECV_BUF_SIZE,
};

/// A QUIC endpoint
///
/// An endpoint corresponds to a single UDP socket, may host many connections, and may act as
/// both client and server for different connections. Its I/O is performed by a task spawned on
/// the tokio runtime it was created in, which runs until the endpoint is closed, or until every
/// handle to it is dropped and no connection remains.
///
/// May be cloned to obtain another handle to the same endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub(crate) inner: EndpointRef,
}

impl Endpoint {
    /// Helper to construct an endpoint for use with outgoing connections only
    ///
    /// Must be called from within a tokio runtime context. Use an unspecified address such as
    /// `0.0.0.0:0` to let the system choose.
    pub fn client(addr: SocketAddr) -> io::Result<Self> {
        Self::new(EndpointConfig::default(), None, bind_socket(addr)?)
    }

    /// Helper to construct an endpoint for use with both incoming and outgoing connections
    ///
    /// Must be called from within a tokio runtime context.
    pub fn server(config: ServerConfig, addr: SocketAddr) -> io::Result<Self> {
        Self::new(EndpointConfig::default(), Some(config), bind_socket(addr)?)
    }

    /// Construct an endpoint with arbitrary configuration and a pre-bound socket
    ///
    /// Incoming connections are only accepted if `server_config` is set.
    pub fn new(
        config: EndpointConfig,
        server_config: Option<ServerConfig>,
        socket: std::net::UdpSocket,
    ) -> io::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "no tokio runtime found"))?;
        let _guard = runtime.enter();
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;
        let addr = socket.local_addr()?;

        let queue = server_config
            .as_ref()
            .map(|config| AcceptQueue::new(config.get_max_accept_queue_size()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(EndpointInner {
            socket,
            queue,
            events: events_tx,
            state: Mutex::new(State {
                inner: proto::Endpoint::new(Arc::new(config), server_config.map(Arc::new)),
                connecting: FxHashMap::default(),
                connections: FxHashMap::default(),
                ref_count: 1,
                closed: false,
                driver_lost: false,
            }),
        });
        runtime.spawn(drive(inner.clone(), events_rx).instrument(info_span!("endpoint", %addr)));
        Ok(Self {
            inner: EndpointRef(inner),
        })
    }

    /// Connect to a remote endpoint
    ///
    /// `server_name` must be covered by the certificate presented by the server, unless
    /// [`ClientConfig::server_name`] overrides it. May fail immediately due to configuration
    /// errors, or later if the connection could not be established.
    pub fn connect(
        &self,
        config: ClientConfig,
        addr: SocketAddr,
        server_name: &str,
    ) -> Result<Connecting, ConnectError> {
        let endpoint = &self.inner.0;
        let mut state = endpoint.state.lock("connect");
        if state.driver_lost {
            return Err(ConnectError::EndpointStopping);
        }
        let ch = state
            .inner
            .connect(Instant::now(), config, addr, server_name)?;
        let version = state
            .inner
            .version(ch)
            .expect("session was just created");
        let conn = endpoint.register(&mut state, ch, Side::Client, addr, version);
        let (connected_tx, connected_rx) = oneshot::channel();
        state.connecting.insert(ch, connected_tx);
        drop(state);
        endpoint.wake();
        Ok(Connecting::new(conn, connected_rx))
    }

    /// Wait for the next admitted incoming connection
    ///
    /// Fails with [`ConnectionError::ListenerClosed`] once the endpoint stops accepting, or
    /// immediately if it was created without a server configuration.
    pub async fn accept(&self) -> Result<Connection, ConnectionError> {
        let queue = self
            .inner
            .queue
            .as_ref()
            .ok_or(ConnectionError::ListenerClosed)?;
        let conn = queue.dequeue().await?;
        self.inner.state.lock("accept").inner.accepted(conn.handle());
        Ok(conn)
    }

    /// Get the local `SocketAddr` the underlying socket is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }

    /// Close all of this endpoint's connections immediately and cease accepting new ones
    ///
    /// Connections the application holds are closed with `code` and `reason` and their
    /// [`closed`](Connection::closed) futures resolve with [`ConnectionError::LocallyClosed`].
    /// Handshakes in progress are refused, and pending [`accept`](Self::accept) calls fail.
    pub fn close(&self, code: TransportErrorCode, reason: &[u8]) {
        let reason = Bytes::copy_from_slice(reason);
        let endpoint = &self.inner.0;
        let mut state = endpoint.state.lock("close");
        let handles = state.connections.keys().copied().collect::<Vec<_>>();
        for ch in handles {
            state.inner.close(ch, code, reason.clone());
            endpoint.lost(&mut state, ch, ConnectionError::LocallyClosed);
        }
        endpoint.shutdown(&mut state);
        drop(state);
        endpoint.wake();
    }

    /// Number of connections in any stage of their life, including handshakes in progress
    pub fn open_connections(&self) -> usize {
        self.inner.state.lock("open_connections").inner.open_sessions()
    }
}

/// Messages posted to the driver from outside it
#[derive(Debug)]
pub(crate) enum EndpointEvent {
    /// Every handle to a connection was dropped
    Drained(ConnectionHandle),
    /// State changed outside the driver; flush outgoing datagrams and check for idleness
    Wake,
}

/// State shared between every handle to an endpoint and its driver
pub(crate) struct EndpointInner {
    socket: UdpSocket,
    /// Present on endpoints that accept incoming connections
    queue: Option<AcceptQueue>,
    pub(crate) events: mpsc::UnboundedSender<EndpointEvent>,
    /// Lock order: this before the accept queue's, and before any connection's
    pub(crate) state: Mutex<State>,
}

pub(crate) struct State {
    pub(crate) inner: proto::Endpoint,
    /// Outgoing connections not yet admitted by the server
    connecting: FxHashMap<ConnectionHandle, oneshot::Sender<Result<(), ConnectionError>>>,
    /// Connections the application may hold a handle to
    connections: FxHashMap<ConnectionHandle, Arc<ConnectionInner>>,
    /// Number of live `EndpointRef`s
    ref_count: usize,
    /// Set once the endpoint stops accepting new connections
    closed: bool,
    driver_lost: bool,
}

impl State {
    fn is_idle(&self) -> bool {
        (self.ref_count == 0 || self.closed) && self.inner.open_sessions() == 0
    }
}

impl EndpointInner {
    /// Create the shared state for a connection the application will see
    fn register(
        self: &Arc<Self>,
        state: &mut State,
        ch: ConnectionHandle,
        side: Side,
        remote: SocketAddr,
        version: VersionNumber,
    ) -> ConnectionRef {
        let inner = ConnectionInner::new(ch, side, remote, version, self.clone());
        state.connections.insert(ch, inner.clone());
        ConnectionRef::new(inner)
    }

    fn handle_datagram(self: &Arc<Self>, remote: SocketAddr, data: &[u8]) {
        let mut state = self.state.lock("handle");
        let accept_queue_full = self.queue.as_ref().map_or(false, |q| q.is_full());
        if let Some((ch, event)) =
            state
                .inner
                .handle(Instant::now(), remote, BytesMut::from(data), accept_queue_full)
        {
            self.handle_event(&mut state, ch, event);
        }
    }

    fn handle_timeout(self: &Arc<Self>) {
        let mut state = self.state.lock("handle_timeout");
        for (ch, event) in state.inner.handle_timeout(Instant::now()) {
            self.handle_event(&mut state, ch, event);
        }
    }

    fn handle_endpoint_event(&self, event: EndpointEvent) {
        match event {
            EndpointEvent::Drained(ch) => {
                let mut state = self.state.lock("drained");
                trace!(id = %ch, "all handles dropped");
                state
                    .inner
                    .close(ch, TransportErrorCode::NO_ERROR, Bytes::new());
                state.connecting.remove(&ch);
                state.connections.remove(&ch);
            }
            EndpointEvent::Wake => {}
        }
    }

    fn handle_event(self: &Arc<Self>, state: &mut State, ch: ConnectionHandle, event: Event) {
        match event {
            Event::HandshakeCompleted => {
                let (Some(queue), Some(remote), Some(version)) = (
                    self.queue.as_ref(),
                    state.inner.remote_address(ch),
                    state.inner.version(ch),
                ) else {
                    state.inner.admit(ch, false);
                    return;
                };
                let conn = Connection::new(self.register(state, ch, Side::Server, remote, version));
                match queue.try_admit(conn) {
                    Ok(()) => state.inner.admit(ch, true),
                    Err(_) => {
                        state.connections.remove(&ch);
                        state.inner.admit(ch, false);
                    }
                }
            }
            Event::Connected => {
                debug!(id = %ch, "connected");
                if let (Some(conn), Some(version)) =
                    (state.connections.get(&ch), state.inner.version(ch))
                {
                    conn.set_version(version);
                }
                if let Some(connected) = state.connecting.remove(&ch) {
                    let _ = connected.send(Ok(()));
                }
            }
            Event::ConnectionLost(reason) => self.lost(state, ch, reason),
        }
    }

    /// Tell everyone interested in `ch` that it is gone
    fn lost(&self, state: &mut State, ch: ConnectionHandle, reason: ConnectionError) {
        debug!(id = %ch, "connection lost: {}", reason);
        if let Some(connected) = state.connecting.remove(&ch) {
            let _ = connected.send(Err(reason.clone()));
        }
        if let Some(conn) = state.connections.remove(&ch) {
            conn.terminate(reason);
        }
        if let Some(ref queue) = self.queue {
            queue.release(ch);
        }
    }

    /// Stop accepting, refuse handshakes in progress and fail whatever was admitted
    fn shutdown(&self, state: &mut State) {
        state.closed = true;
        for (ch, event) in state.inner.shutdown() {
            if let Event::ConnectionLost(reason) = event {
                self.lost(state, ch, reason);
            }
        }
        if let Some(ref queue) = self.queue {
            queue.close();
        }
    }

    pub(crate) fn close_listener(&self) {
        let mut state = self.state.lock("close_listener");
        if state.closed {
            return;
        }
        self.shutdown(&mut state);
        drop(state);
        self.wake();
    }

    pub(crate) fn close_connection(
        &self,
        conn: &ConnectionInner,
        code: TransportErrorCode,
        reason: Bytes,
    ) {
        let mut state = self.state.lock("close_connection");
        state.inner.close(conn.handle, code, reason);
        state.connecting.remove(&conn.handle);
        state.connections.remove(&conn.handle);
        conn.terminate(ConnectionError::LocallyClosed);
        drop(state);
        self.wake();
    }

    /// Send every datagram the protocol logic has queued
    async fn flush(&self) {
        let transmits = {
            let mut state = self.state.lock("poll_transmit");
            iter::from_fn(|| state.inner.poll_transmit()).collect::<Vec<_>>()
        };
        for transmit in transmits {
            if let Err(e) = self
                .socket
                .send_to(&transmit.contents, transmit.destination)
                .await
            {
                // An unreachable peer must not stall everyone else
                debug!("failed to send to {}: {}", transmit.destination, e);
            }
        }
    }

    fn wake(&self) {
        // Fails only once the driver has stopped, when there is nothing left to wake
        let _ = self.events.send(EndpointEvent::Wake);
    }
}

impl fmt::Debug for EndpointInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointInner")
            .field("socket", &self.socket)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

enum Wakeup {
    Recv(io::Result<(usize, SocketAddr)>),
    Event(EndpointEvent),
    Timeout,
}

/// Move datagrams between the socket and the protocol logic until the endpoint winds down
async fn drive(endpoint: Arc<EndpointInner>, mut events: mpsc::UnboundedReceiver<EndpointEvent>) {
    let mut buf = vec![0; RECV_BUF_SIZE];
    loop {
        let timeout = endpoint.state.lock("poll_timeout").inner.poll_timeout();
        let wakeup = tokio::select! {
            result = endpoint.socket.recv_from(&mut buf) => Wakeup::Recv(result),
            Some(event) = events.recv() => Wakeup::Event(event),
            () = sleep(timeout) => Wakeup::Timeout,
        };
        match wakeup {
            Wakeup::Recv(Ok((len, remote))) => endpoint.handle_datagram(remote, &buf[..len]),
            // Ignore ECONNRESET as it's undefined in QUIC and may be injected by an attacker
            Wakeup::Recv(Err(ref e)) if e.kind() == io::ErrorKind::ConnectionReset => {}
            Wakeup::Recv(Err(e)) => {
                error!("I/O error: {}", e);
                let mut state = endpoint.state.lock("driver failed");
                endpoint.shutdown(&mut state);
                state.driver_lost = true;
                return;
            }
            Wakeup::Event(event) => endpoint.handle_endpoint_event(event),
            Wakeup::Timeout => endpoint.handle_timeout(),
        }
        endpoint.flush().await;

        let mut state = endpoint.state.lock("idle");
        if state.is_idle() {
            state.driver_lost = true;
            debug!("driver stopped");
            return;
        }
    }
}

async fn sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => pending().await,
    }
}

/// Bind a UDP socket, accepting IPv4 traffic on IPv6 sockets where the platform allows it
fn bind_socket(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        if let Err(e) = socket.set_only_v6(false) {
            debug!(%e, "unable to make socket dual-stack");
        }
    }
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Counted handle to an endpoint's shared state
#[derive(Debug)]
pub(crate) struct EndpointRef(pub(crate) Arc<EndpointInner>);

impl Clone for EndpointRef {
    fn clone(&self) -> Self {
        self.0.state.lock("clone").ref_count += 1;
        Self(self.0.clone())
    }
}

impl Drop for EndpointRef {
    fn drop(&mut self) {
        let mut state = self.0.state.lock("drop");
        if let Some(x) = state.ref_count.checked_sub(1) {
            state.ref_count = x;
            if x == 0 {
                // The driver may now be idle
                drop(state);
                self.0.wake();
            }
        }
    }
}

impl std::ops::Deref for EndpointRef {
    type Target = EndpointInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
