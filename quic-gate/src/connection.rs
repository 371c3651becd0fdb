use std::{
    any::Any,
    fmt,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use pin_project_lite::pin_project;
use proto::{ConnectionError, ConnectionHandle, Side, TransportErrorCode, VersionNumber};
use tokio::sync::{oneshot, Notify};

use crate::{
    endpoint::{EndpointEvent, EndpointInner},
    mutex::Mutex,
};

pin_project! {
    /// In-progress connection attempt future
    ///
    /// Resolves once the server has admitted the connection, or with the reason it never will.
    /// Dropping it abandons the attempt.
    #[must_use = "futures/streams/sinks do nothing unless you `.await` or poll them"]
    pub struct Connecting {
        conn: Option<ConnectionRef>,
        #[pin]
        connected: oneshot::Receiver<Result<(), ConnectionError>>,
    }
}

impl Connecting {
    pub(crate) fn new(
        conn: ConnectionRef,
        connected: oneshot::Receiver<Result<(), ConnectionError>>,
    ) -> Self {
        Self {
            conn: Some(conn),
            connected,
        }
    }

    /// The peer's UDP address
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(|conn| conn.remote)
    }
}

impl Future for Connecting {
    type Output = Result<Connection, ConnectionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.connected.poll(cx));
        let conn = this.conn.take().expect("Connecting polled after completion");
        Poll::Ready(match result {
            Ok(Ok(())) => Ok(Connection(conn)),
            Ok(Err(e)) => Err(e),
            // The endpoint driver stopped without reaching a verdict
            Err(_) => Err(ConnectionError::LocallyClosed),
        })
    }
}

impl fmt::Debug for Connecting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connecting")
            .field("handle", &self.conn.as_ref().map(|conn| conn.handle))
            .field("remote", &self.remote_address())
            .finish_non_exhaustive()
    }
}

/// An established QUIC connection
///
/// May be cloned to obtain another handle to the same connection. Once every handle is dropped,
/// the connection is closed without error.
#[derive(Clone)]
pub struct Connection(ConnectionRef);

impl Connection {
    pub(crate) fn new(conn: ConnectionRef) -> Self {
        Self(conn)
    }

    /// Close the connection immediately, telling the peer `code` and `reason`
    ///
    /// Pending and future [`closed`](Self::closed) calls resolve with
    /// [`ConnectionError::LocallyClosed`].
    pub fn close(&self, code: TransportErrorCode, reason: &[u8]) {
        self.0
            .endpoint
            .close_connection(&self.0, code, Bytes::copy_from_slice(reason));
    }

    /// Wait for the connection to be closed for any reason
    pub async fn closed(&self) -> ConnectionError {
        loop {
            let notified = self.0.closed.notified();
            if let Some(error) = self.close_reason() {
                return error;
            }
            notified.await;
        }
    }

    /// If the connection is closed, the reason why
    pub fn close_reason(&self) -> Option<ConnectionError> {
        self.0.state.lock("close_reason").error.clone()
    }

    /// The QUIC version the connection was established with
    pub fn version(&self) -> VersionNumber {
        self.0.state.lock("version").version
    }

    /// The peer's UDP address
    pub fn remote_address(&self) -> SocketAddr {
        self.0.remote
    }

    /// Whether this side initiated the connection
    pub fn side(&self) -> Side {
        self.0.side
    }

    /// Parameters negotiated during the handshake
    ///
    /// The dynamic type returned is determined by the configured
    /// [`Session`](proto::crypto::Session). For the default `rustls` session, it can be
    /// [`downcast`](Box::downcast) to a [`HandshakeData`](proto::crypto::rustls::HandshakeData).
    /// Returns `None` once the connection is closed.
    pub fn handshake_data(&self) -> Option<Box<dyn Any>> {
        self.0
            .endpoint
            .state
            .lock("handshake_data")
            .inner
            .handshake_data(self.0.handle)
    }

    /// A stable identifier for this connection
    ///
    /// Peer addresses and connection IDs can change, but this value will remain fixed for as
    /// long as the connection exists.
    pub fn stable_id(&self) -> usize {
        self.0.handle.0 as usize
    }

    pub(crate) fn handle(&self) -> ConnectionHandle {
        self.0.handle
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.0.handle)
            .field("side", &self.0.side)
            .field("remote", &self.0.remote)
            .finish_non_exhaustive()
    }
}

/// Counted handle to a connection's shared state
///
/// Dropping the last one asks the endpoint driver to close the connection. That request is
/// posted over a channel so that dropping a handle never blocks on a lock.
pub(crate) struct ConnectionRef(Arc<ConnectionInner>);

impl ConnectionRef {
    pub(crate) fn new(inner: Arc<ConnectionInner>) -> Self {
        inner.ref_count.fetch_add(1, Ordering::Relaxed);
        Self(inner)
    }
}

impl Clone for ConnectionRef {
    fn clone(&self) -> Self {
        Self::new(self.0.clone())
    }
}

impl Drop for ConnectionRef {
    fn drop(&mut self) {
        if self.0.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Nothing to do if the driver is gone
            let _ = self
                .0
                .endpoint
                .events
                .send(EndpointEvent::Drained(self.0.handle));
        }
    }
}

impl std::ops::Deref for ConnectionRef {
    type Target = ConnectionInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub(crate) struct ConnectionInner {
    pub(crate) handle: ConnectionHandle,
    side: Side,
    remote: SocketAddr,
    endpoint: Arc<EndpointInner>,
    state: Mutex<State>,
    /// Signalled once `state.error` is set
    closed: Notify,
    /// Number of live `ConnectionRef`s
    ref_count: AtomicUsize,
}

struct State {
    version: VersionNumber,
    error: Option<ConnectionError>,
}

impl ConnectionInner {
    pub(crate) fn new(
        handle: ConnectionHandle,
        side: Side,
        remote: SocketAddr,
        version: VersionNumber,
        endpoint: Arc<EndpointInner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            side,
            remote,
            endpoint,
            state: Mutex::new(State {
                version,
                error: None,
            }),
            closed: Notify::new(),
            ref_count: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_version(&self, version: VersionNumber) {
        self.state.lock("set_version").version = version;
    }

    /// Record why the connection ended and wake everyone waiting on it
    ///
    /// Only the first reason is kept.
    pub(crate) fn terminate(&self, reason: ConnectionError) {
        let mut state = self.state.lock("terminate");
        if state.error.is_none() {
            state.error = Some(reason);
        }
        drop(state);
        self.closed.notify_waiters();
    }
}
