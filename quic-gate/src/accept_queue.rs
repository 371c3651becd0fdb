use std::collections::VecDeque;

use proto::{ConnectionError, ConnectionHandle};
use tokio::sync::Notify;
use tracing::trace;

use crate::{connection::Connection, mutex::Mutex};

/// Bounded FIFO of established connections awaiting [`Listener::accept`](crate::Listener::accept)
///
/// Lock order: the endpoint's lock, if needed at all, is taken before this queue's.
#[derive(Debug)]
pub(crate) struct AcceptQueue {
    state: Mutex<State>,
    capacity: usize,
    /// Signalled when a connection is admitted or the queue closes
    changed: Notify,
}

#[derive(Debug)]
struct State {
    queue: VecDeque<Connection>,
    closed: bool,
}

impl AcceptQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            changed: Notify::new(),
        }
    }

    /// Reserve a slot for `conn`, handing it back if there is none
    pub(crate) fn try_admit(&self, conn: Connection) -> Result<(), Connection> {
        let mut state = self.state.lock("try_admit");
        if state.closed || state.queue.len() >= self.capacity {
            return Err(conn);
        }
        trace!(id = %conn.handle(), len = state.queue.len() + 1, "queued");
        state.queue.push_back(conn);
        drop(state);
        self.changed.notify_one();
        Ok(())
    }

    /// Wait for the oldest admitted connection
    ///
    /// Fails with [`ConnectionError::ListenerClosed`] once the queue is closed, including for
    /// callers already waiting.
    pub(crate) async fn dequeue(&self) -> Result<Connection, ConnectionError> {
        loop {
            // Registered before checking so a close racing with the check still wakes us
            let changed = self.changed.notified();
            {
                let mut state = self.state.lock("dequeue");
                if let Some(conn) = state.queue.pop_front() {
                    return Ok(conn);
                }
                if state.closed {
                    return Err(ConnectionError::ListenerClosed);
                }
            }
            changed.await;
        }
    }

    /// Drop a queued connection that was lost before being accepted, freeing its slot
    pub(crate) fn release(&self, handle: ConnectionHandle) {
        let removed = {
            let mut state = self.state.lock("release");
            let index = state.queue.iter().position(|c| c.handle() == handle);
            index.and_then(|i| state.queue.remove(i))
        };
        if removed.is_some() {
            trace!(id = %handle, "released queue slot");
        }
    }

    /// Refuse further admissions, discard what is queued and wake every waiter
    pub(crate) fn close(&self) {
        let drained = {
            let mut state = self.state.lock("close");
            state.closed = true;
            state.queue.drain(..).collect::<Vec<_>>()
        };
        drop(drained);
        self.changed.notify_waiters();
    }

    pub(crate) fn is_full(&self) -> bool {
        self.state.lock("is_full").queue.len() >= self.capacity
    }
}
