//! Shared opaque connection handles.
//!
//! A handle carries a stable numeric id (its identity for every endpoint
//! table), the outbound frame queue drained by the connection's writer task,
//! and the lifecycle state cell. Handles are cheap to clone and are shared
//! between the endpoint and the transport; the endpoint never owns the
//! underlying socket.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Lifecycle of one WebSocket session. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Outbound instruction for the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOut {
    /// One encoded frame, sent as a text message.
    Frame(String),
    /// Close the connection with the given reason.
    Close { reason: String },
}

struct ConnInner {
    id: u64,
    tx: mpsc::UnboundedSender<WireOut>,
    state: Mutex<ConnectionState>,
    /// The JWT accepted at validation time, if any.
    token: Option<String>,
}

/// Cheap-clone handle naming one WebSocket session.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnInner>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving end of its outbound queue.
    ///
    /// The transport hands the receiver to the connection's writer task;
    /// tests drain it directly to observe the wire.
    pub fn new(id: u64, token: Option<String>) -> (Self, mpsc::UnboundedReceiver<WireOut>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(ConnInner {
                    id,
                    tx,
                    state: Mutex::new(ConnectionState::Opening),
                    token,
                }),
            },
            rx,
        )
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn token(&self) -> Option<&str> {
        self.inner.token.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.inner.state.lock() = state;
    }

    /// Queue one frame. Queuing order is the wire order for this connection.
    pub fn send(&self, frame: String) {
        if self.inner.tx.send(WireOut::Frame(frame)).is_err() {
            tracing::warn!(id = self.inner.id, "dropping frame for a finished connection");
        }
    }

    /// Ask the writer task to close the session.
    pub fn close(&self, reason: &str) {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Opening | ConnectionState::Open => {
                    *state = ConnectionState::Closing;
                }
                ConnectionState::Closing | ConnectionState::Closed => return,
            }
        }
        let _ = self.inner.tx.send(WireOut::Close {
            reason: reason.to_string(),
        });
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
