//! Boundary with the socket/protocol layer.
//!
//! The core never touches sockets or wire bytes. A [`Transport`]
//! implementation connects to servers and writes [`Outbound`] operations;
//! in the other direction it reports what happened through the
//! [`TransportHandle`] it is given on every connect. All reports land on
//! one channel that the connection loop drains in order.
//!
//! ```text
//!   Transport ──TransportHandle──► mpsc<TransportEvent> ──► connection loop
//!       ▲                                                        │
//!       └──────────────── connect / send / close ────────────────┘
//! ```

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NatsError;
use crate::message::{Message, Outbound};
use crate::servers::ServerAddr;

/// Socket-level state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The socket finished opening.
    Opened,
    /// The socket closed.
    Closed,
    /// An I/O error. `fatal` errors are followed by the close path.
    Error {
        /// Error text.
        message: String,
        /// Whether the connection is unusable after this error.
        fatal: bool,
    },
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound application message (including replies to our inbox).
    Message(Message),
    /// Socket state change.
    Socket(SocketEvent),
    /// Server INFO with its announced cluster members.
    ServerInfo {
        /// Announced `connect_urls`.
        servers: Vec<String>,
        /// False for the INFO sent right after connecting.
        is_update: bool,
    },
    /// Lame duck mode warning.
    ShutdownWarning {
        /// Identity of the server that is shutting down.
        server_id: String,
    },
    /// `-ERR` sent by the server.
    ServerError {
        /// Raw error text.
        message: String,
    },
}

/// Event tagged with the connect attempt that produced it.
pub(crate) type TaggedEvent = (u64, TransportEvent);

/// Callback interface handed to the transport.
///
/// Each connect attempt gets a handle with a fresh generation; the
/// connection loop ignores reports from handles of earlier sockets. Cheap to
/// clone. Calls after the connection closed are dropped.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<TaggedEvent>,
    generation: u64,
}

impl TransportHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TaggedEvent>, generation: u64) -> Self {
        Self { tx, generation }
    }

    /// Connect attempt this handle belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn emit(&self, event: TransportEvent) {
        if self.tx.send((self.generation, event)).is_err() {
            log::trace!("[Transport] Connection loop gone, event dropped");
        }
    }

    /// Report an inbound message.
    pub fn on_message(&self, msg: Message) {
        self.emit(TransportEvent::Message(msg));
    }

    /// Report a socket state change.
    pub fn on_socket_event(&self, event: SocketEvent) {
        self.emit(TransportEvent::Socket(event));
    }

    /// Report a server INFO announcement.
    pub fn on_server_info(&self, servers: Vec<String>, is_update: bool) {
        self.emit(TransportEvent::ServerInfo { servers, is_update });
    }

    /// Report a lame duck mode warning.
    pub fn on_shutdown_warning(&self, server_id: impl Into<String>) {
        self.emit(TransportEvent::ShutdownWarning {
            server_id: server_id.into(),
        });
    }

    /// Report a `-ERR` from the server.
    pub fn on_server_error(&self, message: impl Into<String>) {
        self.emit(TransportEvent::ServerError {
            message: message.into(),
        });
    }

    /// Whether the connection loop is still listening.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Socket/protocol collaborator.
///
/// Implementations own exactly one active socket at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a socket to `server` and complete the handshake.
    ///
    /// Events for this socket must be reported through `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached or rejects the
    /// handshake.
    async fn connect(&self, server: &ServerAddr, handle: TransportHandle) -> Result<(), NatsError>;

    /// Write an outbound operation on the current socket.
    ///
    /// Request publishes issued while the connection is connecting or
    /// reconnecting are held by the connection and only reach `send` once
    /// `connect` has succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no open socket or the write fails.
    async fn send(&self, op: Outbound) -> Result<(), NatsError>;

    /// Close the current socket, if any.
    async fn close(&self);
}
