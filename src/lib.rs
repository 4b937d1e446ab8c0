//! NATS Mux Core - connection lifecycle and request multiplexing.
//!
//! This crate provides the transport-independent core of a NATS-style
//! pub/sub client: one shared reply inbox for every request, a connection
//! state machine with automatic reconnection, cluster topology tracking and
//! an ordered stream of status events.
//!
//! # Architecture
//!
//! - **Connection** - Public handle; owns the control loop that serializes
//!   every state transition and reply dispatch
//! - **Mux** - Pending request table routed through one wildcard inbox
//!   subscription
//! - **Servers** - Known cluster members, merged from server announcements
//! - **Status** - Broadcast of lifecycle/topology events to any number of
//!   consumers
//! - **Transport** - Adapter trait the socket/protocol layer implements
//!
//! # Modules
//!
//! - [`connection`] - Lifecycle state machine and client handle
//! - [`mux`] - Request multiplexer
//! - [`servers`] - Server addresses and topology
//! - [`status`] - Status events and bus
//! - [`config`] - Connection options

// Library modules
pub mod connection;
pub mod mux;
pub mod servers;
pub mod status;
pub mod transport;

pub mod config;
pub mod constants;
pub mod error;
pub mod inbox;
pub mod message;

// Re-export commonly used types
pub use config::ConnectOptions;
pub use connection::state::{ConnectionState, ReconnectPolicy};
pub use connection::{Connection, ReplyStream};
pub use error::{ErrorCode, NatsError};
pub use message::{Headers, Message, Outbound};
pub use servers::{ServerAddr, TopologyDiff};
pub use status::{Status, StatusStream};
pub use transport::{SocketEvent, Transport, TransportEvent, TransportHandle};
