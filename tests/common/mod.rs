//! Shared helpers for integration tests.
//!
//! `MockTransport` stands in for the socket/protocol layer: connect outcomes
//! are scripted, outbound operations are captured on a channel, and tests
//! inject inbound traffic through the handle the connection handed over.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use nats_mux_core::{
    ConnectOptions, Connection, ConnectionState, ErrorCode, Headers, Message, NatsError, Outbound,
    ServerAddr, SocketEvent, Status, StatusStream, Transport, TransportHandle,
};

/// How long a test waits for something that should happen promptly.
pub const WAIT: Duration = Duration::from_secs(2);

/// Route log output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory transport.
pub struct MockTransport {
    /// Outcome of upcoming connect calls; `true` accepts. Empty accepts.
    script: Mutex<VecDeque<bool>>,
    handle: Mutex<Option<TransportHandle>>,
    connects: Mutex<Vec<ServerAddr>>,
    open: AtomicBool,
    closes: AtomicUsize,
    sent: mpsc::UnboundedSender<Outbound>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            handle: Mutex::new(None),
            connects: Mutex::new(Vec::new()),
            open: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            sent,
        });
        (transport, rx)
    }

    /// Queue connect outcomes.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// Handle of the most recent connect.
    pub fn handle(&self) -> TransportHandle {
        self.handle
            .lock()
            .unwrap()
            .clone()
            .expect("transport was never connected")
    }

    /// Servers connect was called with, in order.
    pub fn connect_attempts(&self) -> Vec<ServerAddr> {
        self.connects.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate losing the socket.
    pub fn drop_socket(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.handle().on_socket_event(SocketEvent::Closed);
    }

    /// Deliver a reply to `reply_subject`.
    pub fn reply(&self, reply_subject: &str, payload: impl Into<Bytes>) {
        self.handle()
            .on_message(Message::new(reply_subject, payload.into()));
    }

    /// Deliver a status-only reply (e.g. 503 no responders).
    pub fn reply_status(&self, reply_subject: &str, code: u16, description: &str) {
        self.handle().on_message(
            Message::new(reply_subject, Bytes::new())
                .with_headers(Headers::with_status(code, description)),
        );
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, server: &ServerAddr, handle: TransportHandle) -> Result<(), NatsError> {
        self.connects.lock().unwrap().push(server.clone());
        let accept = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if !accept {
            return Err(NatsError::new(
                ErrorCode::ConnectionRefused,
                format!("mock refused {}", server),
            ));
        }
        handle.on_socket_event(SocketEvent::Opened);
        *self.handle.lock().unwrap() = Some(handle);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, op: Outbound) -> Result<(), NatsError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NatsError::for_code(ErrorCode::Disconnect));
        }
        self.sent
            .send(op)
            .map_err(|_| NatsError::for_code(ErrorCode::Disconnect))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Options suited to tests: fast reconnects, the given seed servers.
pub fn test_options(servers: &[&str]) -> ConnectOptions {
    ConnectOptions {
        reconnect_time_wait: 0,
        ..ConnectOptions::with_servers(servers.iter().copied())
    }
}

/// Build and connect a connection over a fresh mock transport.
pub async fn connected(
    options: ConnectOptions,
) -> (Connection, Arc<MockTransport>, mpsc::UnboundedReceiver<Outbound>) {
    init_logging();
    let (transport, ops) = MockTransport::new();
    let connection = Connection::new(options, Arc::clone(&transport) as Arc<dyn Transport>).unwrap();
    connection.connect().await.unwrap();
    (connection, transport, ops)
}

/// Next outbound publish, skipping subscriptions. Returns
/// `(subject, reply_subject, payload)`.
pub async fn next_publish(ops: &mut mpsc::UnboundedReceiver<Outbound>) -> (String, String, Bytes) {
    loop {
        let op = tokio::time::timeout(WAIT, ops.recv())
            .await
            .expect("timed out waiting for a publish")
            .expect("transport dropped");
        if let Outbound::Publish {
            subject,
            reply,
            payload,
            ..
        } = op
        {
            return (subject, reply.expect("request without reply subject"), payload);
        }
    }
}

/// Next outbound subscribe subject, skipping publishes.
pub async fn next_subscribe(ops: &mut mpsc::UnboundedReceiver<Outbound>) -> String {
    loop {
        let op = tokio::time::timeout(WAIT, ops.recv())
            .await
            .expect("timed out waiting for a subscribe")
            .expect("transport dropped");
        if let Outbound::Subscribe { subject, .. } = op {
            return subject;
        }
    }
}

/// Next status event, failing the test instead of hanging.
pub async fn next_status(status: &mut StatusStream) -> Option<Status> {
    tokio::time::timeout(WAIT, status.next())
        .await
        .expect("timed out waiting for a status event")
}

/// Kind of the next status event.
pub async fn next_kind(status: &mut StatusStream) -> &'static str {
    next_status(status)
        .await
        .expect("status sequence ended early")
        .kind()
}

/// Wait until `connection` has `count` pending requests.
pub async fn wait_for_pending(connection: &Connection, count: usize) {
    tokio::time::timeout(WAIT, async {
        while connection.pending_requests() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pending request count never reached");
}

/// Wait until `connection` holds `count` publishes for the next socket.
pub async fn wait_for_queued(connection: &Connection, count: usize) {
    tokio::time::timeout(WAIT, async {
        while connection.queued_publishes() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queued publish count never reached");
}

/// Wait until `connection` is in `state`.
pub async fn wait_for_state(connection: &Connection, state: ConnectionState) {
    tokio::time::timeout(WAIT, async {
        while connection.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection never reached the expected state");
}
