//! Connection lifecycle and the public client handle.
//!
//! A [`Connection`] owns one transport, one shared reply inbox and one
//! background control loop. Application code issues requests, observes
//! status events and triggers `close`/`drain` through the handle; the loop
//! reacts to transport signals and drives reconnection.
//!
//! # Example
//!
//! ```rust,ignore
//! let options = ConnectOptions::with_servers(["nats://127.0.0.1:4222"]);
//! let connection = Connection::new(options, Arc::new(my_transport))?;
//! connection.connect().await?;
//!
//! let mut status = connection.status();
//! let reply = connection
//!     .request("time.now", "", Duration::from_secs(1))
//!     .await?;
//! connection.drain().await?;
//! ```

// Rust guideline compliant 2026-02

mod event_loop;
pub mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::ConnectOptions;
use crate::constants::INBOX_SID;
use crate::error::{ErrorCode, NatsError};
use crate::message::{validate_subject, Message, Outbound};
use crate::mux::{ReplyResult, RequestMultiplexer};
use crate::servers::{ServerAddr, ServerTopology};
use crate::status::{Status, StatusBus, StatusStream};
use crate::transport::{TaggedEvent, Transport, TransportHandle};

use event_loop::{command_without_socket, run_connection_loop, Command, LoopChannels};
use state::{ConnectionState, ReconnectPolicy, StateCell};

/// State shared between the handles and the control loop.
pub(crate) struct Inner {
    pub(crate) options: ConnectOptions,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) status: StatusBus,
    pub(crate) state: StateCell,
    mux: Mutex<RequestMultiplexer>,
    topology: Mutex<ServerTopology>,
    current_server: Mutex<Option<ServerAddr>>,
    /// Publishes held back while no socket is open.
    outbound: Mutex<Vec<Outbound>>,
    generation: AtomicU64,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    commands_tx: mpsc::UnboundedSender<Command>,
    /// Taken by `connect`; still present means the loop never started.
    channels: Mutex<Option<LoopChannels>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("state", &self.state.get())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    pub(crate) fn mux(&self) -> MutexGuard<'_, RequestMultiplexer> {
        lock(&self.mux)
    }

    pub(crate) fn topology(&self) -> MutexGuard<'_, ServerTopology> {
        lock(&self.topology)
    }

    pub(crate) fn pending_requests(&self) -> usize {
        self.mux().size()
    }

    /// Generation of the most recent connect attempt.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn next_candidate(&self) -> Option<ServerAddr> {
        self.topology().next_candidate()
    }

    pub(crate) fn take_current_server(&self) -> Option<ServerAddr> {
        lock(&self.current_server).take()
    }

    /// Connect the transport to `server` and install the inbox subscription.
    pub(crate) async fn open(&self, server: &ServerAddr) -> Result<(), NatsError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = TransportHandle::new(self.events_tx.clone(), generation);

        log::info!("[Connection] Connecting to {}", server);
        self.transport.connect(server, handle).await?;

        let subject = self.mux().subscription_subject().ok_or_else(|| {
            NatsError::new(ErrorCode::ProtocolError, "shared inbox not initialized")
        })?;
        if let Err(e) = self
            .transport
            .send(Outbound::Subscribe {
                subject: subject.clone(),
                sid: INBOX_SID,
            })
            .await
        {
            log::warn!("[Connection] Failed to subscribe {}: {}", subject, e);
            self.transport.close().await;
            return Err(e);
        }
        log::debug!("[Connection] Subscribed shared inbox {}", subject);

        *lock(&self.current_server) = Some(server.clone());
        Ok(())
    }

    /// Hand `op` to the transport, or queue it while a connect attempt is
    /// in progress. Queued operations go out in order once a socket opens.
    pub(crate) async fn publish(&self, op: Outbound) -> Result<(), NatsError> {
        {
            let mut outbound = lock(&self.outbound);
            if matches!(
                self.state.get(),
                ConnectionState::Connecting | ConnectionState::Reconnecting
            ) {
                outbound.push(op);
                return Ok(());
            }
        }
        self.transport.send(op).await
    }

    /// Send everything queued while there was no socket.
    ///
    /// On a failed send the unsent operations go back to the front of the
    /// queue for the next successful connect.
    pub(crate) async fn flush_outbound(&self) {
        let queued = std::mem::take(&mut *lock(&self.outbound));
        if queued.is_empty() {
            return;
        }
        log::debug!("[Connection] Flushing {} queued publishes", queued.len());

        let mut queued = queued.into_iter();
        while let Some(op) = queued.next() {
            if let Err(e) = self.transport.send(op.clone()).await {
                log::warn!("[Connection] Queued publish not sent: {}", e);
                let mut outbound = lock(&self.outbound);
                let newer = std::mem::take(&mut *outbound);
                outbound.push(op);
                outbound.extend(queued);
                outbound.extend(newer);
                return;
            }
        }
    }

    /// Number of publishes waiting for a socket.
    pub(crate) fn queued_publishes(&self) -> usize {
        lock(&self.outbound).len()
    }

    /// Move to `closed`, fail every pending request and end the status
    /// sequence. Idempotent.
    pub(crate) async fn shutdown(&self) {
        if !self.state.transition(ConnectionState::Closed) {
            return;
        }
        let dropped = std::mem::take(&mut *lock(&self.outbound)).len();
        if dropped > 0 {
            log::warn!("[Connection] Dropping {} queued publishes", dropped);
        }
        let resolved = self.mux().close_all();
        self.transport.close().await;
        lock(&self.current_server).take();
        self.status.publish(Status::Close);
        self.status.terminate();
        log::info!(
            "[Connection] Closed ({} pending requests resolved)",
            resolved
        );
    }

    /// Whether the control loop has been started.
    fn loop_started(&self) -> bool {
        lock(&self.channels).is_none()
    }

    fn cancel(&self, token: &str) {
        self.mux().cancel(token);
    }

    fn check_payload(&self, payload: &Bytes) -> Result<(), NatsError> {
        if payload.len() > self.options.max_payload {
            return Err(NatsError::new(
                ErrorCode::InvalidPayload,
                format!(
                    "payload of {} bytes exceeds max payload of {} bytes",
                    payload.len(),
                    self.options.max_payload
                ),
            ));
        }
        Ok(())
    }
}

/// Sends a close command when the last [`Connection`] clone is dropped.
struct DropGuard {
    commands_tx: mpsc::UnboundedSender<Command>,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        let _ = self.commands_tx.send(Command::Close { done: None });
    }
}

/// Handle to one logical client connection.
///
/// Cheap to clone. The connection closes when [`Connection::close`] is
/// called or when the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.inner.state.get())
            .field("pending", &self.inner.pending_requests())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Build a connection over `transport`. Nothing is sent until
    /// [`Connection::connect`].
    ///
    /// Fails on invalid options (conflicting credentials, bad inbox prefix,
    /// unparseable server address).
    pub fn new(options: ConnectOptions, transport: Arc<dyn Transport>) -> Result<Self, NatsError> {
        let seeds = options.validate()?;
        let topology = ServerTopology::new(seeds, options.ignore_cluster_updates, options.randomize);

        let mut mux = RequestMultiplexer::new(options.inbox_prefix.clone());
        mux.initialize();

        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            policy: ReconnectPolicy::from_options(&options),
            status: StatusBus::new(),
            state: StateCell::new(),
            mux: Mutex::new(mux),
            topology: Mutex::new(topology),
            current_server: Mutex::new(None),
            outbound: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            events_tx,
            commands_tx: commands_tx.clone(),
            channels: Mutex::new(Some(LoopChannels { events, commands })),
            transport,
            options,
        });

        Ok(Self {
            inner,
            _guard: Arc::new(DropGuard { commands_tx }),
        })
    }

    /// Establish the initial connection and start the control loop.
    ///
    /// Each known server is tried once in order. If none accepts, the
    /// connection closes and `ConnectionRefused` is returned. A `close` or
    /// `drain` issued meanwhile abandons the attempt and connect fails with
    /// `ConnectionClosed`.
    pub async fn connect(&self) -> Result<(), NatsError> {
        let mut channels = lock(&self.inner.channels).take().ok_or_else(|| {
            NatsError::new(ErrorCode::ProtocolError, "connect called more than once")
        })?;

        if !self.inner.state.transition(ConnectionState::Connecting) {
            return Err(NatsError::for_code(ErrorCode::ConnectionClosed));
        }

        let attempts = self.inner.topology().len();
        let mut last_error = None;
        for _ in 0..attempts {
            let Some(server) = self.inner.next_candidate() else {
                break;
            };
            let outcome = tokio::select! {
                result = self.inner.open(&server) => result,
                Some(command) = channels.commands.recv() => {
                    command_without_socket(&self.inner, command).await;
                    return Err(NatsError::for_code(ErrorCode::ConnectionClosed));
                }
            };
            match outcome {
                Ok(()) => {
                    if !self.inner.state.transition(ConnectionState::Connected) {
                        self.inner.shutdown().await;
                        return Err(NatsError::for_code(ErrorCode::ConnectionClosed));
                    }
                    self.inner.flush_outbound().await;
                    self.inner.status.publish(Status::Connect { server });
                    tokio::spawn(run_connection_loop(Arc::clone(&self.inner), channels));
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("[Connection] Could not connect to {}: {}", server, e);
                    last_error = Some(e);
                }
            }
        }

        self.inner.shutdown().await;
        Err(match last_error {
            Some(e) => NatsError::with_source(ErrorCode::ConnectionRefused, e),
            None => NatsError::for_code(ErrorCode::ConnectionRefused),
        })
    }

    /// Send a request and wait for its reply.
    ///
    /// While the connection is (re)connecting the request is queued and
    /// published once a socket opens; its timeout keeps running meanwhile.
    /// Resolves with the reply, or fails with `NoResponders`,
    /// `RequestError` or `Timeout`. Input and state preconditions fail with
    /// `BadSubject`, `InvalidPayload`, `ConnectionClosed` or
    /// `ConnectionDraining` before anything is sent.
    pub async fn request(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Message, NatsError> {
        let payload = payload.into();
        validate_subject(subject)?;
        self.inner.check_payload(&payload)?;

        let registration = {
            let mut mux = self.inner.mux();
            self.inner.state.get().check_accepts_requests()?;
            mux.register(None)?
        };

        // Whatever happens below, the token must not outlive this call.
        let inner = Arc::clone(&self.inner);
        let _cancel = scopeguard::guard(registration.token, move |token| inner.cancel(&token));

        self.inner
            .publish(Outbound::Publish {
                subject: subject.to_string(),
                reply: Some(registration.reply_subject),
                headers: None,
                payload,
            })
            .await?;

        match tokio::time::timeout(timeout, registration.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NatsError::new(ErrorCode::Timeout, "timeout: connection closed")),
            Err(_) => Err(NatsError::for_code(ErrorCode::Timeout)),
        }
    }

    /// [`Connection::request`] with the configured default timeout.
    pub async fn request_default(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Message, NatsError> {
        self.request(subject, payload, self.inner.options.request_timeout())
            .await
    }

    /// Send a request and collect replies from several responders.
    ///
    /// The stream ends after `max_replies` replies (unbounded when `None`),
    /// after an error status (delivered as the last item), when `timeout`
    /// elapses, or when the connection closes.
    pub async fn request_many(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
        max_replies: Option<usize>,
        timeout: Duration,
    ) -> Result<ReplyStream, NatsError> {
        let payload = payload.into();
        validate_subject(subject)?;
        self.inner.check_payload(&payload)?;

        let registration = {
            let mut mux = self.inner.mux();
            self.inner.state.get().check_accepts_requests()?;
            mux.register_many(None, max_replies)?
        };

        let stream = ReplyStream {
            token: registration.token,
            receiver: registration.receiver,
            deadline: Instant::now() + timeout,
            inner: Arc::clone(&self.inner),
            finished: false,
        };

        self.inner
            .publish(Outbound::Publish {
                subject: subject.to_string(),
                reply: Some(registration.reply_subject),
                headers: None,
                payload,
            })
            .await?;

        Ok(stream)
    }

    /// New consumer of status events produced from now on.
    pub fn status(&self) -> StatusStream {
        self.inner.status.subscribe()
    }

    /// Known cluster members: configured servers first, then announced ones.
    pub fn current_servers(&self) -> Vec<ServerAddr> {
        self.inner.topology().list()
    }

    /// Server the active socket is connected to, if any.
    pub fn connected_server(&self) -> Option<ServerAddr> {
        lock(&self.inner.current_server).clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Options the connection was built with.
    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending_requests()
    }

    /// Number of request publishes waiting for a socket.
    pub fn queued_publishes(&self) -> usize {
        self.inner.queued_publishes()
    }

    /// Whether the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.get().is_closed()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| state.is_closed()).await;
    }

    /// Close the connection. Pending requests fail with `Timeout`, status
    /// consumers see `close` and then the end of the sequence. Idempotent.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        if !self.inner.loop_started() {
            self.inner.shutdown().await;
            return;
        }

        let (done, rx) = oneshot::channel();
        if self
            .inner
            .commands_tx
            .send(Command::Close { done: Some(done) })
            .is_err()
            || rx.await.is_err()
        {
            // Loop already gone.
            self.inner.shutdown().await;
        }
    }

    /// Stop accepting requests, let in-flight ones finish, then close.
    ///
    /// Fails with `ConnectionClosed` or `ConnectionDraining` if the
    /// connection is already closed or draining, and with `Timeout` if
    /// requests were still pending at the drain deadline.
    pub async fn drain(&self) -> Result<(), NatsError> {
        self.inner.state.get().check_accepts_requests()?;
        if !self.inner.loop_started() {
            self.inner.shutdown().await;
            return Ok(());
        }

        let (done, rx) = oneshot::channel();
        self.inner
            .commands_tx
            .send(Command::Drain { done })
            .map_err(|_| NatsError::for_code(ErrorCode::ConnectionClosed))?;
        rx.await
            .unwrap_or_else(|_| Err(NatsError::for_code(ErrorCode::ConnectionClosed)))
    }
}

/// Replies to a [`Connection::request_many`] call.
///
/// Dropping the stream cancels the request; later replies are discarded.
pub struct ReplyStream {
    token: String,
    receiver: mpsc::UnboundedReceiver<ReplyResult>,
    deadline: Instant,
    inner: Arc<Inner>,
    finished: bool,
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("token", &self.token)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ReplyStream {
    /// Next reply, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<ReplyResult> {
        if self.finished {
            return None;
        }
        match tokio::time::timeout_at(self.deadline, self.receiver.recv()).await {
            Ok(Some(item)) => {
                if item.is_err() {
                    self.finished = true;
                }
                Some(item)
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(_) => {
                log::trace!("[Mux] Reply stream {} timed out", self.token);
                self.finished = true;
                self.inner.cancel(&self.token);
                None
            }
        }
    }

    /// Correlation token of this request.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        self.inner.cancel(&self.token);
    }
}
