//! The connection's single control flow.
//!
//! One task owns the receiving ends of the transport-event and command
//! channels. Every lifecycle transition, topology merge and reply dispatch
//! happens here, one at a time, so the pending request table and the server
//! list never see two writers.
//!
//! ```text
//!                 ┌──────────── run_connection_loop ─────────────┐
//! transport ────► │ events   ─► dispatch / socket / info / ldm   │
//! Connection ───► │ commands ─► close / drain                    │ ──► StatusBus
//!                 │ tick     ─► drain progress                   │
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! Losing the socket suspends this task (not callers) in [`reconnect`] while
//! it walks the reconnection policy. Commands are still honoured there.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::state::ConnectionState;
use super::Inner;
use crate::constants::DRAIN_CHECK_INTERVAL;
use crate::error::{ErrorCode, NatsError};
use crate::servers::ServerAddr;
use crate::status::Status;
use crate::transport::{SocketEvent, TaggedEvent, TransportEvent};

/// Control request from a [`super::Connection`] handle.
#[derive(Debug)]
pub(crate) enum Command {
    /// Close now. `done` fires once the connection is closed.
    Close { done: Option<oneshot::Sender<()>> },
    /// Close once in-flight requests finish or the drain deadline passes.
    Drain {
        done: oneshot::Sender<Result<(), NatsError>>,
    },
}

/// Receiving ends owned by the loop task.
#[derive(Debug)]
pub(crate) struct LoopChannels {
    pub(crate) events: mpsc::UnboundedReceiver<TaggedEvent>,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
}

/// In-progress drain.
#[derive(Debug)]
struct Drain {
    deadline: Instant,
    done: oneshot::Sender<Result<(), NatsError>>,
}

/// Whether the loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Main control loop. Runs until the connection is closed.
pub(crate) async fn run_connection_loop(inner: Arc<Inner>, mut channels: LoopChannels) {
    let mut drain: Option<Drain> = None;

    let mut drain_check = tokio::time::interval(DRAIN_CHECK_INTERVAL);
    drain_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::debug!("[Connection] Control loop started");

    loop {
        if inner.state.get().is_closed() {
            break;
        }

        let flow = tokio::select! {
            Some((generation, event)) = channels.events.recv() => {
                if generation == inner.generation() {
                    handle_event(&inner, &mut channels, &mut drain, event).await
                } else {
                    log::trace!(
                        "[Connection] Ignoring event from stale socket (generation {})",
                        generation
                    );
                    Flow::Continue
                }
            }

            Some(command) = channels.commands.recv() => {
                handle_command(&inner, &mut drain, command).await
            }

            _ = drain_check.tick(), if drain.is_some() => {
                poll_drain(&inner, &mut drain).await
            }

            else => {
                log::debug!("[Connection] All channels closed");
                inner.shutdown().await;
                Flow::Exit
            }
        };

        if flow == Flow::Exit {
            break;
        }
    }

    // A close that overtook a drain still completes the drain.
    if let Some(pending) = drain.take() {
        let _ = pending.done.send(Ok(()));
    }
    log::info!("[Connection] Control loop exited");
}

async fn handle_command(inner: &Inner, drain: &mut Option<Drain>, command: Command) -> Flow {
    match command {
        Command::Close { done } => {
            inner.shutdown().await;
            if let Some(done) = done {
                let _ = done.send(());
            }
            Flow::Exit
        }
        Command::Drain { done } => {
            if !inner.state.transition(ConnectionState::Draining) {
                let err = inner
                    .state
                    .get()
                    .check_accepts_requests()
                    .err()
                    .unwrap_or_else(|| NatsError::for_code(ErrorCode::ConnectionDraining));
                let _ = done.send(Err(err));
                return Flow::Continue;
            }
            log::info!(
                "[Connection] Draining {} pending requests",
                inner.pending_requests()
            );
            *drain = Some(Drain {
                deadline: Instant::now() + inner.options.drain_deadline(),
                done,
            });
            poll_drain(inner, drain).await
        }
    }
}

/// Finish the drain if nothing is pending or the deadline passed.
async fn poll_drain(inner: &Inner, drain: &mut Option<Drain>) -> Flow {
    let Some(current) = drain.as_ref() else {
        return Flow::Continue;
    };

    let pending = inner.pending_requests();
    let expired = Instant::now() >= current.deadline;
    if pending > 0 && !expired {
        return Flow::Continue;
    }

    let Some(finished) = drain.take() else {
        return Flow::Continue;
    };
    let result = if pending == 0 {
        Ok(())
    } else {
        log::warn!(
            "[Connection] Drain deadline passed with {} requests pending",
            pending
        );
        Err(NatsError::new(ErrorCode::Timeout, "timeout: drain deadline exceeded"))
    };

    inner.shutdown().await;
    let _ = finished.done.send(result);
    Flow::Exit
}

async fn handle_event(
    inner: &Inner,
    channels: &mut LoopChannels,
    drain: &mut Option<Drain>,
    event: TransportEvent,
) -> Flow {
    match event {
        TransportEvent::Message(msg) => {
            inner.mux().dispatch(msg);
            Flow::Continue
        }

        TransportEvent::Socket(SocketEvent::Opened) => {
            log::debug!("[Connection] Socket opened");
            Flow::Continue
        }

        TransportEvent::Socket(SocketEvent::Closed) => {
            log::info!("[Connection] Socket closed");
            socket_lost(inner, channels, drain).await
        }

        TransportEvent::Socket(SocketEvent::Error { message, fatal }) => {
            log::warn!("[Connection] Socket error (fatal={}): {}", fatal, message);
            let err = NatsError::unknown(std::io::Error::other(message));
            inner.status.publish(Status::from_error(&err));
            if fatal {
                inner.transport.close().await;
                socket_lost(inner, channels, drain).await
            } else {
                Flow::Continue
            }
        }

        TransportEvent::ServerInfo { servers, is_update } => {
            apply_server_info(inner, &servers, is_update);
            Flow::Continue
        }

        TransportEvent::ShutdownWarning { server_id } => {
            log::warn!("[Connection] Server {} entered lame duck mode", server_id);
            inner.status.publish(Status::LameDuckMode { server_id });
            Flow::Continue
        }

        TransportEvent::ServerError { message } => {
            let code = classify_server_error(&message);
            log::warn!("[Connection] Server error ({}): {}", code, message);
            inner.status.publish(Status::Error { code, message });
            if code == ErrorCode::PermissionsViolation {
                return Flow::Continue;
            }
            inner.transport.close().await;
            socket_lost(inner, channels, drain).await
        }
    }
}

/// Map `-ERR` text to an error code.
fn classify_server_error(message: &str) -> ErrorCode {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permissions violation") {
        ErrorCode::PermissionsViolation
    } else if lower.contains("authorization violation") {
        ErrorCode::AuthorizationViolation
    } else {
        ErrorCode::ProtocolError
    }
}

fn apply_server_info(inner: &Inner, servers: &[String], is_update: bool) {
    if !inner.state.get().accepts_topology_updates() {
        log::trace!("[Connection] Ignoring server info in state {}", inner.state.get());
        return;
    }

    let announced: Vec<ServerAddr> = servers
        .iter()
        .filter_map(|s| match ServerAddr::parse(s) {
            Ok(addr) => Some(addr),
            Err(e) => {
                log::warn!("[Connection] Ignoring announced server {:?}: {}", s, e);
                None
            }
        })
        .collect();

    // Merge and publish under the topology lock so the event never precedes
    // the state it describes.
    let mut topology = inner.topology();
    if let Some(diff) = topology.merge(&announced, true) {
        if is_update {
            inner.status.publish(Status::from_diff(diff));
        }
    }
}

/// The active socket is gone: reconnect, finish a drain, or close.
async fn socket_lost(inner: &Inner, channels: &mut LoopChannels, drain: &mut Option<Drain>) -> Flow {
    if let Some(server) = inner.take_current_server() {
        inner.status.publish(Status::Disconnect { server });
    }

    if inner.state.get() == ConnectionState::Draining {
        log::info!("[Connection] Socket lost while draining, closing");
        let pending = inner.pending_requests();
        inner.shutdown().await;
        if let Some(finished) = drain.take() {
            let result = if pending == 0 {
                Ok(())
            } else {
                Err(NatsError::for_code(ErrorCode::Disconnect))
            };
            let _ = finished.done.send(result);
        }
        return Flow::Exit;
    }

    if !inner.policy.enabled {
        log::info!("[Connection] Reconnect disabled, closing");
        inner.shutdown().await;
        return Flow::Exit;
    }

    if !inner.state.transition(ConnectionState::Reconnecting) {
        return Flow::Exit;
    }
    reconnect(inner, channels).await
}

/// Walk the reconnection policy until a server accepts us, attempts run out,
/// or a command ends the connection.
async fn reconnect(inner: &Inner, channels: &mut LoopChannels) -> Flow {
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        if !inner.policy.allows(attempt) {
            log::warn!(
                "[Connection] Giving up after {} reconnection attempts",
                attempt - 1
            );
            inner.shutdown().await;
            return Flow::Exit;
        }

        inner.status.publish(Status::Reconnecting { attempt });

        let delay = inner.policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                Some(command) = channels.commands.recv() => {
                    command_without_socket(inner, command).await;
                    return Flow::Exit;
                }
            }
        }

        let Some(server) = inner.next_candidate() else {
            log::warn!("[Connection] No servers left to try");
            inner.shutdown().await;
            return Flow::Exit;
        };

        log::info!("[Connection] Reconnect attempt {} to {}", attempt, server);
        let outcome = tokio::select! {
            result = inner.open(&server) => result,
            Some(command) = channels.commands.recv() => {
                command_without_socket(inner, command).await;
                return Flow::Exit;
            }
        };

        match outcome {
            Ok(()) => {
                if !inner.state.transition(ConnectionState::Connected) {
                    return Flow::Exit;
                }
                inner.flush_outbound().await;
                inner.status.publish(Status::Reconnect { server });
                return Flow::Continue;
            }
            Err(e) => {
                log::warn!("[Connection] Reconnect attempt {} failed: {}", attempt, e);
            }
        }
    }
}

/// Without a socket nothing can finish, so a drain closes right away.
pub(crate) async fn command_without_socket(inner: &Inner, command: Command) {
    match command {
        Command::Close { done } => {
            inner.shutdown().await;
            if let Some(done) = done {
                let _ = done.send(());
            }
        }
        Command::Drain { done } => {
            inner.state.transition(ConnectionState::Draining);
            inner.shutdown().await;
            let _ = done.send(Ok(()));
        }
    }
}
