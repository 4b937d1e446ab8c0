//! Connection status events.
//!
//! The connection loop is the only producer. Consumers call
//! [`crate::Connection::status`] to get a [`StatusStream`] that sees every
//! event published after it was created, in order. There is no replay for
//! late subscribers.
//!
//! ```text
//! connection loop ──publish──┬──mpsc──> StatusStream (app task A)
//!                            └──mpsc──> StatusStream (app task B)
//! ```
//!
//! When the connection closes, the bus publishes [`Status::Close`] and drops
//! every sender. Every stream then drains what it has buffered and returns
//! `None`, including streams parked in `next().await`.

// Rust guideline compliant 2026-02

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::error::{ErrorCode, NatsError};
use crate::servers::{ServerAddr, TopologyDiff};

/// One lifecycle or topology transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Initial connection established.
    Connect {
        /// Server connected to.
        server: ServerAddr,
    },
    /// The socket was lost.
    Disconnect {
        /// Server that was lost.
        server: ServerAddr,
    },
    /// A reconnection attempt is starting.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u64,
    },
    /// A reconnection attempt succeeded.
    Reconnect {
        /// Server reconnected to.
        server: ServerAddr,
    },
    /// Cluster membership changed.
    Update {
        /// Servers that joined.
        added: Vec<ServerAddr>,
        /// Servers that left.
        removed: Vec<ServerAddr>,
    },
    /// A server entered lame duck mode and will shut down soon.
    LameDuckMode {
        /// Identity of the server that sent the warning.
        server_id: String,
    },
    /// A connection-level error.
    Error {
        /// Error kind.
        code: ErrorCode,
        /// Error text.
        message: String,
    },
    /// The connection closed. Always the final event.
    Close,
}

impl Status {
    /// Short type name: `connect`, `disconnect`, `reconnecting`, `reconnect`,
    /// `update`, `ldm`, `error`, `close`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Reconnect { .. } => "reconnect",
            Self::Update { .. } => "update",
            Self::LameDuckMode { .. } => "ldm",
            Self::Error { .. } => "error",
            Self::Close => "close",
        }
    }

    /// Error event from a [`NatsError`].
    pub fn from_error(err: &NatsError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.message().to_string(),
        }
    }

    /// Update event from a topology diff.
    pub fn from_diff(diff: TopologyDiff) -> Self {
        Self::Update {
            added: diff.added,
            removed: diff.removed,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { server }
            | Self::Disconnect { server }
            | Self::Reconnect { server } => write!(f, "{} {}", self.kind(), server),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            Self::Update { added, removed } => {
                write!(f, "update +{} -{}", added.len(), removed.len())
            }
            Self::LameDuckMode { server_id } => write!(f, "ldm {}", server_id),
            Self::Error { code, message } => write!(f, "error {}: {}", code, message),
            Self::Close => f.write_str("close"),
        }
    }
}

/// Single-producer, multi-consumer status broadcaster.
///
/// Every consumer owns an unbounded queue, so a slow consumer never loses an
/// event and never stalls the producer or its siblings.
#[derive(Debug)]
pub struct StatusBus {
    /// `None` once terminated.
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<Status>>>>,
}

impl StatusBus {
    /// Bus with no consumers yet.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    /// Publish an event to every live consumer. No-op after `terminate`.
    pub fn publish(&self, status: Status) {
        let mut guard = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(subscribers) => {
                log::debug!("[StatusBus] {}", status);
                // Consumers that dropped their stream fall out here.
                subscribers.retain(|tx| tx.send(status.clone()).is_ok());
            }
            None => log::trace!("[StatusBus] Dropping {} after termination", status),
        }
    }

    /// New consumer seeing events from now on.
    ///
    /// After termination the returned stream is already finished.
    pub fn subscribe(&self) -> StatusStream {
        let (tx, receiver) = mpsc::unbounded_channel();
        let mut guard = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = guard.as_mut() {
            subscribers.push(tx);
        }
        StatusStream { receiver }
    }

    /// End the sequence for every consumer. Idempotent.
    pub fn terminate(&self) {
        let mut guard = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = guard.take() {
            log::debug!("[StatusBus] Terminated ({} consumers)", subscribers.len());
        }
    }

    /// Whether `terminate` has run.
    pub fn is_terminated(&self) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Number of live consumers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |subscribers| subscribers.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One consumer's view of the status sequence.
///
/// # Example
///
/// ```rust,ignore
/// let mut status = connection.status();
/// while let Some(event) = status.next().await {
///     match event {
///         Status::LameDuckMode { server_id } => migrate_away_from(server_id),
///         Status::Close => break,
///         _ => {}
///     }
/// }
/// ```
#[derive(Debug)]
pub struct StatusStream {
    receiver: mpsc::UnboundedReceiver<Status>,
}

impl StatusStream {
    /// Next event, or `None` once the connection has closed and every
    /// buffered event was consumed.
    pub async fn next(&mut self) -> Option<Status> {
        self.receiver.recv().await
    }

    /// Next event if one is already buffered.
    pub fn try_next(&mut self) -> Option<Status> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn server() -> ServerAddr {
        ServerAddr::parse("a:1").unwrap()
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let bus = StatusBus::new();
        let mut stream = bus.subscribe();

        bus.publish(Status::Disconnect { server: server() });
        bus.publish(Status::Reconnecting { attempt: 1 });
        bus.publish(Status::Reconnect { server: server() });

        let kinds: Vec<&str> = [
            stream.next().await.unwrap(),
            stream.next().await.unwrap(),
            stream.next().await.unwrap(),
        ]
        .iter()
        .map(Status::kind)
        .collect();
        assert_eq!(kinds, vec!["disconnect", "reconnecting", "reconnect"]);
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = StatusBus::new();
        let mut early = bus.subscribe();
        bus.publish(Status::Connect { server: server() });

        let mut late = bus.subscribe();
        bus.publish(Status::Close);

        assert_eq!(early.next().await.unwrap().kind(), "connect");
        assert_eq!(early.next().await.unwrap().kind(), "close");
        assert_eq!(late.next().await.unwrap().kind(), "close");
        assert!(late.try_next().is_none());
    }

    #[tokio::test]
    async fn test_terminate_wakes_parked_consumer() {
        let bus = std::sync::Arc::new(StatusBus::new());
        let mut stream = bus.subscribe();

        let waiter = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(status) = stream.next().await {
                seen.push(status);
            }
            seen
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.publish(Status::Close);
        bus.terminate();

        let seen = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer should not hang")
            .unwrap();
        assert_eq!(seen, vec![Status::Close]);
    }

    #[tokio::test]
    async fn test_subscribe_after_terminate_is_finished() {
        let bus = StatusBus::new();
        bus.terminate();
        bus.terminate();
        assert!(bus.is_terminated());

        bus.publish(Status::Close);
        let mut stream = bus.subscribe();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_one_consumer_does_not_affect_others() {
        let bus = StatusBus::new();
        let mut keep = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);

        bus.publish(Status::LameDuckMode {
            server_id: "srv-1".to_string(),
        });
        assert_eq!(
            keep.next().await,
            Some(Status::LameDuckMode {
                server_id: "srv-1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_slow_consumer_loses_nothing() {
        let bus = StatusBus::new();
        let mut stream = bus.subscribe();
        bus.publish(Status::Disconnect { server: server() });
        for attempt in 1..=500 {
            bus.publish(Status::Reconnecting { attempt });
        }
        bus.publish(Status::Close);
        bus.terminate();

        assert_eq!(stream.next().await.unwrap().kind(), "disconnect");
        let mut attempts = Vec::new();
        while let Some(Status::Reconnecting { attempt }) = stream.next().await {
            attempts.push(attempt);
        }
        assert_eq!(attempts, (1..=500).collect::<Vec<u64>>());
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_dropped_consumers_are_pruned() {
        let bus = StatusBus::new();
        let _keep = bus.subscribe();
        let dropped = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(dropped);
        bus.publish(Status::Close);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Status::LameDuckMode { server_id: String::new() }.kind(), "ldm");
        assert_eq!(
            Status::from_error(&NatsError::for_code(ErrorCode::ProtocolError)).kind(),
            "error"
        );
        assert_eq!(Status::from_diff(TopologyDiff::default()).kind(), "update");
    }
}
