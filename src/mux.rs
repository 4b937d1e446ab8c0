//! Request/reply multiplexing over one shared inbox subscription.
//!
//! Instead of subscribing once per request, the multiplexer mints a single
//! base inbox (`_INBOX.<random>.`) and subscribes to `<base>*`. Each request
//! gets a random token and publishes with reply subject `<base><token>`.
//! Arriving replies are routed back to the waiting caller by stripping the
//! base prefix and looking the token up in the pending table.
//!
//! # Resolution rules
//!
//! ```text
//! dispatch(msg)
//!   ├── subject not under base inbox ─────────► dropped
//!   ├── token not pending (late/cancelled) ───► dropped
//!   ├── status 503 ───────────────────────────► Err(NoResponders), retired
//!   ├── status >= 300 ────────────────────────► Err(RequestError), retired
//!   └── otherwise ────────────────────────────► Ok(msg)
//!                                               retired once max replies reached
//! ```
//!
//! Late replies are expected (they race local timeouts) and are never an
//! error.

// Rust guideline compliant 2026-02

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::error::{ErrorCode, NatsError};
use crate::inbox::TokenAllocator;
use crate::message::Message;

/// Outcome delivered to a request waiter.
pub type ReplyResult = Result<Message, NatsError>;

/// Completion side of a pending request.
#[derive(Debug)]
enum Resolver {
    /// Single reply; resolved exactly once.
    Once(oneshot::Sender<ReplyResult>),
    /// Stream of replies; ends when the sender is dropped.
    Many(mpsc::UnboundedSender<ReplyResult>),
}

/// One outstanding request/reply exchange. Owned by the table.
#[derive(Debug)]
struct PendingRequest {
    /// Replies delivered so far. Always starts at zero.
    received: usize,
    /// Retire the entry after this many replies.
    max_replies: Option<usize>,
    resolver: Resolver,
}

/// Handle returned when a request is registered.
#[derive(Debug)]
pub struct Registration<R> {
    /// Correlation token.
    pub token: String,
    /// Full reply subject to publish with.
    pub reply_subject: String,
    /// Receiving side for the reply (or replies).
    pub receiver: R,
}

/// Registration for a single-reply request.
pub type SingleRegistration = Registration<oneshot::Receiver<ReplyResult>>;

/// Registration for a multi-reply request.
pub type StreamRegistration = Registration<mpsc::UnboundedReceiver<ReplyResult>>;

/// Pending request table plus the shared inbox it routes for.
#[derive(Debug)]
pub struct RequestMultiplexer {
    allocator: TokenAllocator,
    base_inbox: Option<String>,
    requests: HashMap<String, PendingRequest>,
}

impl RequestMultiplexer {
    /// Multiplexer whose inbox will live under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            allocator: TokenAllocator::new(prefix),
            base_inbox: None,
            requests: HashMap::new(),
        }
    }

    /// Mint the base inbox. Must be called once, before any `register`.
    ///
    /// Calling it again is a programming error: debug builds panic, release
    /// builds keep the existing inbox so outstanding tokens stay routable.
    pub fn initialize(&mut self) -> &str {
        debug_assert!(
            self.base_inbox.is_none(),
            "RequestMultiplexer::initialize called twice"
        );
        let allocator = &self.allocator;
        let base = self.base_inbox.get_or_insert_with(|| allocator.base_inbox());
        log::debug!("[Mux] Initialized shared inbox {}", base);
        base
    }

    /// Whether `initialize` has run.
    pub fn is_initialized(&self) -> bool {
        self.base_inbox.is_some()
    }

    /// The base inbox (with trailing `.`), if initialized.
    pub fn base_inbox(&self) -> Option<&str> {
        self.base_inbox.as_deref()
    }

    /// Wildcard subject covering every reply subject.
    pub fn subscription_subject(&self) -> Option<String> {
        self.base_inbox.as_ref().map(|base| format!("{}*", base))
    }

    /// Register a single-reply request.
    pub fn register(&mut self, hint: Option<&str>) -> Result<SingleRegistration, NatsError> {
        let (tx, rx) = oneshot::channel();
        self.insert(hint, Some(1), Resolver::Once(tx), rx)
    }

    /// Register a request expecting up to `max_replies` replies
    /// (unbounded when `None`).
    pub fn register_many(
        &mut self,
        hint: Option<&str>,
        max_replies: Option<usize>,
    ) -> Result<StreamRegistration, NatsError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(hint, max_replies, Resolver::Many(tx), rx)
    }

    fn insert<R>(
        &mut self,
        hint: Option<&str>,
        max_replies: Option<usize>,
        resolver: Resolver,
        receiver: R,
    ) -> Result<Registration<R>, NatsError> {
        let Some(base) = self.base_inbox.as_deref() else {
            return Err(NatsError::new(
                ErrorCode::ProtocolError,
                "request multiplexer used before initialize",
            ));
        };

        // Collisions are astronomically unlikely, but uniqueness among live
        // tokens is an invariant, so redraw rather than overwrite.
        let mut token = self.allocator.token(hint);
        while self.requests.contains_key(&token) {
            token = self.allocator.token(hint);
        }
        let reply_subject = format!("{}{}", base, token);

        self.requests.insert(
            token.clone(),
            PendingRequest {
                received: 0,
                max_replies,
                resolver,
            },
        );
        log::trace!("[Mux] Registered token {} ({} pending)", token, self.requests.len());

        Ok(Registration {
            token,
            reply_subject,
            receiver,
        })
    }

    /// Remove a pending request without resolving it. No-op if absent.
    pub fn cancel(&mut self, token: &str) -> bool {
        let removed = self.requests.remove(token).is_some();
        if removed {
            log::trace!("[Mux] Cancelled token {}", token);
        }
        removed
    }

    /// Extract the token from a reply subject, if it lives under our inbox.
    pub fn token_for<'a>(&self, subject: &'a str) -> Option<&'a str> {
        let base = self.base_inbox.as_deref()?;
        subject.strip_prefix(base).filter(|token| !token.is_empty())
    }

    /// Route an inbound message to its pending request.
    ///
    /// Returns `true` if a waiter received it. Unknown or stale tokens are
    /// dropped silently.
    pub fn dispatch(&mut self, msg: Message) -> bool {
        let Some(token) = self.token_for(&msg.subject).map(str::to_owned) else {
            log::trace!("[Mux] Ignoring message outside inbox: {}", msg.subject);
            return false;
        };
        let Some(entry) = self.requests.get_mut(&token) else {
            log::trace!("[Mux] Dropping reply for unknown token {}", token);
            return false;
        };

        entry.received += 1;
        let result = match msg.status_error() {
            Some(err) => Err(err),
            None => Ok(msg),
        };
        let failed = result.is_err();
        let retire = match entry.resolver {
            Resolver::Once(_) => true,
            Resolver::Many(_) => {
                failed || entry.max_replies.is_some_and(|max| entry.received >= max)
            }
        };

        if !retire {
            let delivered = match &entry.resolver {
                Resolver::Many(tx) => tx.send(result).is_ok(),
                Resolver::Once(_) => false,
            };
            if !delivered {
                // Nobody is listening any more.
                self.requests.remove(&token);
                log::trace!("[Mux] Stream receiver for {} dropped, retired", token);
            }
            return true;
        }

        if let Some(entry) = self.requests.remove(&token) {
            let delivered = match entry.resolver {
                Resolver::Once(tx) => tx.send(result).is_ok(),
                Resolver::Many(tx) => tx.send(result).is_ok(),
            };
            if !delivered {
                log::trace!("[Mux] Waiter for {} already gone", token);
            }
        }
        true
    }

    /// Resolve every pending request with a timeout error and clear the table.
    ///
    /// Returns the number of requests resolved.
    pub fn close_all(&mut self) -> usize {
        let count = self.requests.len();
        for (_, entry) in self.requests.drain() {
            let err = NatsError::new(ErrorCode::Timeout, "timeout: connection closed");
            match entry.resolver {
                Resolver::Once(tx) => {
                    let _ = tx.send(Err(err));
                }
                Resolver::Many(tx) => {
                    let _ = tx.send(Err(err));
                }
            }
        }
        if count > 0 {
            log::debug!("[Mux] Closed {} pending requests", count);
        }
        count
    }

    /// Number of pending requests.
    pub fn size(&self) -> usize {
        self.requests.len()
    }
}
