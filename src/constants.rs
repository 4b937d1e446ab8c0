//! Client-wide constants.
//!
//! Defaults for the options in [`crate::config::ConnectOptions`] and the
//! protocol values the core needs to recognise. Grouped by domain.

use std::time::Duration;

// ============================================================================
// Connection
// ============================================================================

/// Port used when a server address omits one.
pub const DEFAULT_PORT: u16 = 4222;

/// Server used when no servers are configured.
pub const DEFAULT_SERVER: &str = "127.0.0.1:4222";

/// Reconnection attempts before the connection is closed.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: i64 = 10;

/// Delay between reconnection attempts, in milliseconds.
pub const DEFAULT_RECONNECT_TIME_WAIT_MS: u64 = 2000;

/// Maximum time `drain()` waits for pending requests, in milliseconds.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 20_000;

/// How often a draining connection checks whether pending work finished.
pub const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Requests
// ============================================================================

/// Request timeout used by [`crate::Connection::request_default`], in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Root of the shared reply subject namespace.
pub const DEFAULT_INBOX_PREFIX: &str = "_INBOX";

/// Length of the random part of inbox and token names.
pub const TOKEN_LEN: usize = 22;

/// Largest payload accepted by default, in bytes (server default is 1MB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Subscription id of the shared reply inbox.
pub const INBOX_SID: u64 = 1;

/// Header status code meaning "no responders".
pub const NO_RESPONDERS_STATUS: u16 = 503;
