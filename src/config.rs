//! Connection options.
//!
//! Options are consumed once, when a [`crate::Connection`] is constructed.
//! They deserialize from JSON using the same camelCase names other NATS
//! clients use (`maxReconnectAttempts`, `reconnectTimeWait`, ...), and can be
//! overridden from `NATS_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants;
use crate::error::{ErrorCode, NatsError};
use crate::servers::ServerAddr;

/// Construction-time configuration for a connection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectOptions {
    /// Seed servers, in preference order.
    pub servers: Vec<String>,
    /// Optional client name reported to the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether to reconnect automatically after the socket is lost.
    pub reconnect: bool,
    /// Reconnection attempts before giving up. Negative means unlimited.
    pub max_reconnect_attempts: i64,
    /// Delay between reconnection attempts, in milliseconds.
    pub reconnect_time_wait: u64,
    /// Keep the server list frozen at its initial value.
    pub ignore_cluster_updates: bool,
    /// Shuffle the seed servers once at construction.
    pub randomize: bool,
    /// Default request timeout, in milliseconds.
    pub timeout: u64,
    /// Maximum time `drain()` waits for in-flight requests, in milliseconds.
    pub drain_timeout: u64,
    /// Root of the shared reply subject namespace.
    pub inbox_prefix: String,
    /// Largest payload a request may carry, in bytes.
    pub max_payload: usize,
    /// User name. Mutually exclusive with `token`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password - NOT serialized.
    #[serde(skip_serializing)]
    pub pass: Option<String>,
    /// Auth token - NOT serialized.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            servers: vec![constants::DEFAULT_SERVER.to_string()],
            name: None,
            reconnect: true,
            max_reconnect_attempts: constants::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_time_wait: constants::DEFAULT_RECONNECT_TIME_WAIT_MS,
            ignore_cluster_updates: false,
            randomize: false,
            timeout: constants::DEFAULT_REQUEST_TIMEOUT_MS,
            drain_timeout: constants::DEFAULT_DRAIN_TIMEOUT_MS,
            inbox_prefix: constants::DEFAULT_INBOX_PREFIX.to_string(),
            max_payload: constants::DEFAULT_MAX_PAYLOAD,
            user: None,
            pass: None,
            token: None,
        }
    }
}

impl ConnectOptions {
    /// Options for the given seed servers, everything else default.
    pub fn with_servers<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse options from a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid connection options JSON")
    }

    /// Load options from a JSON file, then apply environment overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file {}", path.display()))?;
        let mut options = Self::from_json_str(&content)?;
        options.apply_env_overrides();
        Ok(options)
    }

    /// Apply `NATS_*` environment variable overrides.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(servers) = std::env::var("NATS_SERVERS") {
            let servers: Vec<String> = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !servers.is_empty() {
                self.servers = servers;
            }
        }

        if let Ok(reconnect) = std::env::var("NATS_RECONNECT") {
            if let Ok(flag) = reconnect.parse::<bool>() {
                self.reconnect = flag;
            }
        }

        if let Ok(attempts) = std::env::var("NATS_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<i64>() {
                self.max_reconnect_attempts = attempts;
            }
        }

        if let Ok(wait) = std::env::var("NATS_RECONNECT_TIME_WAIT") {
            if let Ok(wait) = wait.parse::<u64>() {
                self.reconnect_time_wait = wait;
            }
        }

        if let Ok(ignore) = std::env::var("NATS_IGNORE_CLUSTER_UPDATES") {
            if let Ok(flag) = ignore.parse::<bool>() {
                self.ignore_cluster_updates = flag;
            }
        }
    }

    /// Check preconditions and parse the seed server list.
    pub fn validate(&self) -> Result<Vec<ServerAddr>, NatsError> {
        if self.user.is_some() && self.token.is_some() {
            return Err(NatsError::for_code(ErrorCode::BadAuthentication));
        }
        crate::message::validate_subject(&self.inbox_prefix)?;

        let seeds = if self.servers.is_empty() {
            vec![constants::DEFAULT_SERVER.to_string()]
        } else {
            self.servers.clone()
        };
        seeds.iter().map(|s| ServerAddr::parse(s)).collect()
    }

    /// Reconnection attempt cap, `None` when unlimited.
    pub fn reconnect_attempt_limit(&self) -> Option<u64> {
        u64::try_from(self.max_reconnect_attempts).ok()
    }

    /// Delay between reconnection attempts.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_time_wait)
    }

    /// Default request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Drain deadline.
    pub fn drain_deadline(&self) -> Duration {
        Duration::from_millis(self.drain_timeout)
    }
}
