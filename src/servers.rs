//! Known cluster members.
//!
//! Seed servers come from [`crate::ConnectOptions`] and are *explicit*: they
//! stay in the list for the life of the connection. Servers learned from
//! server INFO announcements are *implicit* and disappear again when a later
//! announcement stops listing them.
//!
//! Reconnection walks the list round-robin via [`ServerTopology::next_candidate`].

use rand::seq::SliceRandom;
use std::fmt;

use crate::constants::DEFAULT_PORT;
use crate::error::{ErrorCode, NatsError};

/// Normalised `host:port` server address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddr {
    host: String,
    port: u16,
}

impl ServerAddr {
    /// Parse `host`, `host:port` or `scheme://host:port`.
    pub fn parse(input: &str) -> Result<Self, NatsError> {
        let trimmed = input.trim();
        let without_scheme = trimmed
            .split_once("://")
            .map_or(trimmed, |(_, rest)| rest);
        let hostport = without_scheme.trim_end_matches('/');

        if hostport.is_empty() {
            return Err(NatsError::new(
                ErrorCode::ConnectionRefused,
                format!("invalid server address: {:?}", input),
            ));
        }

        // IPv6 literals keep their brackets: [::1]:4222
        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !port.contains(']') => {
                let port = port.parse::<u16>().map_err(|e| {
                    NatsError::with_source(ErrorCode::ConnectionRefused, e)
                })?;
                (host, port)
            }
            _ => (hostport, DEFAULT_PORT),
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Servers added and removed by one announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    /// Newly known servers.
    pub added: Vec<ServerAddr>,
    /// Servers no longer known.
    pub removed: Vec<ServerAddr>,
}

impl TopologyDiff {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone)]
struct ServerEntry {
    addr: ServerAddr,
    /// Learned from an announcement rather than configured.
    implicit: bool,
}

/// Ordered set of known cluster members.
#[derive(Debug, Clone)]
pub struct ServerTopology {
    servers: Vec<ServerEntry>,
    ignore_updates: bool,
    /// Index of the next connect candidate.
    cursor: usize,
}

impl ServerTopology {
    /// Topology seeded with explicit servers. Duplicates are dropped.
    pub fn new(seeds: Vec<ServerAddr>, ignore_updates: bool, randomize: bool) -> Self {
        let mut servers: Vec<ServerEntry> = Vec::with_capacity(seeds.len());
        for addr in seeds {
            if !servers.iter().any(|s| s.addr == addr) {
                servers.push(ServerEntry {
                    addr,
                    implicit: false,
                });
            }
        }
        if randomize {
            servers.shuffle(&mut rand::rng());
        }
        Self {
            servers,
            ignore_updates,
            cursor: 0,
        }
    }

    /// Whether announcements are ignored.
    pub fn ignores_updates(&self) -> bool {
        self.ignore_updates
    }

    /// Merge an announced server list.
    ///
    /// `discovered` marks servers added here as implicit. Implicit servers
    /// missing from the announcement are removed; explicit ones never are.
    /// Returns `None` when tracking is disabled or nothing changed.
    pub fn merge(&mut self, announced: &[ServerAddr], discovered: bool) -> Option<TopologyDiff> {
        if self.ignore_updates {
            log::trace!("[Servers] Ignoring cluster update ({} servers)", announced.len());
            return None;
        }

        let mut diff = TopologyDiff::default();

        for addr in announced {
            if !self.servers.iter().any(|s| &s.addr == addr) && !diff.added.contains(addr) {
                diff.added.push(addr.clone());
            }
        }

        self.servers.retain(|entry| {
            let keep = !entry.implicit || announced.contains(&entry.addr);
            if !keep {
                diff.removed.push(entry.addr.clone());
            }
            keep
        });

        self.servers.extend(diff.added.iter().cloned().map(|addr| ServerEntry {
            addr,
            implicit: discovered,
        }));

        if diff.is_empty() {
            return None;
        }
        log::info!(
            "[Servers] Topology changed: +{} -{} (now {})",
            diff.added.len(),
            diff.removed.len(),
            self.servers.len()
        );
        Some(diff)
    }

    /// Current servers, configured ones first, then announced ones in the
    /// order they were learned. Connect attempts never reorder this list.
    pub fn list(&self) -> Vec<ServerAddr> {
        self.servers.iter().map(|s| s.addr.clone()).collect()
    }

    /// Number of known servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// True when no servers are known.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Next server to try, round-robin over the list.
    pub fn next_candidate(&mut self) -> Option<ServerAddr> {
        if self.servers.is_empty() {
            return None;
        }
        let index = self.cursor % self.servers.len();
        self.cursor = index + 1;
        self.servers.get(index).map(|s| s.addr.clone())
    }
}
