//! Server addresses, pool options, and anti-dogpiling policies.

use std::fmt;
use std::time::Duration;

use crate::connection::DEFAULT_READ_BUFFER_SIZE;

/// A memcache server: host plus port, with an optional stable id.
///
/// The ring is built from each server's string identity. By default that is
/// `host:port` (`[host]:port` for IPv6 literals); setting an explicit id
/// pins the ring placement so a host can be swapped in place without
/// remapping keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: String,
    port: u16,
    id: Option<String>,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerAddress {
            host: host.into(),
            port,
            id: None,
        }
    }

    /// Pin this server's ring identity to `id` instead of `host:port`.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.id {
            write!(f, "{id}")
        } else if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Sizing and timing knobs for per-server connection pools.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Connections opened eagerly when the pool is created.
    pub initial_pool_size: usize,
    /// Cap on retained idle connections. Acquisition never blocks on this;
    /// it bounds what the pool keeps, not what it hands out.
    pub max_pool_size: usize,
    /// How long a server stays marked down after a failure.
    pub mark_down_period: Duration,
    /// Socket connect timeout.
    pub connection_timeout: Duration,
    /// Per-read socket timeout.
    pub recv_timeout: Duration,
    /// Enable TCP_NODELAY.
    pub no_delay: bool,
    /// Connection read buffer size; rounded up to a power of two.
    pub read_buffer_size: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            initial_pool_size: 1,
            max_pool_size: 3,
            mark_down_period: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(1),
            no_delay: true,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Early-recache herd control.
///
/// When a read carries `R<ttl>` and the item's remaining TTL has dropped
/// below it, the server hands exactly one reader the win: that caller sees a
/// miss and repopulates, while everyone else keeps getting the still-valid
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecachePolicy {
    pub ttl: u32,
}

impl Default for RecachePolicy {
    fn default() -> Self {
        RecachePolicy { ttl: 30 }
    }
}

/// Miss-lease herd control for [`get_or_lease`](crate::CacheClient::get_or_lease).
///
/// On a miss the server vivifies an empty placeholder with `ttl` and hands
/// the lease to the first reader. Losers wait and retry up to
/// `miss_retries` times, sleeping `miss_retry_wait` scaled by
/// `wait_backoff_factor` per attempt and capped at `miss_max_retry_wait`.
/// Losers block while they wait; size the retry schedule accordingly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeasePolicy {
    pub ttl: u32,
    pub miss_retries: u32,
    pub miss_retry_wait: Duration,
    pub wait_backoff_factor: f64,
    pub miss_max_retry_wait: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        LeasePolicy {
            ttl: 30,
            miss_retries: 3,
            miss_retry_wait: Duration::from_secs(1),
            wait_backoff_factor: 1.2,
            miss_max_retry_wait: Duration::from_secs(5),
        }
    }
}

/// Serve-stale herd control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StalePolicy {
    /// When > 0, deletions mark the item stale for this many seconds
    /// instead of removing it; readers then do recache control over the
    /// stale value until a winner refreshes it.
    pub mark_stale_on_deletion_ttl: u32,
    /// When set, a CAS-mismatched set retries once with the mark-stale
    /// flag, storing the value as stale rather than losing it.
    pub mark_stale_on_cas_mismatch: bool,
}
