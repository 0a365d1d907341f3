//! Key routing and failure policy.
//!
//! The router owns the primary pool set (ketama ring plus one pool per
//! server) and, optionally, a gutter pool set that receives traffic when a
//! primary server fails, with TTLs shortened so the gutter never promotes
//! stale state. It also applies the per-call failure policy: raising server
//! errors or silencing them into miss/not-stored, and notifying the
//! write-failure hook for write-class operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use protocol_meta::{Command, Key, RequestFlags, Response};

use crate::config::{PoolOptions, ServerAddress};
use crate::connection::SocketFactory;
use crate::error::Error;
use crate::events::WriteFailureHook;
use crate::executor;
use crate::pool::{ConnectionPool, PoolCounters};
use crate::ring::Ring;

/// Per-call failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureHandling {
    /// Notify the write-failure hook when a write-class operation fails.
    pub track_write_failures: bool,
    /// Override the client's `raise_on_server_error` default for this call.
    pub raise_on_server_error: Option<bool>,
}

impl Default for FailureHandling {
    fn default() -> Self {
        FailureHandling {
            track_write_failures: true,
            raise_on_server_error: None,
        }
    }
}

impl FailureHandling {
    /// Failure handling that skips write-failure notification.
    pub fn untracked() -> Self {
        FailureHandling {
            track_write_failures: false,
            raise_on_server_error: None,
        }
    }
}

/// A ring plus one connection pool per server.
pub(crate) struct PoolSet {
    servers: Vec<ServerAddress>,
    pools: Vec<ConnectionPool>,
    ring: Ring,
}

impl PoolSet {
    pub fn new(
        mut servers: Vec<ServerAddress>,
        factory: &Arc<dyn SocketFactory>,
        options: &PoolOptions,
    ) -> Self {
        servers.sort();
        servers.dedup();
        let ring = Ring::build(&servers);
        let pools = servers
            .iter()
            .map(|server| ConnectionPool::new(server.clone(), Arc::clone(factory), options))
            .collect();
        PoolSet {
            servers,
            pools,
            ring,
        }
    }

    #[inline]
    fn route(&self, key: &Key) -> usize {
        self.ring.route(key.routing_token())
    }

    #[inline]
    fn pool_for(&self, key: &Key) -> &ConnectionPool {
        &self.pools[self.route(key)]
    }

    fn counters(&self, out: &mut BTreeMap<ServerAddress, PoolCounters>) {
        for (server, pool) in self.servers.iter().zip(&self.pools) {
            out.insert(server.clone(), pool.counters());
        }
    }
}

pub(crate) struct Router {
    primary: PoolSet,
    gutter: Option<PoolSet>,
    gutter_ttl: u32,
    raise_on_server_error: bool,
    /// A failed touch (`mg` with `T<ttl>`) with a TTL at or below this
    /// counts as a write failure: the server missed a deadline extension.
    touch_ttl_write_failure: Option<u32>,
    pub(crate) write_failure: WriteFailureHook,
}

impl Router {
    pub fn new(
        primary: PoolSet,
        gutter: Option<PoolSet>,
        gutter_ttl: u32,
        raise_on_server_error: bool,
        touch_ttl_write_failure: Option<u32>,
    ) -> Self {
        Router {
            primary,
            gutter,
            gutter_ttl,
            raise_on_server_error,
            touch_ttl_write_failure,
            write_failure: WriteFailureHook::new(),
        }
    }

    /// Execute one command against the server owning `key`, falling back to
    /// the gutter ring on server failure when one is configured.
    pub fn exec(
        &self,
        command: Command,
        key: &Key,
        value: Option<&[u8]>,
        flags: &RequestFlags,
        handling: FailureHandling,
    ) -> Result<Response, Error> {
        let primary = executor::exec(self.primary.pool_for(key), command, key, value, flags);

        let result = match (primary, &self.gutter) {
            (Err(e), Some(gutter)) if e.is_server_error() => {
                tracing::debug!("primary failed for {} ({}), trying gutter", key, e);
                let clamped = clamp_ttls_for_gutter(flags.clone(), self.gutter_ttl);
                match executor::exec(gutter.pool_for(key), command, key, value, &clamped) {
                    // Rescued by the gutter: cache coverage is preserved,
                    // so no write-failure notification.
                    Ok(response) => return Ok(response),
                    Err(gutter_err) => Err(gutter_err),
                }
            }
            (other, _) => other,
        };

        match result {
            Ok(response) => Ok(response),
            Err(e) if e.is_server_error() => {
                if handling.track_write_failures && self.is_write_class(command, flags) {
                    self.write_failure.emit(key);
                }
                self.reduce(e, command, handling)
            }
            Err(e) => Err(e),
        }
    }

    /// Execute a multi-get, grouping keys by destination pool and
    /// reassembling replies in input order.
    pub fn exec_multi(
        &self,
        keys: &[Key],
        flags: &RequestFlags,
        handling: FailureHandling,
    ) -> Result<Vec<Response>, Error> {
        let mut slots: Vec<Option<Response>> = vec![None; keys.len()];

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, key) in keys.iter().enumerate() {
            groups.entry(self.primary.route(key)).or_default().push(index);
        }

        for (pool_index, indices) in groups {
            let group: Vec<&Key> = indices.iter().map(|&i| &keys[i]).collect();
            let primary = executor::exec_multi(&self.primary.pools[pool_index], &group, flags);

            let result = match (primary, &self.gutter) {
                (Err(e), Some(gutter)) if e.is_server_error() => {
                    tracing::debug!("primary multi-get failed ({}), trying gutter", e);
                    let clamped = clamp_ttls_for_gutter(flags.clone(), self.gutter_ttl);
                    exec_multi_on_set(gutter, &group, &clamped)
                }
                (other, _) => other,
            };

            match result {
                Ok(responses) => {
                    for (&slot, response) in indices.iter().zip(responses) {
                        slots[slot] = Some(response);
                    }
                }
                Err(e) if e.is_server_error() => {
                    if handling.track_write_failures && self.is_write_class(Command::Get, flags) {
                        for &index in &indices {
                            self.write_failure.emit(&keys[index]);
                        }
                    }
                    let fallback = self.reduce(e, Command::Get, handling)?;
                    for &index in &indices {
                        slots[index] = Some(fallback.clone());
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.expect("every key resolved"))
            .collect())
    }

    pub fn counters(&self) -> BTreeMap<ServerAddress, PoolCounters> {
        let mut out = BTreeMap::new();
        if let Some(gutter) = &self.gutter {
            gutter.counters(&mut out);
        }
        self.primary.counters(&mut out);
        out
    }

    /// Apply the raise-or-silence policy to a server error.
    fn reduce(
        &self,
        error: Error,
        command: Command,
        handling: FailureHandling,
    ) -> Result<Response, Error> {
        if handling
            .raise_on_server_error
            .unwrap_or(self.raise_on_server_error)
        {
            Err(error)
        } else {
            tracing::warn!("silencing server error: {}", error);
            Ok(if command == Command::Get {
                Response::Miss
            } else {
                Response::NotStored
            })
        }
    }

    fn is_write_class(&self, command: Command, flags: &RequestFlags) -> bool {
        match command {
            Command::Set | Command::Delete | Command::Arithmetic => true,
            Command::Get => match (flags.cache_ttl, self.touch_ttl_write_failure) {
                (Some(ttl), Some(limit)) => ttl > 0 && ttl <= limit,
                _ => false,
            },
        }
    }
}

/// Multi-get against a specific pool set, used for the gutter leg.
fn exec_multi_on_set(
    set: &PoolSet,
    keys: &[&Key],
    flags: &RequestFlags,
) -> Result<Vec<Response>, Error> {
    let mut slots: Vec<Option<Response>> = vec![None; keys.len()];
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, key) in keys.iter().enumerate() {
        groups.entry(set.route(key)).or_default().push(index);
    }
    for (pool_index, indices) in groups {
        let group: Vec<&Key> = indices.iter().map(|&i| keys[i]).collect();
        let responses = executor::exec_multi(&set.pools[pool_index], &group, flags)?;
        for (&slot, response) in indices.iter().zip(responses) {
            slots[slot] = Some(response);
        }
    }
    Ok(slots
        .into_iter()
        .map(|slot| slot.expect("every key resolved"))
        .collect())
}

/// Cap TTLs for operations redirected to the gutter. A TTL of 0 means
/// "forever" on the wire, so it clamps too.
fn clamp_ttls_for_gutter(mut flags: RequestFlags, gutter_ttl: u32) -> RequestFlags {
    for ttl in [
        &mut flags.cache_ttl,
        &mut flags.recache_ttl,
        &mut flags.vivify_on_miss_ttl,
    ] {
        if let Some(value) = ttl {
            if *value == 0 || *value > gutter_ttl {
                *value = gutter_ttl;
            }
        }
    }
    flags
}
