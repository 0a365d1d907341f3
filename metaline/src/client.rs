//! The cache client: meta commands and the high-level command surface.
//!
//! [`CacheClient`] is one concrete struct composing the router, the value
//! codec, and the command layers. It is cheap to clone (internally shared)
//! and safe to call from many threads; every public call is synchronous and
//! suspends only for socket I/O or a lease backoff sleep.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use protocol_meta::{ArithmeticMode, Command, Key, RequestFlags, Response, ResponseFlags, SetMode};

use crate::config::{LeasePolicy, PoolOptions, RecachePolicy, ServerAddress, StalePolicy};
use crate::connection::{SocketFactory, TcpSocketFactory};
use crate::error::Error;
use crate::pool::PoolCounters;
use crate::router::{FailureHandling, PoolSet, Router};
use crate::value::{CacheValue, FromCacheValue, StandardCodec, ValueCodec};

/// Default TTL cap for operations redirected to the gutter.
pub const DEFAULT_GUTTER_TTL: u32 = 30;

/// Default touch-TTL threshold below which a failed touch counts as a
/// write failure.
pub const DEFAULT_TOUCH_TTL_WRITE_FAILURE: u32 = 50;

// -- Per-call options --------------------------------------------------------

/// Options for [`CacheClient::set_with_options`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub mode: SetMode,
    pub cas_token: Option<u64>,
    pub stale_policy: Option<StalePolicy>,
    pub no_reply: bool,
    pub failure_handling: FailureHandling,
}

/// Options for [`CacheClient::delete_with_options`] and
/// [`CacheClient::invalidate_with_options`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub cas_token: Option<u64>,
    pub stale_policy: Option<StalePolicy>,
    pub no_reply: bool,
    pub failure_handling: FailureHandling,
}

/// Options for the read operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Refresh the item's TTL while reading (`T<ttl>`).
    pub touch_ttl: Option<u32>,
    /// Early-recache herd control (`R<ttl>`).
    pub recache_policy: Option<RecachePolicy>,
    /// Make typed getters fail with [`Error::TypeMismatch`] instead of
    /// returning `None` on a type mismatch.
    pub error_on_type_mismatch: bool,
}

/// Options for the delta operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaOptions {
    /// Refresh the counter's TTL (`T<ttl>`).
    pub refresh_ttl: Option<u32>,
    pub cas_token: Option<u64>,
    pub no_reply: bool,
    pub failure_handling: FailureHandling,
}

// -- Builder -----------------------------------------------------------------

/// Builder for a [`CacheClient`].
pub struct ClientBuilder {
    servers: Vec<ServerAddress>,
    gutter_servers: Vec<ServerAddress>,
    gutter_ttl: u32,
    options: PoolOptions,
    codec: Option<Arc<dyn ValueCodec>>,
    socket_factory: Option<Arc<dyn SocketFactory>>,
    raise_on_server_error: bool,
    touch_ttl_write_failure: Option<u32>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder {
            servers: Vec::new(),
            gutter_servers: Vec::new(),
            gutter_ttl: DEFAULT_GUTTER_TTL,
            options: PoolOptions::default(),
            codec: None,
            socket_factory: None,
            raise_on_server_error: true,
            touch_ttl_write_failure: Some(DEFAULT_TOUCH_TTL_WRITE_FAILURE),
        }
    }

    /// Add a server to the primary ring.
    pub fn server(mut self, server: ServerAddress) -> Self {
        self.servers.push(server);
        self
    }

    /// Add servers to the primary ring.
    pub fn servers(mut self, servers: impl IntoIterator<Item = ServerAddress>) -> Self {
        self.servers.extend(servers);
        self
    }

    /// Configure a gutter ring: a small fallback pool that receives traffic
    /// when a primary server is down, with TTLs capped at `gutter_ttl`.
    pub fn gutter(
        mut self,
        servers: impl IntoIterator<Item = ServerAddress>,
        gutter_ttl: u32,
    ) -> Self {
        self.gutter_servers.extend(servers);
        self.gutter_ttl = gutter_ttl;
        self
    }

    /// Override the per-server pool sizing and socket options.
    pub fn pool_options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the value codec.
    pub fn codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Replace the socket factory (TLS, unix sockets, authentication).
    pub fn socket_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.socket_factory = Some(factory);
        self
    }

    /// Whether server errors raise by default. When false, reads surface a
    /// miss and writes surface `false` instead. Overridable per call via
    /// [`FailureHandling`].
    pub fn raise_on_server_error(mut self, raise: bool) -> Self {
        self.raise_on_server_error = raise;
        self
    }

    /// Failed touches with a TTL at or below this threshold count as write
    /// failures. `None` disables touch classification.
    pub fn touch_ttl_write_failure(mut self, threshold: Option<u32>) -> Self {
        self.touch_ttl_write_failure = threshold;
        self
    }

    pub fn build(self) -> Result<CacheClient, Error> {
        if self.servers.is_empty() {
            return Err(Error::InvalidArgument("at least one server is required"));
        }
        let factory: Arc<dyn SocketFactory> = self.socket_factory.unwrap_or_else(|| {
            Arc::new(TcpSocketFactory {
                connection_timeout: self.options.connection_timeout,
                recv_timeout: self.options.recv_timeout,
                no_delay: self.options.no_delay,
            })
        });
        let primary = PoolSet::new(self.servers, &factory, &self.options);
        let gutter = if self.gutter_servers.is_empty() {
            None
        } else {
            Some(PoolSet::new(self.gutter_servers, &factory, &self.options))
        };
        let router = Router::new(
            primary,
            gutter,
            self.gutter_ttl,
            self.raise_on_server_error,
            self.touch_ttl_write_failure,
        );
        let codec = self.codec.unwrap_or_else(|| Arc::new(StandardCodec::new()));
        Ok(CacheClient {
            inner: Arc::new(ClientCore { router, codec }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// -- Client ------------------------------------------------------------------

struct ClientCore {
    router: Router,
    codec: Arc<dyn ValueCodec>,
}

/// A memcache client speaking the meta protocol.
#[derive(Clone)]
pub struct CacheClient {
    inner: Arc<ClientCore>,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient").finish_non_exhaustive()
    }
}

/// A decoded read, before the policy layers interpret it.
struct Fetched {
    /// `None` for lease/recache winners and undecodable payloads.
    value: Option<CacheValue>,
    /// Raw payload size; 0 distinguishes vivified placeholders.
    size: usize,
    flags: ResponseFlags,
}

impl CacheClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Per-server pool accounting, keyed by address. Includes gutter
    /// servers when a gutter is configured.
    pub fn counters(&self) -> BTreeMap<ServerAddress, PoolCounters> {
        self.inner.router.counters()
    }

    /// Subscribe to write-failure notifications: the key of every
    /// write-class operation that failed against a server (and was not
    /// rescued by the gutter) is passed to the subscriber.
    pub fn on_write_failure(&self, subscriber: impl Fn(&Key) + Send + Sync + 'static) {
        self.inner.router.write_failure.subscribe(subscriber);
    }

    // -- Meta command layer --------------------------------------------------

    /// Raw meta get (`mg`).
    pub fn meta_get(
        &self,
        key: &Key,
        flags: RequestFlags,
        handling: FailureHandling,
    ) -> Result<Response, Error> {
        match self
            .inner
            .router
            .exec(Command::Get, key, None, &flags, handling)?
        {
            Response::NotStored | Response::Conflict => Err(Error::UnexpectedResponse),
            response => Ok(response),
        }
    }

    /// Raw pipelined meta multi-get.
    pub fn meta_multiget(
        &self,
        keys: &[Key],
        flags: RequestFlags,
        handling: FailureHandling,
    ) -> Result<Vec<Response>, Error> {
        let responses = self.inner.router.exec_multi(keys, &flags, handling)?;
        for response in &responses {
            if matches!(response, Response::NotStored | Response::Conflict) {
                return Err(Error::UnexpectedResponse);
            }
        }
        Ok(responses)
    }

    /// Raw meta set (`ms`). `value` is the already-encoded payload.
    pub fn meta_set(
        &self,
        key: &Key,
        value: &[u8],
        flags: RequestFlags,
        handling: FailureHandling,
    ) -> Result<Response, Error> {
        match self
            .inner
            .router
            .exec(Command::Set, key, Some(value), &flags, handling)?
        {
            Response::Value { .. } => Err(Error::UnexpectedResponse),
            response => Ok(response),
        }
    }

    /// Raw meta delete (`md`).
    pub fn meta_delete(
        &self,
        key: &Key,
        flags: RequestFlags,
        handling: FailureHandling,
    ) -> Result<Response, Error> {
        match self
            .inner
            .router
            .exec(Command::Delete, key, None, &flags, handling)?
        {
            Response::Value { .. } => Err(Error::UnexpectedResponse),
            response => Ok(response),
        }
    }

    /// Raw meta arithmetic (`ma`).
    pub fn meta_arithmetic(
        &self,
        key: &Key,
        flags: RequestFlags,
        handling: FailureHandling,
    ) -> Result<Response, Error> {
        self.inner
            .router
            .exec(Command::Arithmetic, key, None, &flags, handling)
    }

    // -- Writes --------------------------------------------------------------

    /// Store a value. Returns true iff the store succeeded.
    pub fn set(&self, key: &Key, value: impl Into<CacheValue>, ttl: u32) -> Result<bool, Error> {
        self.set_with_options(key, value, ttl, &SetOptions::default())
    }

    /// Store a value with mode, CAS, and stale-policy control.
    ///
    /// With a CAS token and a [`StalePolicy`] requesting
    /// `mark_stale_on_cas_mismatch`, a conflicting store is retried once
    /// with the mark-stale flag so the competing value survives as stale
    /// instead of this write being lost.
    pub fn set_with_options(
        &self,
        key: &Key,
        value: impl Into<CacheValue>,
        ttl: u32,
        options: &SetOptions,
    ) -> Result<bool, Error> {
        let value = value.into();
        let (data, client_flag) = self.inner.codec.encode(&value);
        let flags = RequestFlags {
            return_value: false,
            no_reply: options.no_reply,
            cache_ttl: Some(ttl),
            cas_token: options.cas_token,
            client_flag: Some(client_flag),
            set_mode: options.mode,
            ..Default::default()
        };

        let response = self.meta_set(key, &data, flags.clone(), options.failure_handling)?;

        let retry_as_stale = response == Response::Conflict
            && options.cas_token.is_some()
            && options
                .stale_policy
                .is_some_and(|policy| policy.mark_stale_on_cas_mismatch);
        if retry_as_stale {
            let retry_flags = RequestFlags {
                mark_stale: true,
                ..flags
            };
            let response = self.meta_set(key, &data, retry_flags, options.failure_handling)?;
            return Ok(response.is_success());
        }

        Ok(response.is_success())
    }

    /// Re-populate a key that should be absent: an ADD that does not count
    /// toward write-failure tracking. Returns false when the key already
    /// exists.
    pub fn refill(&self, key: &Key, value: impl Into<CacheValue>, ttl: u32) -> Result<bool, Error> {
        self.set_with_options(
            key,
            value,
            ttl,
            &SetOptions {
                mode: SetMode::Add,
                failure_handling: FailureHandling::untracked(),
                ..Default::default()
            },
        )
    }

    /// Delete a key. Returns false when the key was absent or the CAS
    /// token did not match.
    pub fn delete(&self, key: &Key) -> Result<bool, Error> {
        self.delete_with_options(key, &DeleteOptions::default())
    }

    pub fn delete_with_options(&self, key: &Key, options: &DeleteOptions) -> Result<bool, Error> {
        let response =
            self.meta_delete(key, delete_flags(options), options.failure_handling)?;
        Ok(response.is_success())
    }

    /// Like delete, but treats an absent key as success.
    pub fn invalidate(&self, key: &Key) -> Result<bool, Error> {
        self.invalidate_with_options(key, &DeleteOptions::default())
    }

    pub fn invalidate_with_options(
        &self,
        key: &Key,
        options: &DeleteOptions,
    ) -> Result<bool, Error> {
        let response =
            self.meta_delete(key, delete_flags(options), options.failure_handling)?;
        Ok(response.is_success() || response.is_miss())
    }

    /// Refresh a key's TTL without reading it. Returns true iff the key
    /// exists.
    pub fn touch(&self, key: &Key, ttl: u32) -> Result<bool, Error> {
        let flags = RequestFlags {
            cache_ttl: Some(ttl),
            ..RequestFlags::none()
        };
        let response = self.meta_get(key, flags, FailureHandling::default())?;
        Ok(response.is_success())
    }

    // -- Reads ---------------------------------------------------------------

    /// Read a value. Returns `None` on miss, and mimics a miss for a
    /// recache winner (which must repopulate).
    pub fn get(&self, key: &Key) -> Result<Option<CacheValue>, Error> {
        self.get_with_options(key, &GetOptions::default())
    }

    pub fn get_with_options(
        &self,
        key: &Key,
        options: &GetOptions,
    ) -> Result<Option<CacheValue>, Error> {
        let fetched = self.fetch(key, options, None, false)?;
        Ok(fetched.and_then(|f| f.value))
    }

    /// Read a value plus its CAS token.
    pub fn get_cas(&self, key: &Key) -> Result<(Option<CacheValue>, Option<u64>), Error> {
        self.get_cas_with_options(key, &GetOptions::default())
    }

    pub fn get_cas_with_options(
        &self,
        key: &Key,
        options: &GetOptions,
    ) -> Result<(Option<CacheValue>, Option<u64>), Error> {
        match self.fetch(key, options, None, true)? {
            Some(fetched) => Ok((fetched.value, fetched.flags.cas_token)),
            None => Ok((None, None)),
        }
    }

    /// Read a value of a specific type. A value of a different type yields
    /// `None`, or [`Error::TypeMismatch`] when
    /// [`GetOptions::error_on_type_mismatch`] is set.
    pub fn get_typed<T: FromCacheValue>(&self, key: &Key) -> Result<Option<T>, Error> {
        self.get_typed_with_options(key, &GetOptions::default())
    }

    pub fn get_typed_with_options<T: FromCacheValue>(
        &self,
        key: &Key,
        options: &GetOptions,
    ) -> Result<Option<T>, Error> {
        let value = self.get_with_options(key, options)?;
        typed(key, value, options.error_on_type_mismatch)
    }

    pub fn get_cas_typed<T: FromCacheValue>(
        &self,
        key: &Key,
    ) -> Result<(Option<T>, Option<u64>), Error> {
        self.get_cas_typed_with_options(key, &GetOptions::default())
    }

    pub fn get_cas_typed_with_options<T: FromCacheValue>(
        &self,
        key: &Key,
        options: &GetOptions,
    ) -> Result<(Option<T>, Option<u64>), Error> {
        let (value, cas_token) = self.get_cas_with_options(key, options)?;
        Ok((typed(key, value, options.error_on_type_mismatch)?, cas_token))
    }

    /// Pipelined read of many keys. The result preserves the order of the
    /// input keys.
    pub fn multi_get(&self, keys: &[Key]) -> Result<Vec<(Key, Option<CacheValue>)>, Error> {
        self.multi_get_with_options(keys, &GetOptions::default())
    }

    pub fn multi_get_with_options(
        &self,
        keys: &[Key],
        options: &GetOptions,
    ) -> Result<Vec<(Key, Option<CacheValue>)>, Error> {
        let flags = RequestFlags {
            return_client_flag: true,
            cache_ttl: options.touch_ttl,
            recache_ttl: options.recache_policy.map(|policy| policy.ttl),
            ..Default::default()
        };
        let responses = self.meta_multiget(keys, flags, FailureHandling::default())?;
        let mut out = Vec::with_capacity(keys.len());
        for (key, response) in keys.iter().zip(responses) {
            let value = match response {
                Response::Value { flags, data } => {
                    if flags.win == Some(true) {
                        None
                    } else {
                        self.decode(key, &data, &flags)
                    }
                }
                Response::Miss => None,
                _ => return Err(Error::UnexpectedResponse),
            };
            out.push((key.clone(), value));
        }
        Ok(out)
    }

    /// Read a value, taking a miss lease when absent.
    ///
    /// On a miss the server vivifies an empty placeholder; the reader that
    /// wins its lease gets `None` back and must repopulate. Losers sleep
    /// and retry per the policy, then give up with `None`.
    pub fn get_or_lease(
        &self,
        key: &Key,
        lease_policy: &LeasePolicy,
    ) -> Result<Option<CacheValue>, Error> {
        self.get_or_lease_cas_with_options(key, lease_policy, &GetOptions::default())
            .map(|(value, _)| value)
    }

    pub fn get_or_lease_with_options(
        &self,
        key: &Key,
        lease_policy: &LeasePolicy,
        options: &GetOptions,
    ) -> Result<Option<CacheValue>, Error> {
        self.get_or_lease_cas_with_options(key, lease_policy, options)
            .map(|(value, _)| value)
    }

    pub fn get_or_lease_cas(
        &self,
        key: &Key,
        lease_policy: &LeasePolicy,
    ) -> Result<(Option<CacheValue>, Option<u64>), Error> {
        self.get_or_lease_cas_with_options(key, lease_policy, &GetOptions::default())
    }

    pub fn get_or_lease_cas_with_options(
        &self,
        key: &Key,
        lease_policy: &LeasePolicy,
        options: &GetOptions,
    ) -> Result<(Option<CacheValue>, Option<u64>), Error> {
        if lease_policy.miss_retries == 0 {
            return Err(Error::InvalidArgument(
                "lease policy needs miss_retries > 0",
            ));
        }
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let backoff = lease_policy
                    .miss_retry_wait
                    .mul_f64(lease_policy.wait_backoff_factor.powi(attempt as i32 - 1));
                thread::sleep(backoff.min(lease_policy.miss_max_retry_wait));
            }
            attempt += 1;

            match self.fetch(key, options, Some(lease_policy.ttl), true)? {
                Some(fetched) => {
                    let cas_token = fetched.flags.cas_token;
                    if fetched.flags.win == Some(true) {
                        // We hold the lease; mimic a miss so the caller
                        // repopulates.
                        return Ok((None, cas_token));
                    }
                    if fetched.size == 0 && fetched.flags.win == Some(false) {
                        // Empty placeholder and we lost: wait for the
                        // winner to fill it in.
                        if attempt < lease_policy.miss_retries {
                            continue;
                        }
                        return Ok((None, cas_token));
                    }
                    return Ok((fetched.value, cas_token));
                }
                // No placeholder came back at all; behave like a winner.
                None => return Ok((None, None)),
            }
        }
    }

    // -- Arithmetic ----------------------------------------------------------

    /// Add `delta` to a counter (negative deltas decrement). Returns false
    /// when the counter does not exist.
    pub fn delta(&self, key: &Key, delta: i64) -> Result<bool, Error> {
        self.delta_with_options(key, delta, &DeltaOptions::default())
    }

    pub fn delta_with_options(
        &self,
        key: &Key,
        delta: i64,
        options: &DeltaOptions,
    ) -> Result<bool, Error> {
        let flags = delta_flags(delta, options, false);
        let response = self.meta_arithmetic(key, flags, options.failure_handling)?;
        Ok(response.is_success())
    }

    /// Add `delta`, creating the counter with `initial_value` and
    /// `initial_ttl` when absent.
    pub fn delta_initialize(
        &self,
        key: &Key,
        delta: i64,
        initial_value: u64,
        initial_ttl: u32,
    ) -> Result<bool, Error> {
        self.delta_initialize_with_options(
            key,
            delta,
            initial_value,
            initial_ttl,
            &DeltaOptions::default(),
        )
    }

    pub fn delta_initialize_with_options(
        &self,
        key: &Key,
        delta: i64,
        initial_value: u64,
        initial_ttl: u32,
        options: &DeltaOptions,
    ) -> Result<bool, Error> {
        let mut flags = delta_flags(delta, options, false);
        flags.ma_initial_value = Some(initial_value);
        flags.vivify_on_miss_ttl = Some(initial_ttl);
        let response = self.meta_arithmetic(key, flags, options.failure_handling)?;
        Ok(response.is_success())
    }

    /// Add `delta` and return the new counter value, or `None` when the
    /// counter does not exist.
    pub fn delta_and_get(&self, key: &Key, delta: i64) -> Result<Option<u64>, Error> {
        self.delta_and_get_with_options(key, delta, &DeltaOptions::default())
    }

    pub fn delta_and_get_with_options(
        &self,
        key: &Key,
        delta: i64,
        options: &DeltaOptions,
    ) -> Result<Option<u64>, Error> {
        let flags = delta_flags(delta, options, true);
        match self.meta_arithmetic(key, flags, options.failure_handling)? {
            Response::Value { data, .. } => parse_counter(&data).map(Some),
            _ => Ok(None),
        }
    }

    /// Add `delta`, creating the counter when absent, and return the new
    /// value.
    pub fn delta_initialize_and_get(
        &self,
        key: &Key,
        delta: i64,
        initial_value: u64,
        initial_ttl: u32,
    ) -> Result<Option<u64>, Error> {
        self.delta_initialize_and_get_with_options(
            key,
            delta,
            initial_value,
            initial_ttl,
            &DeltaOptions::default(),
        )
    }

    pub fn delta_initialize_and_get_with_options(
        &self,
        key: &Key,
        delta: i64,
        initial_value: u64,
        initial_ttl: u32,
        options: &DeltaOptions,
    ) -> Result<Option<u64>, Error> {
        let mut flags = delta_flags(delta, options, true);
        flags.ma_initial_value = Some(initial_value);
        flags.vivify_on_miss_ttl = Some(initial_ttl);
        match self.meta_arithmetic(key, flags, options.failure_handling)? {
            Response::Value { data, .. } => parse_counter(&data).map(Some),
            _ => Ok(None),
        }
    }

    // -- Internals -----------------------------------------------------------

    /// One decoded read. Reads always request the value and the client flag
    /// (needed to decode); `c` is added when the caller wants CAS.
    fn fetch(
        &self,
        key: &Key,
        options: &GetOptions,
        lease_ttl: Option<u32>,
        want_cas: bool,
    ) -> Result<Option<Fetched>, Error> {
        let flags = RequestFlags {
            return_client_flag: true,
            return_cas_token: want_cas,
            vivify_on_miss_ttl: lease_ttl,
            recache_ttl: options.recache_policy.map(|policy| policy.ttl),
            cache_ttl: options.touch_ttl,
            ..Default::default()
        };
        match self.meta_get(key, flags, FailureHandling::default())? {
            Response::Value { flags, data } => {
                let size = data.len();
                let value = if flags.win == Some(true) {
                    // Recache/vivify winners mimic a miss and must
                    // repopulate.
                    None
                } else {
                    self.decode(key, &data, &flags)
                };
                Ok(Some(Fetched { value, size, flags }))
            }
            Response::Miss => Ok(None),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Decode a payload; failures degrade to a miss.
    fn decode(&self, key: &Key, data: &[u8], flags: &ResponseFlags) -> Option<CacheValue> {
        match self
            .inner
            .codec
            .decode(data, flags.client_flag.unwrap_or(0))
        {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("failed to decode value for {}: {}", key, e);
                None
            }
        }
    }
}

fn delete_flags(options: &DeleteOptions) -> RequestFlags {
    let stale_ttl = options.stale_policy.and_then(|policy| {
        (policy.mark_stale_on_deletion_ttl > 0).then_some(policy.mark_stale_on_deletion_ttl)
    });
    RequestFlags {
        no_reply: options.no_reply,
        cas_token: options.cas_token,
        mark_stale: stale_ttl.is_some(),
        cache_ttl: stale_ttl,
        ..RequestFlags::none()
    }
}

fn delta_flags(delta: i64, options: &DeltaOptions, return_value: bool) -> RequestFlags {
    RequestFlags {
        return_value,
        no_reply: options.no_reply,
        cache_ttl: options.refresh_ttl,
        cas_token: options.cas_token,
        ma_delta_value: Some(delta.unsigned_abs()),
        arithmetic_mode: if delta < 0 {
            ArithmeticMode::Decr
        } else {
            ArithmeticMode::Incr
        },
        ..RequestFlags::none()
    }
}

fn typed<T: FromCacheValue>(
    key: &Key,
    value: Option<CacheValue>,
    strict: bool,
) -> Result<Option<T>, Error> {
    match value {
        None => Ok(None),
        Some(value) => match T::from_cache_value(value) {
            Some(typed) => Ok(Some(typed)),
            None if strict => Err(Error::TypeMismatch {
                key: key.to_string(),
                expected: T::TYPE_NAME,
            }),
            None => Ok(None),
        },
    }
}

/// Arithmetic replies carry the counter as ASCII digits, not a codec
/// payload.
fn parse_counter(data: &[u8]) -> Result<u64, Error> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or(Error::UnexpectedResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_servers() {
        let err = CacheClient::builder().build().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn delete_flags_stale_policy() {
        let options = DeleteOptions {
            stale_policy: Some(StalePolicy {
                mark_stale_on_deletion_ttl: 20,
                mark_stale_on_cas_mismatch: false,
            }),
            ..Default::default()
        };
        let flags = delete_flags(&options);
        assert!(flags.mark_stale);
        assert_eq!(flags.cache_ttl, Some(20));

        let flags = delete_flags(&DeleteOptions::default());
        assert!(!flags.mark_stale);
        assert_eq!(flags.cache_ttl, None);
    }

    #[test]
    fn delta_flags_direction() {
        let flags = delta_flags(5, &DeltaOptions::default(), false);
        assert_eq!(flags.ma_delta_value, Some(5));
        assert_eq!(flags.arithmetic_mode, ArithmeticMode::Incr);

        let flags = delta_flags(-5, &DeltaOptions::default(), true);
        assert_eq!(flags.ma_delta_value, Some(5));
        assert_eq!(flags.arithmetic_mode, ArithmeticMode::Decr);
        assert!(flags.return_value);
    }

    #[test]
    fn parse_counter_rejects_garbage() {
        assert_eq!(parse_counter(b"12").unwrap(), 12);
        assert!(parse_counter(b"x12").is_err());
        assert!(parse_counter(b"").is_err());
    }

    #[test]
    fn typed_extraction_modes() {
        let key = Key::new("k");
        let value = Some(CacheValue::Text("x".into()));
        let out: Option<String> = typed(&key, value.clone(), false).unwrap();
        assert_eq!(out, Some("x".into()));

        let out: Option<i64> = typed(&key, value.clone(), false).unwrap();
        assert_eq!(out, None);

        let err = typed::<i64>(&key, value, true).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }
}
