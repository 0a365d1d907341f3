//! Per-server connection pool with fast mark-down.
//!
//! The pool never blocks waiting for a free connection: acquisition pops an
//! idle one or opens a new socket, trading memory for latency. Failures
//! trip a mark-down window during which all requests fail fast except a
//! single prober, which claims an atomic slot and attempts a real connect;
//! a successful probe clears the window early.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::{PoolOptions, ServerAddress};
use crate::connection::{Connection, SocketFactory};
use crate::error::Error;

/// A snapshot of one pool's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounters {
    /// Idle connections ready to be borrowed.
    pub available: usize,
    /// Connections currently out of the pool serving a request.
    pub active: usize,
    /// Currently open connections (`available + active`).
    pub established: usize,
    /// Connections opened over the pool's lifetime. Steady growth here
    /// means the pool size is too small and connections keep churning.
    pub total_created: u64,
    /// Connection and socket errors over the pool's lifetime.
    pub total_errors: u64,
}

pub(crate) struct ConnectionPool {
    server: ServerAddress,
    label: String,
    factory: Arc<dyn SocketFactory>,
    max_pool_size: usize,
    read_buffer_size: usize,
    mark_down_period_ms: u64,
    idle: Mutex<VecDeque<Connection>>,
    /// Millisecond deadline of the active mark-down window; 0 when healthy.
    marked_down_until: AtomicU64,
    /// Millisecond timestamp of the window's probe claim; 0 while the probe
    /// slot is open.
    prober_claimed_at: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    errors: AtomicU64,
    epoch: Instant,
}

impl ConnectionPool {
    pub fn new(
        server: ServerAddress,
        factory: Arc<dyn SocketFactory>,
        options: &PoolOptions,
    ) -> Self {
        let pool = ConnectionPool {
            label: server.to_string(),
            server,
            factory,
            max_pool_size: options.max_pool_size,
            read_buffer_size: options.read_buffer_size,
            mark_down_period_ms: options.mark_down_period.as_millis().max(1) as u64,
            idle: Mutex::new(VecDeque::new()),
            marked_down_until: AtomicU64::new(0),
            prober_claimed_at: AtomicU64::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            epoch: Instant::now(),
        };

        let initial = options.initial_pool_size.min(options.max_pool_size);
        for _ in 0..initial {
            match pool.open() {
                Ok(conn) => pool.idle.lock().push_back(conn),
                Err(e) => {
                    tracing::warn!("eager connect to {} failed: {}", pool.label, e);
                    break;
                }
            }
        }
        pool
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Borrow a connection. Fails fast with [`Error::ServerMarkedDown`]
    /// while a mark-down window is active, except for the single prober.
    pub fn acquire(&self) -> Result<Connection, Error> {
        let deadline = self.marked_down_until.load(Ordering::Acquire);
        if deadline != 0 {
            let now = self.now_ms();
            if now < deadline {
                if self
                    .prober_claimed_at
                    .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // This request is the window's designated prober.
                    let conn = self.open()?;
                    self.marked_down_until.store(0, Ordering::Release);
                    tracing::info!("probe to {} succeeded, clearing mark-down", self.label);
                    return Ok(conn);
                }
                return Err(Error::ServerMarkedDown {
                    server: self.label.clone(),
                });
            }
            // Window expired; first caller through clears it.
            let _ = self.marked_down_until.compare_exchange(
                deadline,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        if let Some(conn) = self.idle.lock().pop_front() {
            return Ok(conn);
        }
        self.open()
    }

    /// Return a borrowed connection. Poisoned connections are closed and
    /// trip a fresh mark-down window; healthy ones go back to the idle set
    /// unless it is full.
    pub fn release(&self, conn: Connection) {
        if conn.is_poisoned() {
            drop(conn);
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            self.errors.fetch_add(1, Ordering::Relaxed);
            self.mark_down(false);
            return;
        }

        let mut idle = self.idle.lock();
        if idle.len() >= self.max_pool_size {
            drop(idle);
            drop(conn);
            self.destroyed.fetch_add(1, Ordering::Relaxed);
        } else {
            idle.push_back(conn);
        }
    }

    pub fn counters(&self) -> PoolCounters {
        let available = self.idle.lock().len();
        let created = self.created.load(Ordering::Relaxed);
        let destroyed = self.destroyed.load(Ordering::Relaxed);
        let established = created.saturating_sub(destroyed) as usize;
        PoolCounters {
            available,
            active: established.saturating_sub(available),
            established,
            total_created: created,
            total_errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Open a new connection. A failure counts as this window's probe: the
    /// pool is marked down with the probe slot already claimed, so no other
    /// request attempts a connect until the window expires.
    fn open(&self) -> Result<Connection, Error> {
        match self.factory.connect(&self.server) {
            Ok(stream) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Ok(Connection::new(stream, self.read_buffer_size))
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.mark_down(true);
                Err(Error::Connection {
                    server: self.label.clone(),
                    source: e,
                })
            }
        }
    }

    fn mark_down(&self, claim_prober: bool) {
        let now = self.now_ms();
        self.marked_down_until
            .store(now + self.mark_down_period_ms, Ordering::Release);
        self.prober_claimed_at
            .store(if claim_prober { now } else { 0 }, Ordering::Release);
        tracing::warn!(
            "marking {} down for {}ms",
            self.label,
            self.mark_down_period_ms
        );
    }

    /// Milliseconds since pool creation, never 0.
    #[inline]
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TcpSocketFactory;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    /// A listener that accepts connections forever and holds them open.
    fn sink_server() -> (ServerAddress, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept() {
                held.push(socket);
                if held.len() >= 16 {
                    break;
                }
            }
        });
        (ServerAddress::new("127.0.0.1", port), handle)
    }

    /// An address nothing is listening on.
    fn dead_server() -> ServerAddress {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        ServerAddress::new("127.0.0.1", port)
    }

    fn factory() -> Arc<dyn SocketFactory> {
        Arc::new(TcpSocketFactory {
            connection_timeout: Duration::from_millis(500),
            recv_timeout: Duration::from_millis(500),
            no_delay: true,
        })
    }

    fn options(initial: usize, max: usize) -> PoolOptions {
        PoolOptions {
            initial_pool_size: initial,
            max_pool_size: max,
            mark_down_period: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[test]
    fn eager_initial_connections() {
        let (server, _guard) = sink_server();
        let pool = ConnectionPool::new(server, factory(), &options(2, 3));
        let counters = pool.counters();
        assert_eq!(counters.available, 2);
        assert_eq!(counters.active, 0);
        assert_eq!(counters.established, 2);
        assert_eq!(counters.total_created, 2);
        assert_eq!(counters.total_errors, 0);
    }

    #[test]
    fn acquire_release_reuses() {
        let (server, _guard) = sink_server();
        let pool = ConnectionPool::new(server, factory(), &options(1, 3));
        let conn = pool.acquire().unwrap();
        assert_eq!(pool.counters().active, 1);
        pool.release(conn);
        let counters = pool.counters();
        assert_eq!(counters.available, 1);
        assert_eq!(counters.total_created, 1);
    }

    #[test]
    fn idle_overflow_is_closed() {
        let (server, _guard) = sink_server();
        let pool = ConnectionPool::new(server, factory(), &options(0, 1));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);
        let counters = pool.counters();
        assert_eq!(counters.available, 1);
        assert_eq!(counters.established, 1);
        assert_eq!(counters.total_created, 2);
    }

    #[test]
    fn poisoned_release_marks_down() {
        let (server, _guard) = sink_server();
        let pool = ConnectionPool::new(server, factory(), &options(1, 3));
        let mut conn = pool.acquire().unwrap();
        conn.poison();
        pool.release(conn);

        let counters = pool.counters();
        assert_eq!(counters.established, 0);
        assert_eq!(counters.total_errors, 1);

        // The next acquire is the prober; the server is reachable so the
        // window clears immediately.
        let conn = pool.acquire().unwrap();
        assert!(!conn.is_poisoned());
        pool.release(conn);
        assert_eq!(pool.counters().total_errors, 1);
    }

    #[test]
    fn connect_failure_fails_fast_until_window_expires() {
        let pool = ConnectionPool::new(dead_server(), factory(), &options(0, 3));
        // First acquire pays a real connect attempt and trips the window.
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));

        // While marked down, further acquires do not touch the network.
        for _ in 0..10 {
            let start = Instant::now();
            let err = pool.acquire().unwrap_err();
            assert!(matches!(err, Error::ServerMarkedDown { .. }));
            assert!(start.elapsed() < Duration::from_millis(50));
        }
        assert_eq!(pool.counters().total_errors, 1);

        // After the window, connects are attempted again.
        thread::sleep(Duration::from_millis(250));
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(pool.counters().total_errors, 2);
    }

    #[test]
    fn one_prober_per_window() {
        let (server, _guard) = sink_server();
        let pool = Arc::new(ConnectionPool::new(server, factory(), &options(0, 3)));
        let mut conn = pool.acquire().unwrap();
        conn.poison();
        pool.release(conn);

        // Many concurrent acquires: exactly one may probe (and it will
        // succeed, clearing the window); the rest either fail fast or run
        // after the clear.
        let probed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let probed = Arc::clone(&probed);
            let failed = Arc::clone(&failed);
            handles.push(thread::spawn(move || match pool.acquire() {
                Ok(conn) => {
                    probed.fetch_add(1, Ordering::Relaxed);
                    pool.release(conn);
                }
                Err(Error::ServerMarkedDown { .. }) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => panic!("unexpected error: {e}"),
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(probed.load(Ordering::Relaxed) >= 1);
        assert_eq!(
            probed.load(Ordering::Relaxed) + failed.load(Ordering::Relaxed),
            8
        );
    }

    #[test]
    fn counters_accounting_invariant() {
        let (server, _guard) = sink_server();
        let pool = ConnectionPool::new(server, factory(), &options(1, 2));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        let counters = pool.counters();
        assert_eq!(counters.active, 3);
        assert_eq!(counters.available, 0);
        pool.release(a);
        pool.release(b);
        pool.release(c);
        let counters = pool.counters();
        assert!(counters.available <= 2);
        assert_eq!(
            counters.established,
            counters.available + counters.active
        );
        assert_eq!(counters.total_created, 3);
    }

}
