//! Idle connection pool.
//!
//! One slot per `host:port` key, at most `max_size` slots in total. A
//! connection is removed from the table the moment it is taken, so it is
//! owned by exactly one request until it is put back or dropped. The table
//! lock is only held for bookkeeping; expired and rejected connections are
//! dropped after it is released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::debug;

/// Time source for idle expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A checked-out connection: the stream behind a read buffer.
#[derive(Debug)]
pub struct PooledConnection<S> {
    stream: BufReader<S>,
    last_used: Instant,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PooledConnection<S> {
    pub fn new(stream: S, now: Instant) -> Self {
        Self {
            stream: BufReader::new(stream),
            last_used: now,
        }
    }

    /// Buffered stream; writes pass straight through to the socket.
    pub fn stream_mut(&mut self) -> &mut BufReader<S> {
        &mut self.stream
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Bytes were received beyond the last response; the framing is out of sync.
    pub fn has_unread_data(&self) -> bool {
        !self.stream.buffer().is_empty()
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_used) > ttl
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently idle in the table.
    pub idle: usize,
    /// Connections opened over the pool's lifetime.
    pub opened: u64,
    /// Successful takes.
    pub reused: u64,
    /// Connections closed by the pool (expired, rejected or discarded).
    pub closed: u64,
}

/// Idle connection table.
pub struct ConnectionPool<S> {
    idle: Mutex<HashMap<String, PooledConnection<S>>>,
    max_size: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    opened: AtomicU64,
    reused: AtomicU64,
    closed: AtomicU64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ConnectionPool<S> {
    /// Create a pool on the wall clock.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self::with_clock(max_size, ttl, Arc::new(SystemClock))
    }

    /// Create a pool on an injected clock.
    pub fn with_clock(max_size: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_size,
            ttl,
            clock,
            opened: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Check out the idle connection for `key`, pruning expired entries first.
    pub fn take(&self, key: &str) -> Option<PooledConnection<S>> {
        let now = self.clock.now();
        let (conn, expired) = {
            let mut idle = self.idle.lock();
            let expired = self.drain_expired(&mut idle, now);
            (idle.remove(key), expired)
        };
        self.close_all(expired);

        if conn.is_some() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            debug!(key, "reusing pooled connection");
        }
        conn
    }

    /// Check a healthy connection back in.
    ///
    /// Kept only if the table has room and `key` has no idle connection
    /// already; otherwise the returned connection is closed. Existing entries
    /// are never evicted.
    pub fn put(&self, key: impl Into<String>, mut conn: PooledConnection<S>) {
        let key = key.into();
        let now = self.clock.now();
        conn.last_used = now;

        let (rejected, expired) = {
            let mut idle = self.idle.lock();
            let expired = self.drain_expired(&mut idle, now);
            let rejected = if idle.len() < self.max_size && !idle.contains_key(&key) {
                idle.insert(key.clone(), conn);
                None
            } else {
                Some(conn)
            };
            (rejected, expired)
        };
        self.close_all(expired);

        if let Some(conn) = rejected {
            debug!(key, "pool full; closing returned connection");
            self.discard(conn);
        }
    }

    /// Close every idle connection older than the TTL. Returns how many.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let expired = {
            let mut idle = self.idle.lock();
            self.drain_expired(&mut idle, now)
        };
        let count = expired.len();
        self.close_all(expired);
        count
    }

    /// Close a connection that will not be returned.
    pub fn discard(&self, conn: PooledConnection<S>) {
        drop(conn);
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Close every idle connection.
    pub fn clear(&self) {
        let all: Vec<_> = self.idle.lock().drain().map(|(_, conn)| conn).collect();
        self.close_all(all);
    }

    pub(crate) fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.idle.lock().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.len(),
            opened: self.opened.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }

    fn drain_expired(
        &self,
        idle: &mut HashMap<String, PooledConnection<S>>,
        now: Instant,
    ) -> Vec<PooledConnection<S>> {
        let stale: Vec<String> = idle
            .iter()
            .filter(|(_, conn)| conn.is_expired(now, self.ttl))
            .map(|(key, _)| key.clone())
            .collect();
        stale.iter().filter_map(|key| idle.remove(key)).collect()
    }

    fn close_all(&self, conns: Vec<PooledConnection<S>>) {
        for conn in conns {
            self.discard(conn);
        }
    }
}
