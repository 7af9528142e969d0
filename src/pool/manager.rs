//! Pool Manager Implementation

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::connection::{Connection, Connector};
use crate::endpoint::Endpoint;
use crate::pool::types::PoolStats;
use crate::Result;

#[derive(Default)]
struct PoolCounters {
    pool_hits: AtomicUsize,
    pool_misses: AtomicUsize,
    connections_created: AtomicUsize,
    stale_discarded: AtomicUsize,
    surplus_closed: AtomicUsize,
    outdated_closed: AtomicUsize,
}

/// Keyed pool of idle connections.
///
/// One mutex guards the endpoint→deque mapping and is held only for in-memory
/// bookkeeping; connecting and closing always happen outside it, so a slow
/// connect to one endpoint never stalls acquisition for others. Reuse order is
/// FIFO: acquire pops from the front, release appends at the back, so the
/// longest-idle connection is reused first and outdated first.
pub struct Pool<C: Connector> {
    connector: C,
    config: PoolConfig,
    idle: Mutex<HashMap<Endpoint, VecDeque<Connection<C::Transport>>>>,
    counters: PoolCounters,
}

impl<C: Connector> Pool<C> {
    /// Create a new pool around a connector.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        debug!(
            "New pool, size: {:?}, use_cache_for_reconnects: {}",
            config.pool_size, config.use_cache_for_reconnects
        );
        Self {
            connector,
            config,
            idle: Mutex::new(HashMap::new()),
            counters: PoolCounters::default(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Obtain a connection for the endpoint: a live idle one when available,
    /// otherwise a newly created one. The idle scan runs under the pool lock;
    /// entries found already closed are dropped (not re-closed) and the scan
    /// continues. Creation runs outside the lock, so two concurrent acquires
    /// on an empty bucket may both create; pool size is an optimization
    /// target, not a cap on open connections. `timeout` bounds only the
    /// creation path; connect failures propagate to the caller unchanged.
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Connection<C::Transport>> {
        if let Some(conn) = self.try_acquire_idle(endpoint).await {
            return Ok(conn);
        }
        self.create_connection(endpoint, timeout).await
    }

    /// Idle-scan half of [`Pool::acquire`]: pop live entries from the front of
    /// the bucket under the pool lock, or `None` on a miss. Callers that need
    /// to distinguish reuse from creation (the session reconnect policy) use
    /// this directly.
    pub async fn try_acquire_idle(&self, endpoint: &Endpoint) -> Option<Connection<C::Transport>> {
        let mut idle = self.idle.lock().await;
        let bucket = idle.get_mut(endpoint)?;
        while let Some(mut conn) = bucket.pop_front() {
            if conn.is_closed() {
                self.counters.stale_discarded.fetch_add(1, Ordering::Relaxed);
                debug!("Discarding stale pooled connection {} for {}", conn.id(), endpoint);
                continue;
            }
            conn.touch();
            self.counters.pool_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Reusing pooled connection {} for {}", conn.id(), endpoint);
            return Some(conn);
        }
        None
    }

    /// Creation half of [`Pool::acquire`]: always opens a fresh connection,
    /// bypassing the idle pool. Runs without the pool lock.
    pub async fn create_connection(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Connection<C::Transport>> {
        self.counters.pool_misses.fetch_add(1, Ordering::Relaxed);
        debug!("Opening new connection for {}", endpoint);
        let transport = self.connector.connect(endpoint, timeout).await?;
        self.counters
            .connections_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(Connection::new(endpoint.clone(), transport))
    }

    /// Return a connection to the pool. Connections reporting closed are
    /// dropped without further action. Live connections are stored when the
    /// bucket has room; otherwise the surplus connection is closed outside
    /// the pool lock, since closing may block on I/O.
    pub async fn release(&self, mut conn: Connection<C::Transport>) {
        if conn.is_closed() {
            debug!("Dropping closed connection {} on release", conn.id());
            return;
        }

        if self.config.pooling_enabled() {
            let mut idle = self.idle.lock().await;
            let bucket = idle.entry(conn.endpoint().clone()).or_default();
            // capacity decided while holding the lock, so two releases cannot
            // both see room in the last slot
            if self.config.has_capacity(bucket.len()) {
                conn.touch();
                debug!(
                    "Returned connection {} to pool for {} (bucket size: {})",
                    conn.id(),
                    conn.endpoint(),
                    bucket.len() + 1
                );
                bucket.push_back(conn);
                return;
            }
        }

        debug!(
            "Closing surplus connection {} for {}",
            conn.id(),
            conn.endpoint()
        );
        self.counters.surplus_closed.fetch_add(1, Ordering::Relaxed);
        conn.close().await;
    }

    /// Close idle connections unused for longer than `max_idle` and drop the
    /// buckets that become empty. Already-closed entries are removed without
    /// re-closing. The partitioning runs under the pool lock; the closes run
    /// after it is released. Returns the number of connections closed.
    pub async fn outdate(&self, max_idle: Duration) -> usize {
        let mut expired = Vec::new();
        {
            let mut idle = self.idle.lock().await;
            idle.retain(|endpoint, bucket| {
                let mut kept = VecDeque::with_capacity(bucket.len());
                for conn in bucket.drain(..) {
                    if conn.is_closed() {
                        self.counters.stale_discarded.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    if conn.is_outdated(max_idle) {
                        expired.push(conn);
                    } else {
                        kept.push_back(conn);
                    }
                }
                *bucket = kept;
                if bucket.is_empty() {
                    debug!("Removing empty pool bucket for {}", endpoint);
                    false
                } else {
                    true
                }
            });
        }

        let count = expired.len();
        for mut conn in expired {
            debug!("Closing outdated connection {} for {}", conn.id(), conn.endpoint());
            conn.close().await;
        }
        if count > 0 {
            self.counters.outdated_closed.fetch_add(count, Ordering::Relaxed);
            info!("Outdate sweep closed {} idle connections", count);
        }
        count
    }

    /// Close every idle connection unconditionally and empty the mapping.
    /// The deterministic teardown path: owners call this at shutdown instead
    /// of relying on drop order.
    pub async fn shutdown(&self) {
        let drained: Vec<Connection<C::Transport>> = {
            let mut idle = self.idle.lock().await;
            idle.drain().flat_map(|(_, bucket)| bucket).collect()
        };

        info!("Shutting down pool, closing {} idle connections", drained.len());
        for mut conn in drained {
            conn.close().await;
        }
    }

    /// Spawn a background task sweeping the pool every `period`. Abort the
    /// returned handle (or let the runtime wind down) to stop it; call
    /// [`Pool::shutdown`] for the final cleanup either way.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration, max_idle: Duration) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        info!(
            "Starting pool sweeper, period: {:?}, max idle: {:?}",
            period, max_idle
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick fires immediately and sweeps a fresh pool, which
            // is harmless
            loop {
                interval.tick().await;
                debug!("Running periodic outdate sweep");
                pool.outdate(max_idle).await;
            }
        })
    }

    /// Total idle connections across all endpoints.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.values().map(VecDeque::len).sum()
    }

    /// Idle connections currently pooled for one endpoint.
    pub async fn idle_count_for(&self, endpoint: &Endpoint) -> usize {
        self.idle
            .lock()
            .await
            .get(endpoint)
            .map_or(0, VecDeque::len)
    }

    /// Number of endpoint buckets currently present (empty buckets are
    /// removed by the outdate sweep).
    pub async fn bucket_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_hits: self.counters.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.counters.pool_misses.load(Ordering::Relaxed),
            connections_created: self.counters.connections_created.load(Ordering::Relaxed),
            stale_discarded: self.counters.stale_discarded.load(Ordering::Relaxed),
            surplus_closed: self.counters.surplus_closed.load(Ordering::Relaxed),
            outdated_closed: self.counters.outdated_closed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryConnector;
    use crate::endpoint::CredentialId;

    fn endpoint(label: &str) -> Endpoint {
        Endpoint::new(
            "gateway.test",
            2195,
            CredentialId::new(label, label.as_bytes().to_vec()),
        )
    }

    fn pool_with_size(size: Option<usize>) -> Pool<MemoryConnector> {
        let config = PoolConfig {
            pool_size: size,
            ..PoolConfig::default()
        };
        Pool::new(MemoryConnector::new(), config)
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn acquire_creates_on_empty_pool() {
        let pool = pool_with_size(Some(5));
        let conn = pool.acquire(&endpoint("a"), TIMEOUT).await.unwrap();
        assert!(!conn.is_closed());

        let stats = pool.stats();
        assert_eq!(stats.pool_misses, 1);
        assert_eq!(stats.connections_created, 1);
        assert_eq!(stats.pool_hits, 0);
    }

    #[tokio::test]
    async fn released_connection_is_reused() {
        let pool = pool_with_size(Some(5));
        let key = endpoint("a");

        let conn = pool.acquire(&key, TIMEOUT).await.unwrap();
        let id = conn.id();
        pool.release(conn).await;
        assert_eq!(pool.idle_count_for(&key).await, 1);

        let conn = pool.acquire(&key, TIMEOUT).await.unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(pool.stats().pool_hits, 1);
    }

    #[tokio::test]
    async fn stale_idle_entries_are_skipped_not_reclosed() {
        let pool = pool_with_size(Some(5));
        let key = endpoint("a");

        let c1 = pool.acquire(&key, TIMEOUT).await.unwrap();
        let c2 = pool.acquire(&key, TIMEOUT).await.unwrap();
        let live_id = c2.id();
        pool.release(c1).await;
        pool.release(c2).await;

        // first idle entry dies behind the pool's back
        {
            let mut idle = pool.idle.lock().await;
            let bucket = idle.get_mut(&key).unwrap();
            bucket.front_mut().unwrap().close().await;
        }
        let before = pool.connector().closed_transports();

        let conn = pool.acquire(&key, TIMEOUT).await.unwrap();
        assert_eq!(conn.id(), live_id);
        assert_eq!(pool.stats().stale_discarded, 1);
        // dropped, not closed a second time
        assert_eq!(pool.connector().closed_transports(), before);
    }

    #[tokio::test]
    async fn connect_failure_propagates() {
        let pool = pool_with_size(Some(5));
        pool.connector().fail_connects(1);

        let err = pool.acquire(&endpoint("a"), TIMEOUT).await.unwrap_err();
        assert!(err.is_connect_failure());

        // the failure does not poison the pool
        assert!(pool.acquire(&endpoint("a"), TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn outdate_preserves_order_of_kept_connections() {
        let pool = pool_with_size(None);
        let key = endpoint("a");

        // all three created up front so none is reused in between
        let old = pool.acquire(&key, TIMEOUT).await.unwrap();
        let fresh_a = pool.acquire(&key, TIMEOUT).await.unwrap();
        let fresh_b = pool.acquire(&key, TIMEOUT).await.unwrap();
        let (old_id, id_a, id_b) = (old.id(), fresh_a.id(), fresh_b.id());

        pool.release(old).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.release(fresh_a).await;
        pool.release(fresh_b).await;
        assert_eq!(pool.idle_count_for(&key).await, 3);

        // only the first connection has been idle long enough
        let closed = pool.outdate(Duration::from_millis(40)).await;
        assert_eq!(closed, 1);
        assert_eq!(pool.idle_count_for(&key).await, 2);

        let next = pool.acquire(&key, TIMEOUT).await.unwrap();
        assert_ne!(next.id(), old_id);
        assert_eq!(next.id(), id_a);
        let last = pool.acquire(&key, TIMEOUT).await.unwrap();
        assert_eq!(last.id(), id_b);
    }

    #[tokio::test]
    async fn outdate_removes_empty_buckets() {
        let pool = pool_with_size(Some(5));
        let (key_a, key_b) = (endpoint("a"), endpoint("b"));

        let ca = pool.acquire(&key_a, TIMEOUT).await.unwrap();
        let cb = pool.acquire(&key_b, TIMEOUT).await.unwrap();
        pool.release(ca).await;
        pool.release(cb).await;
        assert_eq!(pool.bucket_count().await, 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let closed = pool.outdate(Duration::from_millis(1)).await;
        assert_eq!(closed, 2);
        assert_eq!(pool.bucket_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let pool = pool_with_size(None);
        for label in ["a", "b", "c"] {
            let conn = pool.acquire(&endpoint(label), TIMEOUT).await.unwrap();
            pool.release(conn).await;
        }
        assert_eq!(pool.idle_count().await, 3);

        pool.shutdown().await;
        assert_eq!(pool.idle_count().await, 0);
        assert_eq!(pool.bucket_count().await, 0);
        assert_eq!(pool.connector().closed_transports(), 3);
    }
}
