//! Session Facade
//!
//! High-level entry point over the pool: a [`Session`] hands out [`Lease`]s,
//! and a lease performs I/O with the configured timeouts plus the reconnect
//! policy for cached connections. A connection taken from the pool may have
//! been silently closed by the peer while it sat idle; a plain-socket
//! connector cannot see that until the first I/O fails. The lease absorbs
//! exactly that failure mode: close the dead connection, take a replacement
//! and retry. Failures on a freshly created connection always propagate.

use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::{Connection, Connector};
use crate::endpoint::Endpoint;
use crate::error::PoolError;
use crate::pool::Pool;
use crate::{PoolConfig, Result};

/// Cheap cloneable handle over a shared [`Pool`].
pub struct Session<C: Connector> {
    pool: Arc<Pool<C>>,
}

impl<C: Connector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            pool: Arc::new(Pool::new(connector, config)),
        }
    }

    /// Wrap an existing pool, typically one shared with a background sweeper.
    pub fn from_pool(pool: Arc<Pool<C>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<Pool<C>> {
        &self.pool
    }

    /// Lease a connection to `endpoint`, reusing a cached one when available.
    /// The lease returns the connection to the pool on release.
    pub async fn get_connection(&self, endpoint: &Endpoint) -> Result<Lease<C>> {
        if let Some(conn) = self.pool.try_acquire_idle(endpoint).await {
            return Ok(Lease::reused(Arc::clone(&self.pool), conn, true));
        }
        let conn = self
            .pool
            .create_connection(endpoint, self.pool.config().connect_timeout)
            .await?;
        Ok(Lease::fresh(Arc::clone(&self.pool), conn, true))
    }

    /// Lease a brand new connection, bypassing the cache entirely. The lease
    /// closes the connection on release instead of pooling it.
    pub async fn new_connection(&self, endpoint: &Endpoint) -> Result<Lease<C>> {
        let conn = self
            .pool
            .create_connection(endpoint, self.pool.config().connect_timeout)
            .await?;
        Ok(Lease::fresh(Arc::clone(&self.pool), conn, false))
    }

    /// Close cached connections idle longer than `max_idle`. Returns how many
    /// were closed.
    pub async fn outdate(&self, max_idle: std::time::Duration) -> usize {
        self.pool.outdate(max_idle).await
    }

    /// Close every cached connection.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

/// One checked-out connection with session-level I/O semantics: configured
/// timeouts, reset-before-reuse and transparent reconnect for cached
/// connections that turn out to be dead.
pub struct Lease<C: Connector> {
    pool: Arc<Pool<C>>,
    endpoint: Endpoint,
    conn: Option<Connection<C::Transport>>,
    /// Whether release() returns the connection to the pool.
    cached: bool,
    /// Whether the current connection came from the idle pool. Only such
    /// connections are eligible for the reconnect-and-retry path.
    reused: bool,
    needs_reset: bool,
}

impl<C: Connector> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("endpoint", &self.endpoint)
            .field("cached", &self.cached)
            .field("reused", &self.reused)
            .field("needs_reset", &self.needs_reset)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Lease<C> {
    fn reused(pool: Arc<Pool<C>>, conn: Connection<C::Transport>, cached: bool) -> Self {
        let endpoint = conn.endpoint().clone();
        Self {
            pool,
            endpoint,
            conn: Some(conn),
            cached,
            reused: true,
            needs_reset: true,
        }
    }

    fn fresh(pool: Arc<Pool<C>>, conn: Connection<C::Transport>, cached: bool) -> Self {
        let endpoint = conn.endpoint().clone();
        Self {
            pool,
            endpoint,
            conn: Some(conn),
            cached,
            reused: false,
            needs_reset: false,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Identifier of the currently held connection, if any. Changes when a
    /// dead cached connection is replaced mid-lease.
    pub fn connection_id(&self) -> Option<u64> {
        self.conn.as_ref().map(Connection::id)
    }

    /// Write `data` using the configured write timeout. On a failure over a
    /// reused connection the lease reconnects and retries; failures over a
    /// fresh connection propagate.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let write_timeout = self.pool.config().write_timeout;
        loop {
            let conn = self.prepare()?;
            match conn.write(data, write_timeout).await {
                Ok(()) => return Ok(()),
                Err(e) if self.should_reconnect(&e) => self.reconnect().await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Read one chunk using the configured read timeout and buffer size.
    /// `Ok(None)` means the peer closed or the deadline elapsed without data.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        let config = self.pool.config();
        let read_timeout = config.read_timeout;
        let max = config.read_buffer_size;
        loop {
            let conn = self.prepare()?;
            match conn.read(max, read_timeout).await {
                Ok(chunk) => return Ok(chunk),
                Err(e) if self.should_reconnect(&e) => self.reconnect().await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Return the connection: back to the pool for cached leases, closed for
    /// uncached ones. Consumes the lease.
    pub async fn release(mut self) {
        if let Some(mut conn) = self.conn.take() {
            if self.cached {
                self.pool.release(conn).await;
            } else {
                conn.close().await;
            }
        }
    }

    /// Close the connection without returning it to the pool. Consumes the
    /// lease.
    pub async fn close(mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
    }

    fn prepare(&mut self) -> Result<&mut Connection<C::Transport>> {
        if self.needs_reset {
            if let Some(conn) = self.conn.as_mut() {
                debug!("Resetting reused connection {} for {}", conn.id(), self.endpoint);
                conn.reset();
            }
            self.needs_reset = false;
        }
        self.conn.as_mut().ok_or_else(|| {
            PoolError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "lease holds no connection",
            ))
        })
    }

    /// A reused connection may have been silently closed while idle; the
    /// first failed I/O is the only way to find out when the connector cannot
    /// detect closure up front. Only transport errors qualify; usage errors
    /// like a zero write timeout propagate untouched.
    fn should_reconnect(&self, error: &PoolError) -> bool {
        self.reused
            && !self.pool.connector().can_detect_close()
            && matches!(error, PoolError::Io(_))
    }

    async fn reconnect(&mut self) -> Result<()> {
        if let Some(mut dead) = self.conn.take() {
            debug!(
                "Cached connection {} to {} was dead, replacing it",
                dead.id(),
                self.endpoint
            );
            dead.close().await;
        }

        if self.cached && self.pool.config().use_cache_for_reconnects {
            if let Some(conn) = self.pool.try_acquire_idle(&self.endpoint).await {
                self.conn = Some(conn);
                self.reused = true;
                self.needs_reset = true;
                return Ok(());
            }
        }

        let conn = self
            .pool
            .create_connection(&self.endpoint, self.pool.config().connect_timeout)
            .await?;
        self.conn = Some(conn);
        // A failure on this one is real and will propagate.
        self.reused = false;
        self.needs_reset = false;
        Ok(())
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_ref() {
            // No blocking teardown in drop; the transport's own drop releases
            // the OS resources.
            warn!(
                "Lease for {} dropped without release, abandoning connection {}",
                self.endpoint,
                conn.id()
            );
        }
    }
}
