//! Pooled Connections
//!
//! A [`Connection`] wraps one live transport session to an endpoint and tracks
//! the state the pool needs: last-use time and an explicit closed flag. The
//! closed flag is one-way (once set it never reverts) and is distinct from
//! "the peer may have silently hung up", which a plain-socket transport cannot
//! observe until the first failed I/O.

pub mod memory;
pub mod tcp;
pub mod transport;

pub use memory::{MemoryConnector, MemoryTransport};
pub use tcp::{TcpConnector, TcpTransport};
pub use transport::{Connector, Transport};

use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::PoolError;
use crate::Result;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live transport session, exclusively owned either by the pool (idle) or
/// by a single caller (checked out). Rust move semantics enforce the
/// exclusivity: handing a `Connection` out of the pool moves it.
pub struct Connection<T: Transport> {
    id: u64,
    endpoint: Endpoint,
    transport: T,
    last_use: Instant,
    closed: bool,
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("last_use", &self.last_use)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Connection<T> {
    /// Wrap a freshly established transport. Last-use starts at creation time.
    pub fn new(endpoint: Endpoint, transport: T) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            transport,
            last_use: Instant::now(),
            closed: false,
        }
    }

    /// Process-unique identifier, stable for the connection's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Advance last-use to now. Called on reuse from the pool and on return
    /// to it, so idle time measures from last activity, not creation.
    pub fn touch(&mut self) {
        self.last_use = Instant::now();
    }

    /// True iff the connection has been idle longer than `max_idle`.
    pub fn is_outdated(&self, max_idle: Duration) -> bool {
        self.last_use.elapsed() > max_idle
    }

    /// Total liveness probe: closed-or-unknown collapses to closed. Never
    /// blocks, never fails.
    pub fn is_closed(&self) -> bool {
        self.closed || self.transport.is_closed()
    }

    /// Close the connection and release transport resources. Idempotent;
    /// transport errors during teardown are absorbed and the connection is
    /// marked closed regardless.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.transport.shutdown().await {
            debug!("Ignoring transport error while closing {}: {}", self.endpoint, e);
        }
    }

    /// Clear buffered read/write state. Must be called before reusing a
    /// pooled connection for a new logical session.
    pub fn reset(&mut self) {
        self.transport.discard_buffers();
    }

    /// Write `data` within `timeout`. A zero timeout is an error. On failure
    /// or an elapsed deadline the connection is marked closed and the error
    /// propagates.
    pub async fn write(&mut self, data: &[u8], write_timeout: Duration) -> Result<()> {
        if write_timeout.is_zero() {
            return Err(PoolError::ZeroWriteTimeout);
        }
        if self.is_closed() {
            return Err(PoolError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            )));
        }

        match timeout(write_timeout, self.transport.write_all(data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!("Write to {} failed: {}", self.endpoint, e);
                self.closed = true;
                Err(PoolError::Io(e))
            }
            Err(_) => {
                debug!("Write to {} timed out after {:?}", self.endpoint, write_timeout);
                self.closed = true;
                Err(PoolError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write timed out",
                )))
            }
        }
    }

    /// Read up to `max` bytes within `read_timeout`. Returns `Ok(None)` when
    /// the peer has closed (the connection is then marked closed) or when the
    /// deadline elapses without data; a returned chunk is never empty. A zero
    /// timeout performs a single non-blocking attempt. Hard transport errors
    /// mark the connection closed and propagate.
    pub async fn read(&mut self, max: usize, read_timeout: Duration) -> Result<Option<Bytes>> {
        if self.is_closed() {
            return Ok(None);
        }

        // A zero deadline still polls the read future once before the timer
        // fires, which gives the non-blocking semantics.
        match timeout(read_timeout, self.transport.read_chunk(max)).await {
            Ok(Ok(Some(chunk))) => Ok(Some(chunk)),
            Ok(Ok(None)) => {
                debug!("Peer closed connection to {}", self.endpoint);
                self.closed = true;
                Ok(None)
            }
            Ok(Err(e)) => {
                debug!("Read from {} failed: {}", self.endpoint, e);
                self.closed = true;
                Err(PoolError::Io(e))
            }
            Err(_) => Ok(None),
        }
    }
}
