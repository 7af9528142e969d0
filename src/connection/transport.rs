//! Transport Seam
//!
//! The pool is transport-agnostic: a concrete wire implementation plugs in
//! through these two traits. [`Connector`] opens new transport sessions for an
//! endpoint; [`Transport`] is the raw byte stream a [`Connection`] wraps with
//! last-use tracking and deadlines.
//!
//! [`Connection`]: crate::connection::Connection

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::PoolError;

/// Raw byte stream underneath a pooled connection.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write the whole chunk or fail.
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read at most `max` bytes. `Ok(None)` means the peer closed the stream;
    /// a returned chunk is never empty.
    async fn read_chunk(&mut self, max: usize) -> io::Result<Option<Bytes>>;

    /// Tear down the underlying stream. Called at most once per transport by
    /// [`Connection::close`](crate::connection::Connection::close), which
    /// absorbs any error returned here.
    async fn shutdown(&mut self) -> io::Result<()>;

    /// Drop any buffered read/write state so a reused connection starts its
    /// next logical session clean.
    fn discard_buffers(&mut self);

    /// Whether the transport knows itself to be closed. Total: must never
    /// block and never fail. A transport that cannot cheaply probe liveness
    /// (plain sockets) reports only explicit closure here.
    fn is_closed(&self) -> bool;
}

/// Factory for transport sessions, one per pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Establish a new transport session to the endpoint within `timeout`.
    /// Connect failures propagate to the acquire caller unchanged.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Self::Transport, PoolError>;

    /// Whether this transport can detect a dead connection before the first
    /// I/O operation. Plain sockets cannot: a pooled connection may look open
    /// until a read or write fails, which is why session leases reconnect
    /// after a failed first operation.
    fn can_detect_close(&self) -> bool {
        false
    }
}
