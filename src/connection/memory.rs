//! In-Memory Transport
//!
//! A scriptable transport that performs no real I/O, used by the test suite
//! and usable as a starting point for custom [`Connector`] implementations.
//! Failure injection covers the interesting paths: refused connects, failing
//! reads/writes, failing teardown and silent peer closure.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::connection::transport::{Connector, Transport};
use crate::endpoint::Endpoint;
use crate::error::PoolError;

#[derive(Default)]
struct MemoryState {
    created: AtomicUsize,
    closed_transports: AtomicUsize,
    resets: AtomicUsize,
    fail_connects: AtomicUsize,
    fail_io: AtomicUsize,
    fail_shutdown: AtomicBool,
    peer_closed: AtomicBool,
    detect_close: AtomicBool,
    read_queue: Mutex<VecDeque<Bytes>>,
    written: Mutex<Vec<Bytes>>,
    readable: Notify,
}

/// Shared-state connector handle; clones observe and script the same state.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<MemoryState>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful transport creations so far.
    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Number of transports torn down via shutdown.
    pub fn closed_transports(&self) -> usize {
        self.state.closed_transports.load(Ordering::SeqCst)
    }

    /// Number of buffer resets observed.
    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }

    /// Make the next `n` connect attempts fail with a refused error.
    pub fn fail_connects(&self, n: usize) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` read/write operations fail.
    pub fn fail_io(&self, n: usize) {
        self.state.fail_io.store(n, Ordering::SeqCst);
    }

    /// Make transport teardown return an error (the pool must absorb it).
    pub fn fail_shutdown(&self, fail: bool) {
        self.state.fail_shutdown.store(fail, Ordering::SeqCst);
    }

    /// Simulate the peer closing the stream: reads drain the queue and then
    /// report end-of-stream.
    pub fn close_peer(&self) {
        self.state.peer_closed.store(true, Ordering::SeqCst);
        self.state.readable.notify_waiters();
    }

    /// Report close detection capability from the connector.
    pub fn set_can_detect_close(&self, value: bool) {
        self.state.detect_close.store(value, Ordering::SeqCst);
    }

    /// Queue a chunk that subsequent reads will return.
    pub fn queue_read(&self, data: &[u8]) {
        self.state
            .read_queue
            .lock()
            .unwrap()
            .push_back(Bytes::copy_from_slice(data));
        self.state.readable.notify_waiters();
    }

    /// Everything written through any transport of this connector, in order.
    pub fn written(&self) -> Vec<Bytes> {
        self.state.written.lock().unwrap().clone()
    }

    fn take_io_failure(&self) -> bool {
        self.state
            .fail_io
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<Self::Transport, PoolError> {
        let refused = self
            .state
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(PoolError::Connect {
                endpoint: endpoint.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "scripted refusal"),
            });
        }

        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransport {
            connector: self.clone(),
            closed: false,
        })
    }

    fn can_detect_close(&self) -> bool {
        self.state.detect_close.load(Ordering::SeqCst)
    }
}

/// Transport half of [`MemoryConnector`].
pub struct MemoryTransport {
    connector: MemoryConnector,
    closed: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.connector.take_io_failure() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }
        self.connector
            .state
            .written
            .lock()
            .unwrap()
            .push(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn read_chunk(&mut self, max: usize) -> io::Result<Option<Bytes>> {
        // A zero-sized read can never produce a non-empty chunk; report no
        // data the same way a zero-length socket read does.
        if max == 0 {
            return Ok(None);
        }

        loop {
            if self.connector.take_io_failure() {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "scripted read failure",
                ));
            }

            // Register for wakeups before checking state so a chunk queued in
            // between cannot be missed.
            let readable = self.connector.state.readable.notified();

            {
                let mut queue = self.connector.state.read_queue.lock().unwrap();
                if let Some(mut chunk) = queue.pop_front() {
                    if chunk.len() > max {
                        let rest = chunk.split_off(max);
                        queue.push_front(rest);
                    }
                    return Ok(Some(chunk));
                }
            }

            if self.connector.state.peer_closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            // Nothing buffered: block until data or peer closure arrives. The
            // caller's deadline cancels this future when time runs out.
            readable.await;
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.closed = true;
        self.connector
            .state
            .closed_transports
            .fetch_add(1, Ordering::SeqCst);
        if self.connector.state.fail_shutdown.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted shutdown failure"));
        }
        Ok(())
    }

    fn discard_buffers(&mut self) {
        self.connector.state.resets.fetch_add(1, Ordering::SeqCst);
        self.connector.state.read_queue.lock().unwrap().clear();
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::CredentialId;
    use std::time::Duration;

    #[tokio::test]
    async fn zero_sized_read_yields_no_chunk() {
        let connector = MemoryConnector::new();
        let endpoint = Endpoint::new("gateway.test", 2195, CredentialId::new("t", b"d".to_vec()));
        let mut transport = connector
            .connect(&endpoint, Duration::from_secs(1))
            .await
            .unwrap();

        connector.queue_read(b"pending");
        let chunk = transport.read_chunk(0).await.unwrap();
        assert!(chunk.is_none());

        // the queued data is untouched and a real read still gets it
        let chunk = transport.read_chunk(256).await.unwrap();
        assert_eq!(chunk.as_deref(), Some(b"pending".as_slice()));
    }
}
