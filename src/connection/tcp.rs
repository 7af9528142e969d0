//! TCP Transport
//!
//! Plain TCP implementation of the transport seam. This is the default
//! transport for gateways that terminate TLS elsewhere or for tests against
//! local services; TLS-wrapping connectors implement the same traits on top.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::connection::transport::{Connector, Transport};
use crate::endpoint::Endpoint;
use crate::error::PoolError;

/// Opens plain TCP sessions. Cannot detect a silently dead peer before the
/// first I/O, so `can_detect_close` stays at the default `false`.
#[derive(Clone, Default)]
pub struct TcpConnector;

/// Budget left until `deadline`, or a connect-timeout error once it has
/// passed. The caller's single timeout covers resolution and every connect
/// attempt together, so total wall time never exceeds it.
fn remaining_budget(
    endpoint: &Endpoint,
    deadline: Instant,
    total: Duration,
) -> Result<Duration, PoolError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(PoolError::ConnectTimeout {
            endpoint: endpoint.to_string(),
            timeout: total,
        });
    }
    Ok(left)
}

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(
        &self,
        endpoint: &Endpoint,
        budget: Duration,
    ) -> Result<Vec<SocketAddr>, PoolError> {
        let authority = endpoint.authority();
        debug!("Resolving {}", authority);

        match timeout(budget, lookup_host(authority.clone())).await {
            Ok(Ok(addrs)) => {
                let resolved: Vec<SocketAddr> = addrs.collect();
                if resolved.is_empty() {
                    return Err(PoolError::Connect {
                        endpoint: endpoint.to_string(),
                        source: io::Error::new(
                            io::ErrorKind::NotFound,
                            format!("no addresses resolved for {}", authority),
                        ),
                    });
                }
                debug!("Resolved {} to {} addresses", authority, resolved.len());
                Ok(resolved)
            }
            Ok(Err(e)) => Err(PoolError::Connect {
                endpoint: endpoint.to_string(),
                source: e,
            }),
            Err(_) => Err(PoolError::ConnectTimeout {
                endpoint: endpoint.to_string(),
                timeout: budget,
            }),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Self::Transport, PoolError> {
        let deadline = Instant::now() + connect_timeout;

        let budget = remaining_budget(endpoint, deadline, connect_timeout)?;
        let addrs = self.resolve(endpoint, budget).await?;

        let mut last_error = None;
        for addr in addrs {
            let budget = remaining_budget(endpoint, deadline, connect_timeout)?;
            match timeout(budget, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!("Connected to {} at {}", endpoint, addr);
                    return Ok(TcpTransport {
                        stream,
                        closed: false,
                    });
                }
                Ok(Err(e)) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!("Connect to {} timed out after {:?}", endpoint, connect_timeout);
                    return Err(PoolError::ConnectTimeout {
                        endpoint: endpoint.to_string(),
                        timeout: connect_timeout,
                    });
                }
            }
        }

        Err(PoolError::Connect {
            endpoint: endpoint.to_string(),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no addresses to try")),
        })
    }
}

/// One established TCP stream.
pub struct TcpTransport {
    stream: TcpStream,
    closed: bool,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    async fn read_chunk(&mut self, max: usize) -> io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; max];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.closed = true;
        self.stream.shutdown().await
    }

    fn discard_buffers(&mut self) {
        // Drain whatever the peer already sent without blocking; stale bytes
        // from a previous logical session must not leak into the next one.
        let mut scratch = [0u8; 4096];
        loop {
            match self.stream.try_read(&mut scratch) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("Discarding buffers observed a dead stream: {}", e);
                    self.closed = true;
                    break;
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::CredentialId;

    fn endpoint() -> Endpoint {
        Endpoint::new("gateway.test", 2195, CredentialId::new("t", b"d".to_vec()))
    }

    #[test]
    fn budget_shrinks_toward_the_deadline() {
        let total = Duration::from_secs(10);
        let deadline = Instant::now() + Duration::from_millis(500);

        let left = remaining_budget(&endpoint(), deadline, total).unwrap();
        assert!(left <= Duration::from_millis(500));
        assert!(!left.is_zero());
    }

    #[test]
    fn exhausted_budget_is_a_connect_timeout() {
        let total = Duration::from_secs(10);
        let deadline = Instant::now() - Duration::from_millis(1);

        let err = remaining_budget(&endpoint(), deadline, total).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_connect_failure());
    }
}
