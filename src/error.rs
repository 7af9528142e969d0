//! Pool Error Types

use std::io;
use std::time::Duration;

/// Errors surfaced to callers of the pool.
///
/// Stale pooled connections are not an error: they are discarded during the
/// acquire scan and the outdate sweep without the caller ever seeing them.
/// Likewise `close()` and `is_closed()` never fail; ordinary I/O problems in
/// those paths are absorbed and the connection is simply marked closed.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A new transport session could not be established.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Connection establishment did not finish within the deadline.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// A zero write timeout is disallowed; writes must have a real deadline.
    #[error("write timeout must be non-zero")]
    ZeroWriteTimeout,

    /// I/O failure on a checked-out connection (the connection is marked
    /// closed before this is returned).
    #[error("connection i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl PoolError {
    /// True if this error is a connect-path failure (either variant).
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            PoolError::Connect { .. } | PoolError::ConnectTimeout { .. }
        )
    }

    /// True if this error was caused by an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            PoolError::ConnectTimeout { .. } => true,
            PoolError::Connect { source, .. } => source.kind() == io::ErrorKind::TimedOut,
            PoolError::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            PoolError::ZeroWriteTimeout => false,
        }
    }
}
