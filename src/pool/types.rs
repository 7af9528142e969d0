//! Pool Statistics Types

/// Snapshot of pool counters for monitoring and tests.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Acquires served from the idle pool.
    pub pool_hits: usize,
    /// Acquires that had to create a new connection.
    pub pool_misses: usize,
    /// Connections successfully created.
    pub connections_created: usize,
    /// Idle entries found already closed during a scan and dropped.
    pub stale_discarded: usize,
    /// Connections closed on release because the bucket was full or pooling
    /// is disabled.
    pub surplus_closed: usize,
    /// Connections closed by the outdating sweep.
    pub outdated_closed: usize,
}
