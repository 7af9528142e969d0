//! Connection Pool Management

pub mod manager;
pub mod types;

pub use manager::Pool;
pub use types::PoolStats;
