//! certpool Library
//!
//! Connection pooling for clients that keep many persistent, certificate-scoped
//! connections to a remote gateway. The pool caches idle connections per
//! `(address, credential)` endpoint so repeated sessions skip the connect and
//! handshake cost. The wire protocol itself is pluggable through the
//! [`Transport`]/[`Connector`] seam; the pool only manages connection lifetimes.

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod pool;
pub mod session;

pub use config::PoolConfig;
pub use connection::{Connection, Connector, Transport};
pub use endpoint::{CredentialId, Endpoint};
pub use error::PoolError;
pub use pool::{Pool, PoolStats};
pub use session::{Lease, Session};

/// Common result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
