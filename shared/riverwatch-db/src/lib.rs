//! Riverwatch Database Access
//!
//! PostgreSQL wire-protocol connection pooling for the unit, measurement
//! and daily-average tables.

mod error;
mod pool;

pub use error::{DbError, Result};
pub use pool::{DbPool, PoolConfig, PoolStats};

/// Re-export tokio-postgres types for convenience
pub use tokio_postgres::{types::ToSql, Row};
