//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management, one lazy pool per physical database
//! - Exclusive connection handles with explicit transaction control
//! - Statement execution and result normalization
//! - Type mappings from driver rows to JSON
//! - Database dispatch macros for reducing code duplication
//! - Liveness probes

pub mod connection;
pub mod database_pool;
pub mod executor;
pub mod health;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod types;

pub use connection::{ConnectionHandle, PooledConnection};
pub use database_pool::{DatabasePoolEntry, DatabasePoolManager, PoolLease};
pub use pool::{ConnectionManager, DbPool};
