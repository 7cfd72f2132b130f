//! Data models for the tenant database layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod tenant;

// Re-export commonly used types
pub use connection::{DatabaseType, HealthReport, PoolStats, TransactionState};
pub use query::{QueryParam, QueryResult, Row};
pub use tenant::{
    MAX_IDENTIFIER_LEN, TenantDescriptor, is_valid_identifier, validate_identifier,
    validate_tenant_id,
};
