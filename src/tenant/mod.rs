//! Tenant routing and scoping.
//!
//! - [`context`]: task-local ambient tenant
//! - [`registry`]: tenant id to physical database mapping in the master database
//! - [`rewrite`]: tenant predicate injection for simple SELECTs
//! - [`scoped`]: statement execution against the current tenant's database
//! - [`transaction`]: transactions and deadlock retry

pub mod context;
pub mod registry;
pub mod rewrite;
pub mod scoped;
pub mod transaction;

pub use context::{
    TenantContext, current_context, current_tenant, require_tenant, with_context, with_tenant,
};
pub use registry::TenantRegistry;
pub use rewrite::{QueryRewriter, ScopedQuery};
pub use scoped::ScopedExecutor;
pub use transaction::{TenantTransaction, TransactionManager};
